//! Bridge supervisor.
//!
//! Owns the lifecycle of every exposed entity and the three execution
//! contexts of the running state: the inbound-command subscriber, the power
//! poll loop, and (when enabled) the teleinfo reader.
//!
//! Lifecycle: acquire hardware, announce entities, run workers, then on
//! shutdown stop accepting commands, drive the relay to its safe level,
//! mark every entity unavailable and close the session. Only hardware
//! acquisition and the initial announcement can fail fatally; everything
//! after start is error-isolated per loop.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use zenoh::Session;

use gpioha_common::{DeviceInfo, Entity, EntityRegistry, SensorMeta, connect, keyexpr};

use crate::actuator::{ActuatorError, ActuatorMap, GpioActuator, RelayLine, SysfsActuator};
use crate::config::{BridgeConfig, GpioBridgeConfig};
use crate::dispatch::{Dispatcher, parse_command};
use crate::ident;
use crate::power::{ChargeSense, PmicProbe, PowerPoller, SamplerMode};
use crate::teleinfo::TeleinfoReader;

/// Errors that abort bridge construction.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to acquire relay line: {0}")]
    Hardware(#[from] ActuatorError),

    #[error(transparent)]
    Common(#[from] gpioha_common::Error),

    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),
}

/// Top-level owner of entities, hardware and worker tasks.
pub struct GpioBridge {
    session: Arc<Session>,
    registry: Arc<EntityRegistry>,
    relay: RelayLine,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl GpioBridge {
    /// Acquire hardware, connect, announce every entity and start the
    /// worker loops.
    ///
    /// Fails fatally if the relay line cannot be reserved or the initial
    /// announcement fails; no partial entity set is left registered in
    /// either case.
    pub async fn start(config: GpioBridgeConfig) -> Result<Self, BridgeError> {
        let bridge_cfg = &config.bridge;

        // uninitialized -> hardware-acquired. The relay line is the one
        // exclusively-owned resource; losing the race for it is
        // unrecoverable.
        let relay = RelayLine::acquire(&bridge_cfg.relay.chip, bridge_cfg.relay.line)?;

        let session = Arc::new(connect(&config.zenoh).await?);

        // hardware-acquired -> announced.
        let device = DeviceInfo {
            name: bridge_cfg.device_name.clone(),
            id: bridge_cfg.device_id.clone(),
        };
        let teleinfo_enabled = bridge_cfg.teleinfo.enabled();

        let mut registry = EntityRegistry::new(
            session.clone(),
            bridge_cfg.key_prefix.clone(),
            device,
        );
        for entity in entity_set(bridge_cfg, teleinfo_enabled) {
            registry.register(entity)?;
        }

        let mut actuators = ActuatorMap::new();
        actuators.insert(ident::RELAY1, Box::new(GpioActuator::new(relay.clone())));
        if bridge_cfg.leds.enabled {
            for (identity, path) in [
                (ident::LED_R, &bridge_cfg.leds.red),
                (ident::LED_G, &bridge_cfg.leds.green),
                (ident::LED_B, &bridge_cfg.leds.blue),
            ] {
                actuators.insert(identity, Box::new(SysfsActuator::new(path.clone())));
            }
        }

        if teleinfo_enabled {
            tracing::info!("Teleinfo feed enabled");
        }

        let registry = Arc::new(registry);
        registry.announce_all().await?;

        // announced -> running.
        let dispatcher = Arc::new(Dispatcher::new(actuators));
        let mut tasks = Vec::new();

        let subscriber = session
            .declare_subscriber(keyexpr::command_wildcard(registry.prefix()))
            .await?;
        {
            let dispatcher = dispatcher.clone();
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                while let Ok(sample) = subscriber.recv_async().await {
                    let key = sample.key_expr().as_str().to_string();
                    let payload = sample.payload().to_bytes();
                    handle_command(&dispatcher, &registry, &key, &payload).await;
                }
            }));
        }

        let charge = match ChargeSense::open(&bridge_cfg.charge.chip, bridge_cfg.charge.line) {
            Ok(charge) => Some(charge),
            Err(e) => {
                tracing::warn!(error = %e, "Charge sense unavailable, charging state will not update");
                None
            }
        };
        let poller = PowerPoller::new(
            PmicProbe::new(
                bridge_cfg.battery.probe_command.clone(),
                Duration::from_millis(bridge_cfg.battery.probe_timeout_ms),
            ),
            charge,
            bridge_cfg.battery.mode,
            Duration::from_secs(bridge_cfg.poll_interval_secs),
            registry.clone(),
        );
        tasks.push(tokio::spawn(poller.run()));

        if teleinfo_enabled {
            let reader = TeleinfoReader::new(
                bridge_cfg.teleinfo.port.clone(),
                bridge_cfg.teleinfo.baud,
                registry.clone(),
            );
            tasks.push(tokio::spawn(reader.run()));
        }

        let status = serde_json::json!({
            "bridge": "gpio",
            "version": env!("CARGO_PKG_VERSION"),
            "status": "running",
            "entities": registry.entities().map(|e| e.identity().to_string()).collect::<Vec<_>>(),
            "teleinfo": teleinfo_enabled,
        });
        let status_key = keyexpr::status_key(registry.prefix());
        if let Err(e) = session.put(&status_key, status.to_string()).await {
            tracing::warn!(error = %e, "Failed to publish bridge status");
        }

        tracing::info!(
            entities = registry.len(),
            teleinfo = teleinfo_enabled,
            "Bridge started"
        );

        Ok(Self {
            session,
            registry,
            relay,
            tasks,
            closed: false,
        })
    }

    /// The entity registry (primarily for inspection and tests).
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Run until a shutdown signal is received, then shut down.
    pub async fn run(mut self) -> Result<(), BridgeError> {
        tracing::info!("Bridge running. Press Ctrl+C to stop.");

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }

        tracing::info!("Received shutdown signal");
        self.shutdown().await;
        Ok(())
    }

    /// Coordinated shutdown. Idempotent: a second call is a no-op.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // Stop accepting commands and halt the loops before touching the
        // hardware; aborted tasks drop their handles.
        for task in &self.tasks {
            task.abort();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Relay to its safe level, then release our handle.
        if let Err(e) = self.relay.set(false) {
            tracing::warn!(error = %e, "Failed to drive relay to safe level");
        }

        // Entities go unavailable before the transport disconnects.
        self.registry.close().await;

        let status = serde_json::json!({ "bridge": "gpio", "status": "offline" });
        let status_key = keyexpr::status_key(self.registry.prefix());
        if let Err(e) = self.session.put(&status_key, status.to_string()).await {
            tracing::warn!(error = %e, "Failed to publish offline status");
        }

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!("Bridge stopped");
    }
}

/// The entity set for a given configuration.
///
/// Switch entities get their actuator bindings in [`GpioBridge::start`];
/// sensors are outputs only. Teleinfo entities are included only when the
/// feed was enabled at startup.
fn entity_set(cfg: &BridgeConfig, teleinfo_enabled: bool) -> Vec<Entity> {
    let mut entities = vec![Entity::switch(ident::RELAY1, "RELAY1")];

    if cfg.leds.enabled {
        for identity in [ident::LED_R, ident::LED_G, ident::LED_B] {
            entities.push(Entity::switch(identity, identity));
        }
    }

    let battery_meta = match cfg.battery.mode {
        SamplerMode::Percent => SensorMeta::measurement("%", "battery", "measurement"),
        SamplerMode::Voltage => SensorMeta::measurement("V", "voltage", "measurement"),
    };
    entities.push(Entity::sensor(ident::BATTERY, "UPS Voltage", battery_meta));
    entities.push(Entity::binary_sensor(
        ident::CHARGING,
        "Battery charging",
        SensorMeta::device_class("battery_charging"),
    ));

    if teleinfo_enabled {
        entities.extend(crate::teleinfo::entities());
    }

    entities
}

/// Handle one inbound command sample.
///
/// Resolves the target entity from the key expression, drives the actuator,
/// then announces the resulting state. The physical write strictly precedes
/// the announcement; a failed write announces nothing.
pub async fn handle_command(
    dispatcher: &Dispatcher,
    registry: &EntityRegistry,
    key: &str,
    payload: &[u8],
) {
    let Some(identity) = keyexpr::identity_from_command_key(registry.prefix(), key) else {
        tracing::warn!(key = %key, "Ignoring command on unexpected key");
        return;
    };

    let Some(requested_on) = parse_command(payload) else {
        tracing::warn!(identity = %identity, "Ignoring malformed command payload");
        return;
    };

    tracing::info!(identity = %identity, on = requested_on, "Command received");

    match dispatcher.dispatch(identity, requested_on) {
        Ok(state) => {
            if let Err(e) = registry.publish_state(identity, state).await {
                tracing::warn!(identity = %identity, error = %e, "Failed to announce switch state");
            }
        }
        Err(e) => {
            tracing::error!(identity = %identity, error = %e, "Command dispatch failed");
        }
    }
}
