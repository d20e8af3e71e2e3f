//! Entity data model and registry.
//!
//! An [`Entity`] is a named peripheral exposed outward as a controllable or
//! observable point. Entities are created once at bridge startup, announced
//! on the discovery channel, and marked unavailable (liveliness token drop)
//! when the registry closes.
//!
//! State discipline: each entity has exactly one writer context (the command
//! dispatcher for switches, the power poller or teleinfo reader for sensors),
//! so `last_state` never sees concurrent writers for the same identity.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use zenoh::Session;
use zenoh::liveliness::LivelinessToken;

use crate::error::{Error, Result};
use crate::keyexpr;

/// The kind of peripheral an entity exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Remote-controllable binary output.
    Switch,
    /// Read-only numeric measurement.
    Sensor,
    /// Read-only on/off observation.
    BinarySensor,
}

impl EntityKind {
    /// String form used in discovery payloads and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Switch => "switch",
            EntityKind::Sensor => "sensor",
            EntityKind::BinarySensor => "binary_sensor",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Measurement metadata for sensor-kind entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorMeta {
    /// Unit of measurement (e.g. "%", "Wh", "VA").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,

    /// Device class (e.g. "battery", "energy").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,

    /// State class (e.g. "measurement", "total_increasing").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
}

impl SensorMeta {
    /// Metadata with only a device class (binary sensors).
    pub fn device_class(device_class: impl Into<String>) -> Self {
        Self {
            unit_of_measurement: None,
            device_class: Some(device_class.into()),
            state_class: None,
        }
    }

    /// Metadata for a numeric measurement.
    pub fn measurement(
        unit: impl Into<String>,
        device_class: impl Into<String>,
        state_class: impl Into<String>,
    ) -> Self {
        Self {
            unit_of_measurement: Some(unit.into()),
            device_class: Some(device_class.into()),
            state_class: Some(state_class.into()),
        }
    }
}

/// The device grouping all entities belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Stable device identifier.
    pub id: String,
}

/// Discovery announcement published once per entity at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub identity: String,
    pub name: String,
    pub kind: EntityKind,
    pub device: DeviceInfo,
    /// Channel the entity publishes state on.
    pub state_key: String,
    /// Channel the entity accepts commands on (switches only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_key: Option<String>,
    #[serde(flatten)]
    pub meta: Option<SensorMeta>,
}

/// A named, typed peripheral exposed to the bridge.
#[derive(Debug)]
pub struct Entity {
    identity: String,
    name: String,
    kind: EntityKind,
    meta: Option<SensorMeta>,
    last_state: RwLock<Option<String>>,
}

impl Entity {
    /// Create a switch-kind entity.
    pub fn switch(identity: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            name: name.into(),
            kind: EntityKind::Switch,
            meta: None,
            last_state: RwLock::new(None),
        }
    }

    /// Create a numeric sensor entity.
    pub fn sensor(
        identity: impl Into<String>,
        name: impl Into<String>,
        meta: SensorMeta,
    ) -> Self {
        Self {
            identity: identity.into(),
            name: name.into(),
            kind: EntityKind::Sensor,
            meta: Some(meta),
            last_state: RwLock::new(None),
        }
    }

    /// Create a binary sensor entity.
    pub fn binary_sensor(
        identity: impl Into<String>,
        name: impl Into<String>,
        meta: SensorMeta,
    ) -> Self {
        Self {
            identity: identity.into(),
            name: name.into(),
            kind: EntityKind::BinarySensor,
            meta: Some(meta),
            last_state: RwLock::new(None),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn is_switch(&self) -> bool {
        self.kind == EntityKind::Switch
    }

    /// Last value published outward for this entity, if any.
    pub async fn last_state(&self) -> Option<String> {
        self.last_state.read().await.clone()
    }

    /// Record a value as published.
    pub async fn record(&self, state: &str) {
        *self.last_state.write().await = Some(state.to_string());
    }

    /// Build the discovery announcement for this entity.
    pub fn announcement(&self, prefix: &str, device: &DeviceInfo) -> Announcement {
        Announcement {
            identity: self.identity.clone(),
            name: self.name.clone(),
            kind: self.kind,
            device: device.clone(),
            state_key: keyexpr::state_key(prefix, &self.identity),
            command_key: self
                .is_switch()
                .then(|| keyexpr::command_key(prefix, &self.identity)),
            meta: self.meta.clone(),
        }
    }
}

/// Owns every entity of the bridge and their outward channels.
///
/// Lifecycle: [`register`](Self::register) during construction,
/// [`announce_all`](Self::announce_all) once connected, then state publishes
/// from the worker loops, and finally [`close`](Self::close) (idempotent) to
/// mark everything unavailable.
pub struct EntityRegistry {
    session: Arc<Session>,
    prefix: String,
    device: DeviceInfo,
    entities: HashMap<String, Arc<Entity>>,
    /// Registration order, so announcements are deterministic.
    order: Vec<String>,
    /// Liveliness tokens, dropped on close to signal unavailability.
    tokens: RwLock<Vec<LivelinessToken>>,
    closed: AtomicBool,
}

impl EntityRegistry {
    pub fn new(session: Arc<Session>, prefix: impl Into<String>, device: DeviceInfo) -> Self {
        Self {
            session,
            prefix: prefix.into(),
            device,
            entities: HashMap::new(),
            order: Vec::new(),
            tokens: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Add an entity. Identities must be unique within the registry.
    pub fn register(&mut self, entity: Entity) -> Result<()> {
        let identity = entity.identity().to_string();
        if self.entities.contains_key(&identity) {
            return Err(Error::DuplicateEntity(identity));
        }
        self.order.push(identity.clone());
        self.entities.insert(identity, Arc::new(entity));
        Ok(())
    }

    pub fn get(&self, identity: &str) -> Option<&Arc<Entity>> {
        self.entities.get(identity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in registration order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Publish discovery metadata and declare liveliness for every entity,
    /// plus the bridge-level liveliness token.
    pub async fn announce_all(&self) -> Result<()> {
        let mut tokens = self.tokens.write().await;

        let bridge_key = keyexpr::bridge_alive_key(&self.prefix);
        let token = self.session.liveliness().declare_token(&bridge_key).await?;
        tokens.push(token);

        for entity in self.entities() {
            let announcement = entity.announcement(&self.prefix, &self.device);
            let key = keyexpr::discovery_key(&self.prefix, entity.identity());
            let payload = serde_json::to_vec(&announcement)?;
            self.session.put(&key, payload).await?;

            let alive_key = keyexpr::entity_alive_key(&self.prefix, entity.identity());
            let token = self.session.liveliness().declare_token(&alive_key).await?;
            tokens.push(token);

            tracing::info!(
                identity = %entity.identity(),
                kind = %entity.kind(),
                "Entity announced"
            );
        }

        Ok(())
    }

    /// Record and publish a new state for an entity.
    ///
    /// The payload is the plain UTF-8 state text on the entity's state
    /// channel.
    pub async fn publish_state(&self, identity: &str, state: &str) -> Result<()> {
        let entity = self
            .entities
            .get(identity)
            .ok_or_else(|| Error::UnknownEntity(identity.to_string()))?;

        entity.record(state).await;

        let key = keyexpr::state_key(&self.prefix, identity);
        self.session.put(&key, state.as_bytes().to_vec()).await?;

        tracing::debug!(identity = %identity, state = %state, "State published");
        Ok(())
    }

    /// Last published state of an entity, if any.
    pub async fn last_state(&self, identity: &str) -> Option<String> {
        match self.entities.get(identity) {
            Some(entity) => entity.last_state().await,
            None => None,
        }
    }

    /// Mark every entity unavailable and retract discovery metadata.
    ///
    /// Idempotent: a second close is a no-op. The session itself is closed by
    /// the caller, which may share it with other components.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping the tokens undeclares them, which is the unavailability
        // signal observers react to.
        self.tokens.write().await.clear();

        for entity in self.entities() {
            let key = keyexpr::discovery_key(&self.prefix, entity.identity());
            if let Err(e) = self.session.delete(&key).await {
                tracing::warn!(identity = %entity.identity(), error = %e, "Failed to retract discovery");
            }
        }

        tracing::info!(count = self.len(), "Entities unregistered");
    }
}
