//! Battery/PMIC telemetry sampling and the periodic poll loop.
//!
//! The battery voltage sits behind an external probe utility whose stdout is
//! a single line ending in a (possibly labeled) hexadecimal register value.
//! Two PMIC variants are supported, each with its own analog-input register
//! address and integer-to-voltage scale factor; the variant is identified
//! from the chip-identity register and cached, so a steady-state tick costs
//! one probe invocation.

use std::sync::Arc;
use std::time::Duration;

use gpiocdev::Request;
use gpiocdev::line::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

use gpioha_common::EntityRegistry;

use crate::dispatch::{STATE_OFF, STATE_ON};
use crate::ident;

/// Errors raised during one sampling tick. All of them are transient: the
/// tick skips publishing and the loop continues.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("Probe invocation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("Probe exited with {0}")]
    Status(std::process::ExitStatus),

    #[error("Probe output '{0}' is not a hexadecimal value")]
    Parse(String),

    #[error("Probe produced no output")]
    Empty,

    #[error("Charge sense read failed: {0}")]
    ChargeSense(#[from] gpiocdev::Error),
}

/// What the battery entity publishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerMode {
    /// Discrete percentage scale (0/25/50/75/100).
    #[default]
    Percent,
    /// The scaled voltage itself, two decimals.
    Voltage,
}

/// Known PMIC variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmicVariant {
    /// MaxLinear MXL7704.
    Mxl7704,
    /// Dialog DA9090.
    Da9090,
}

impl PmicVariant {
    /// Identify the variant from the chip-identity register's text.
    pub fn from_chip_id(id: &str) -> Self {
        if id.trim() == "a0" {
            PmicVariant::Mxl7704
        } else {
            PmicVariant::Da9090
        }
    }

    /// Register encoding the analog input for this variant.
    pub fn analog_register(self) -> u8 {
        match self {
            PmicVariant::Mxl7704 => 0x1d,
            PmicVariant::Da9090 => 0x13,
        }
    }

    /// Convert a raw register value to an approximate voltage.
    pub fn voltage(self, raw: u32) -> f64 {
        let scale = match self {
            PmicVariant::Mxl7704 => 2.0,
            PmicVariant::Da9090 => 4.0,
        };
        scale * raw as f64 / 100.0
    }
}

/// Map a battery voltage to the discrete percentage scale.
///
/// Thresholds are strict: a value exactly at a boundary falls to the lower
/// bucket.
pub fn voltage_to_percent(voltage: f64) -> u8 {
    if voltage > 4.0 {
        100
    } else if voltage > 3.75 {
        75
    } else if voltage > 3.5 {
        50
    } else if voltage > 3.25 {
        25
    } else {
        0
    }
}

/// Last whitespace token of a probe output line, with any `label=` prefix
/// stripped.
fn value_token(output: &str) -> Result<&str, SampleError> {
    let token = output
        .split_whitespace()
        .next_back()
        .ok_or(SampleError::Empty)?;
    Ok(token.rsplit('=').next().unwrap_or(token))
}

/// Parse a probe output line as a hexadecimal register value.
pub fn parse_hex(output: &str) -> Result<u32, SampleError> {
    let token = value_token(output)?;
    let digits = token.trim_start_matches("0x");
    u32::from_str_radix(digits, 16).map_err(|_| SampleError::Parse(token.to_string()))
}

/// Time-boxed invocations of the external PMIC probe.
pub struct PmicProbe {
    command: Vec<String>,
    timeout: Duration,
}

impl PmicProbe {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    async fn invoke(&self, register: u8) -> Result<String, SampleError> {
        let program = self.command.first().ok_or(SampleError::Empty)?;

        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..])
            .arg(format!("{:#04x}", register))
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| SampleError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(SampleError::Status(output.status));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Read the chip-identity register's text token.
    pub async fn chip_id(&self) -> Result<String, SampleError> {
        let output = self.invoke(0x00).await?;
        Ok(value_token(&output)?.to_string())
    }

    /// Read a register as a hexadecimal value.
    pub async fn read_hex(&self, register: u8) -> Result<u32, SampleError> {
        let output = self.invoke(register).await?;
        parse_hex(&output)
    }
}

/// Charger-presence sense over an active-low AC-OK input line.
pub struct ChargeSense {
    request: Request,
    offset: u32,
}

impl ChargeSense {
    pub fn open(chip: &str, offset: u32) -> Result<Self, SampleError> {
        let request = Request::builder()
            .on_chip(chip)
            .with_consumer("zenoh-bridge-gpio")
            .with_line(offset)
            .as_input()
            .request()?;
        Ok(Self { request, offset })
    }

    /// The line is active low: physical 0 means a charger is present.
    pub fn charging(&self) -> Result<bool, SampleError> {
        let value = self.request.value(self.offset)?;
        Ok(value == Value::Inactive)
    }
}

/// Fixed-interval poller publishing battery and charging state.
///
/// One tick never overlaps the next; the interval sleep only starts once the
/// tick completed. Any failure inside a tick is logged and the previous
/// published value stands.
pub struct PowerPoller {
    probe: PmicProbe,
    charge: Option<ChargeSense>,
    mode: SamplerMode,
    interval: Duration,
    registry: Arc<EntityRegistry>,
    /// Cached after the first successful identification.
    variant: Option<PmicVariant>,
}

impl PowerPoller {
    pub fn new(
        probe: PmicProbe,
        charge: Option<ChargeSense>,
        mode: SamplerMode,
        interval: Duration,
        registry: Arc<EntityRegistry>,
    ) -> Self {
        Self {
            probe,
            charge,
            mode,
            interval,
            registry,
            variant: None,
        }
    }

    /// Run the polling loop until the task is cancelled.
    pub async fn run(mut self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Power poller started");

        loop {
            self.tick().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn tick(&mut self) {
        match self.sample().await {
            Ok(state) => {
                if let Err(e) = self.registry.publish_state(ident::BATTERY, &state).await {
                    tracing::warn!(error = %e, "Failed to publish battery state");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Battery sample failed, keeping previous value");
            }
        }

        if let Some(charge) = &self.charge {
            match charge.charging() {
                Ok(charging) => {
                    let state = if charging { STATE_ON } else { STATE_OFF };
                    if let Err(e) = self.registry.publish_state(ident::CHARGING, state).await {
                        tracing::warn!(error = %e, "Failed to publish charging state");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Charge sense failed, keeping previous value");
                }
            }
        }
    }

    async fn sample(&mut self) -> Result<String, SampleError> {
        let variant = match self.variant {
            Some(v) => v,
            None => {
                let id = self.probe.chip_id().await?;
                let v = PmicVariant::from_chip_id(&id);
                tracing::info!(chip_id = %id, variant = ?v, "PMIC identified");
                self.variant = Some(v);
                v
            }
        };

        let raw = self.probe.read_hex(variant.analog_register()).await?;
        let voltage = variant.voltage(raw);

        Ok(match self.mode {
            SamplerMode::Percent => voltage_to_percent(voltage).to_string(),
            SamplerMode::Voltage => format!("{:.2}", voltage),
        })
    }
}
