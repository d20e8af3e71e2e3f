//! Physical actuators behind switch entities.
//!
//! Every switch-kind entity is bound at construction to exactly one
//! [`Actuator`]; the binding never changes at runtime. The identity-to-action
//! branching lives in the [`ActuatorMap`], so an unknown identity is a table
//! miss rather than a conditional fallthrough.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use gpiocdev::Request;
use gpiocdev::line::Value;
use thiserror::Error;

/// Errors raised by physical writes.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] gpiocdev::Error),

    #[error("Control file write failed ({path}): {source}")]
    ControlFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A physical binary output.
pub trait Actuator: Send + Sync {
    /// Drive the output to the requested level. Exactly one physical write
    /// per call.
    fn apply(&self, on: bool) -> Result<(), ActuatorError>;
}

/// Exclusively-reserved GPIO output line (the relay control).
///
/// The handle is cheaply cloneable; the kernel releases the line request
/// when the last clone drops. Process exit covers the crash path.
#[derive(Clone, Debug)]
pub struct RelayLine {
    request: Arc<Request>,
    offset: u32,
}

impl RelayLine {
    /// Reserve the line as an output, driven low.
    ///
    /// Fails if the line is already owned by another process; that is
    /// unrecoverable and surfaced to the caller.
    pub fn acquire(chip: &str, offset: u32) -> Result<Self, ActuatorError> {
        let request = Request::builder()
            .on_chip(chip)
            .with_consumer("zenoh-bridge-gpio")
            .with_line(offset)
            .as_output(Value::Inactive)
            .request()?;

        tracing::info!(chip = %chip, line = offset, "Relay line acquired");

        Ok(Self {
            request: Arc::new(request),
            offset,
        })
    }

    /// Set the line's logic level.
    pub fn set(&self, level: bool) -> Result<(), ActuatorError> {
        let value = if level { Value::Active } else { Value::Inactive };
        self.request.set_value(self.offset, value)?;
        Ok(())
    }
}

/// Actuator driving the relay's GPIO line.
pub struct GpioActuator {
    line: RelayLine,
}

impl GpioActuator {
    pub fn new(line: RelayLine) -> Self {
        Self { line }
    }
}

impl Actuator for GpioActuator {
    fn apply(&self, on: bool) -> Result<(), ActuatorError> {
        self.line.set(on)
    }
}

/// Actuator writing `"1"`/`"0"` into a sysfs-style control file.
///
/// The write is the entire contract; no read-back is performed.
pub struct SysfsActuator {
    path: PathBuf,
}

impl SysfsActuator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Actuator for SysfsActuator {
    fn apply(&self, on: bool) -> Result<(), ActuatorError> {
        let level = if on { "1" } else { "0" };
        std::fs::write(&self.path, level).map_err(|source| ActuatorError::ControlFile {
            path: self.path.clone(),
            source,
        })
    }
}

/// Static table from switch identity to its physical write operation.
#[derive(Default)]
pub struct ActuatorMap {
    actuators: HashMap<String, Box<dyn Actuator>>,
}

impl ActuatorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an identity to an actuator. Bindings are fixed at construction.
    pub fn insert(&mut self, identity: impl Into<String>, actuator: Box<dyn Actuator>) {
        self.actuators.insert(identity.into(), actuator);
    }

    pub fn get(&self, identity: &str) -> Option<&dyn Actuator> {
        self.actuators.get(identity).map(|a| a.as_ref())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.actuators.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }
}
