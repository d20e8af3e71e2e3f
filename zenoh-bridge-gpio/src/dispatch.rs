//! Inbound command dispatch.
//!
//! The dispatcher is the sole writer of switch state. Ordering contract: the
//! physical write always precedes the outward state announcement, so an
//! observer never sees a state the hardware has not reached yet.

use thiserror::Error;

use crate::actuator::{ActuatorError, ActuatorMap};

/// Canonical switch state representations.
pub const STATE_ON: &str = "ON";
pub const STATE_OFF: &str = "OFF";

/// Errors raised by command dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}

/// Dispatches (identity, requested-state) events to the actuator table.
pub struct Dispatcher {
    map: ActuatorMap,
}

impl Dispatcher {
    pub fn new(map: ActuatorMap) -> Self {
        Self { map }
    }

    /// Perform exactly one physical write for `identity`, returning the
    /// canonical state text the caller must announce afterwards.
    ///
    /// An unrecognized identity performs no write and alters nothing.
    pub fn dispatch(&self, identity: &str, requested_on: bool) -> Result<&'static str, DispatchError> {
        let actuator = self
            .map
            .get(identity)
            .ok_or_else(|| DispatchError::UnknownDevice(identity.to_string()))?;

        actuator.apply(requested_on)?;

        Ok(if requested_on { STATE_ON } else { STATE_OFF })
    }
}

/// Parse a command payload into a binary intent.
///
/// Accepts `ON`/`OFF`, `1`/`0` and `true`/`false`, case-insensitively.
/// Anything else is a malformed command.
pub fn parse_command(payload: &[u8]) -> Option<bool> {
    let text = std::str::from_utf8(payload).ok()?;
    match text.trim().to_ascii_uppercase().as_str() {
        "ON" | "1" | "TRUE" => Some(true),
        "OFF" | "0" | "FALSE" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::Actuator;
    use std::sync::{Arc, Mutex};

    /// Records the levels written to it, in order.
    struct RecordingActuator {
        writes: Arc<Mutex<Vec<u8>>>,
        fail: bool,
    }

    impl Actuator for RecordingActuator {
        fn apply(&self, on: bool) -> Result<(), ActuatorError> {
            if self.fail {
                return Err(ActuatorError::ControlFile {
                    path: "/dev/null".into(),
                    source: std::io::Error::other("boom"),
                });
            }
            self.writes.lock().unwrap().push(u8::from(on));
            Ok(())
        }
    }

    fn dispatcher_with_recorder(fail: bool) -> (Dispatcher, Arc<Mutex<Vec<u8>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut map = ActuatorMap::new();
        map.insert(
            "RELAY1",
            Box::new(RecordingActuator {
                writes: writes.clone(),
                fail,
            }),
        );
        (Dispatcher::new(map), writes)
    }

    #[test]
    fn test_dispatch_writes_in_order() {
        let (dispatcher, writes) = dispatcher_with_recorder(false);

        assert_eq!(dispatcher.dispatch("RELAY1", true).unwrap(), STATE_ON);
        assert_eq!(dispatcher.dispatch("RELAY1", false).unwrap(), STATE_OFF);

        assert_eq!(*writes.lock().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_dispatch_unknown_identity_writes_nothing() {
        let (dispatcher, writes) = dispatcher_with_recorder(false);

        let err = dispatcher.dispatch("UNKNOWN", true).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownDevice(id) if id == "UNKNOWN"));
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_actuator_failure_propagates() {
        let (dispatcher, writes) = dispatcher_with_recorder(true);

        let err = dispatcher.dispatch("RELAY1", true).unwrap_err();
        assert!(matches!(err, DispatchError::Actuator(_)));
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(b"ON"), Some(true));
        assert_eq!(parse_command(b"on"), Some(true));
        assert_eq!(parse_command(b"1"), Some(true));
        assert_eq!(parse_command(b" true \n"), Some(true));
        assert_eq!(parse_command(b"OFF"), Some(false));
        assert_eq!(parse_command(b"0"), Some(false));
        assert_eq!(parse_command(b"toggle"), None);
        assert_eq!(parse_command(b""), None);
        assert_eq!(parse_command(&[0xff, 0xfe]), None);
    }
}
