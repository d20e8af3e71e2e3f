//! Teleinfo utility-meter frame parsing and the serial reader loop.
//!
//! The meter emits newline-terminated ASCII records at 1200 baud, 7 data
//! bits, even parity, 1 stop bit, roughly one frame per second per register.
//! A record carries the register name as its first whitespace-separated token
//! and the value as the second; anything after that (checksum) is ignored.
//!
//! Historic and standard TIC modes name the same measurements differently,
//! so several register names alias one entity identity; the most recently
//! received frame wins.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

use gpioha_common::{Entity, EntityRegistry, SensorMeta};

use crate::ident;

/// Register name to target entity identity.
const REGISTERS: &[(&str, &str)] = &[
    // Historic mode
    ("BASE", ident::TIC_BASE),
    ("HCHC", ident::TIC_HC),
    ("HCHP", ident::TIC_HP),
    ("PAPP", ident::TIC_PAPP),
    ("IINST", ident::TIC_IINST),
    // Standard mode
    ("EASF01", ident::TIC_HC),
    ("EASF02", ident::TIC_HP),
    ("SINSTS", ident::TIC_PAPP),
    ("IRMS1", ident::TIC_IINST),
];

/// Resolve a register name to its entity identity.
///
/// Lookup is total: unknown names resolve to `None` and are dropped
/// silently, not reported.
pub fn identity_for(register: &str) -> Option<&'static str> {
    REGISTERS
        .iter()
        .find(|(name, _)| *name == register)
        .map(|(_, identity)| *identity)
}

/// The sensor entities backing the teleinfo feed.
pub fn entities() -> Vec<Entity> {
    vec![
        Entity::sensor(
            ident::TIC_BASE,
            "Energy index base",
            SensorMeta::measurement("Wh", "energy", "total_increasing"),
        ),
        Entity::sensor(
            ident::TIC_HC,
            "Energy index tier 1",
            SensorMeta::measurement("Wh", "energy", "total_increasing"),
        ),
        Entity::sensor(
            ident::TIC_HP,
            "Energy index tier 2",
            SensorMeta::measurement("Wh", "energy", "total_increasing"),
        ),
        Entity::sensor(
            ident::TIC_PAPP,
            "Apparent power",
            SensorMeta::measurement("VA", "apparent_power", "measurement"),
        ),
        Entity::sensor(
            ident::TIC_IINST,
            "Current",
            SensorMeta::measurement("A", "current", "measurement"),
        ),
    ]
}

/// One decoded teleinfo record. Transient: produced by the parser, consumed
/// by the publish step, never retained.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub register: &'a str,
    pub identity: &'static str,
    /// Forwarded verbatim, no unit conversion.
    pub value: &'a str,
}

/// Errors raised while decoding a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Record is not valid UTF-8")]
    Encoding,
}

/// Decode and parse one raw serial record.
///
/// `Ok(None)` means a well-formed record for an unrecognized register (or a
/// fragment without a value token): dropped silently. `Err` means the record
/// failed character decoding: reported as malformed, then skipped. Neither
/// outcome may terminate the reader loop.
pub fn parse_line(raw: &[u8]) -> Result<Option<Frame<'_>>, FrameError> {
    let text = std::str::from_utf8(raw).map_err(|_| FrameError::Encoding)?;

    let mut tokens = text.split_whitespace();
    let Some(register) = tokens.next() else {
        return Ok(None);
    };
    let Some(value) = tokens.next() else {
        return Ok(None);
    };

    Ok(identity_for(register).map(|identity| Frame {
        register,
        identity,
        value,
    }))
}

/// Long-lived serial reader publishing decoded registers.
///
/// Opens the port once for its entire lifetime and blocks on input for
/// unbounded durations between frames; cancellation is external (the task is
/// aborted, dropping the handle and releasing the port).
pub struct TeleinfoReader {
    port: String,
    baud: u32,
    registry: Arc<EntityRegistry>,
}

impl TeleinfoReader {
    pub fn new(port: impl Into<String>, baud: u32, registry: Arc<EntityRegistry>) -> Self {
        Self {
            port: port.into(),
            baud,
            registry,
        }
    }

    /// Run the reader loop until the task is cancelled.
    ///
    /// An open failure disables the feed (logged); it never takes the
    /// process down.
    pub async fn run(self) {
        let builder = tokio_serial::new(&self.port, self.baud)
            .data_bits(tokio_serial::DataBits::Seven)
            .parity(tokio_serial::Parity::Even)
            .stop_bits(tokio_serial::StopBits::One);

        let stream = match tokio_serial::SerialStream::open(&builder) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(port = %self.port, error = %e, "Failed to open teleinfo port, feed disabled");
                return;
            }
        };

        tracing::info!(port = %self.port, baud = self.baud, "Teleinfo reader started");

        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    tracing::warn!(port = %self.port, "Teleinfo port reached EOF, feed stopped");
                    return;
                }
                Ok(_) => self.handle_record(&buf).await,
                Err(e) => {
                    tracing::warn!(error = %e, "Teleinfo read error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle_record(&self, raw: &[u8]) {
        match parse_line(raw) {
            Ok(Some(frame)) => {
                if let Err(e) = self
                    .registry
                    .publish_state(frame.identity, frame.value)
                    .await
                {
                    tracing::warn!(register = %frame.register, error = %e, "Failed to publish teleinfo value");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "Skipping malformed teleinfo record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_register() {
        let frame = parse_line(b"HCHC 012345678 !").unwrap().unwrap();
        assert_eq!(frame.register, "HCHC");
        assert_eq!(frame.identity, ident::TIC_HC);
        assert_eq!(frame.value, "012345678");
    }

    #[test]
    fn test_standard_mode_register_aliases_same_identity() {
        let historic = parse_line(b"HCHC 012345678").unwrap().unwrap();
        let standard = parse_line(b"EASF01 012345999").unwrap().unwrap();
        assert_eq!(historic.identity, standard.identity);
    }

    #[test]
    fn test_unknown_register_is_dropped_silently() {
        assert_eq!(parse_line(b"UNKNOWN_REG 5").unwrap(), None);
    }

    #[test]
    fn test_missing_value_token_is_dropped() {
        assert_eq!(parse_line(b"HCHC").unwrap(), None);
        assert_eq!(parse_line(b"").unwrap(), None);
        assert_eq!(parse_line(b"   \r\n").unwrap(), None);
    }

    #[test]
    fn test_undecodable_record_is_malformed() {
        assert_eq!(parse_line(&[0x48, 0xff, 0xfe, 0x20, 0x31]), Err(FrameError::Encoding));
    }

    #[test]
    fn test_value_forwarded_verbatim() {
        // Leading zeros and units are the meter's business, not ours.
        let frame = parse_line(b"PAPP 00450 *").unwrap().unwrap();
        assert_eq!(frame.value, "00450");
    }

    #[test]
    fn test_every_register_resolves() {
        for (name, identity) in REGISTERS {
            assert_eq!(identity_for(name), Some(*identity));
        }
        assert_eq!(identity_for("MOTDETAT"), None);
    }

    #[test]
    fn test_entities_cover_every_mapped_identity() {
        let entities = entities();
        for (_, identity) in REGISTERS {
            assert!(
                entities.iter().any(|e| e.identity() == *identity),
                "no entity for {}",
                identity
            );
        }
    }
}
