//! Configuration for the GPIO bridge.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gpioha_common::config::{LoggingConfig, ZenohConfig};

use crate::power::SamplerMode;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioBridgeConfig {
    /// Zenoh connection settings.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Bridge and peripheral settings.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bridge-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Key expression prefix (default: "gpioha").
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Human-readable name of the device grouping the entities.
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Stable identifier of the device grouping.
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Telemetry poll interval in seconds (default: 30).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Relay output line.
    #[serde(default)]
    pub relay: RelayConfig,

    /// RGB status LED channels.
    #[serde(default)]
    pub leds: LedsConfig,

    /// Battery/PMIC sampling.
    #[serde(default)]
    pub battery: BatteryConfig,

    /// Charger-presence sense line.
    #[serde(default)]
    pub charge: ChargeConfig,

    /// Teleinfo utility-meter feed.
    #[serde(default)]
    pub teleinfo: TeleinfoConfig,
}

fn default_key_prefix() -> String {
    "gpioha".to_string()
}

fn default_device_name() -> String {
    "MAPIO GPIO".to_string()
}

fn default_device_id() -> String {
    "mapio-gpio".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            device_name: default_device_name(),
            device_id: default_device_id(),
            poll_interval_secs: default_poll_interval(),
            relay: RelayConfig::default(),
            leds: LedsConfig::default(),
            battery: BatteryConfig::default(),
            charge: ChargeConfig::default(),
            teleinfo: TeleinfoConfig::default(),
        }
    }
}

/// Relay output line configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// GPIO character device of the controller.
    #[serde(default = "default_relay_chip")]
    pub chip: String,

    /// Line offset on the controller.
    #[serde(default = "default_relay_line")]
    pub line: u32,
}

fn default_relay_chip() -> String {
    "/dev/gpiochip0".to_string()
}

fn default_relay_line() -> u32 {
    25
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chip: default_relay_chip(),
            line: default_relay_line(),
        }
    }
}

/// RGB LED channel configuration.
///
/// Each channel is a write-only sysfs brightness file; no read-back is
/// performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedsConfig {
    /// Expose the LED channels as switch entities.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_led_red")]
    pub red: PathBuf,

    #[serde(default = "default_led_green")]
    pub green: PathBuf,

    #[serde(default = "default_led_blue")]
    pub blue: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_led_red() -> PathBuf {
    PathBuf::from("/sys/class/leds/LED2_R/brightness")
}

fn default_led_green() -> PathBuf {
    PathBuf::from("/sys/class/leds/LED2_G/brightness")
}

fn default_led_blue() -> PathBuf {
    PathBuf::from("/sys/class/leds/LED2_B/brightness")
}

impl Default for LedsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            red: default_led_red(),
            green: default_led_green(),
            blue: default_led_blue(),
        }
    }
}

/// Battery/PMIC sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// External probe command reading a PMIC register; the register address
    /// is appended as the final argument.
    #[serde(default = "default_probe_command")]
    pub probe_command: Vec<String>,

    /// Probe invocation timeout in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Publish the discrete percentage scale ("percent", default) or the
    /// scaled voltage itself ("voltage").
    #[serde(default)]
    pub mode: SamplerMode,
}

fn default_probe_command() -> Vec<String> {
    vec!["vcgencmd".to_string(), "pmicrd".to_string()]
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            probe_command: default_probe_command(),
            probe_timeout_ms: default_probe_timeout_ms(),
            mode: SamplerMode::default(),
        }
    }
}

/// Charger-presence (AC-OK) sense line configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeConfig {
    /// GPIO character device of the controller.
    #[serde(default = "default_charge_chip")]
    pub chip: String,

    /// Line offset on the controller. The line is active low.
    #[serde(default = "default_charge_line")]
    pub line: u32,
}

fn default_charge_chip() -> String {
    "/dev/gpiochip2".to_string()
}

fn default_charge_line() -> u32 {
    9
}

impl Default for ChargeConfig {
    fn default() -> Self {
        Self {
            chip: default_charge_chip(),
            line: default_charge_line(),
        }
    }
}

/// Teleinfo feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeleinfoConfig {
    /// Marker file whose presence at startup enables the feed.
    #[serde(default = "default_enable_marker")]
    pub enable_marker: PathBuf,

    /// Serial device the meter is attached to.
    #[serde(default = "default_teleinfo_port")]
    pub port: String,

    /// Baud rate. The meter framing is fixed at 7 data bits, even parity,
    /// 1 stop bit.
    #[serde(default = "default_teleinfo_baud")]
    pub baud: u32,
}

fn default_enable_marker() -> PathBuf {
    PathBuf::from("/usr/local/homeassistant/enable_teleinfo")
}

fn default_teleinfo_port() -> String {
    "/dev/ttyAMA0".to_string()
}

fn default_teleinfo_baud() -> u32 {
    1200
}

impl Default for TeleinfoConfig {
    fn default() -> Self {
        Self {
            enable_marker: default_enable_marker(),
            port: default_teleinfo_port(),
            baud: default_teleinfo_baud(),
        }
    }
}

impl TeleinfoConfig {
    /// The feed is selected once at startup by the marker file's presence;
    /// there is no runtime toggling.
    pub fn enabled(&self) -> bool {
        self.enable_marker.exists()
    }
}

impl GpioBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: GpioBridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bridge = &self.bridge;

        if bridge.key_prefix.is_empty() || bridge.key_prefix.ends_with('/') {
            return Err(ConfigError::Validation(
                "key_prefix must be non-empty and must not end with '/'".to_string(),
            ));
        }

        if bridge.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }

        if bridge.battery.probe_command.is_empty() {
            return Err(ConfigError::Validation(
                "battery.probe_command must name a program".to_string(),
            ));
        }

        if bridge.teleinfo.baud == 0 {
            return Err(ConfigError::Validation(
                "teleinfo.baud must be > 0".to_string(),
            ));
        }

        if bridge.leds.enabled {
            for (name, path) in [
                ("red", &bridge.leds.red),
                ("green", &bridge.leds.green),
                ("blue", &bridge.leds.blue),
            ] {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "leds.{} path must not be empty when LEDs are enabled",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let json = r#"{
            zenoh: { mode: "client", connect: ["tcp/localhost:7447"] },
        }"#;

        let config: GpioBridgeConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.bridge.key_prefix, "gpioha");
        assert_eq!(config.bridge.poll_interval_secs, 30);
        assert_eq!(config.bridge.relay.chip, "/dev/gpiochip0");
        assert_eq!(config.bridge.relay.line, 25);
        assert!(config.bridge.leds.enabled);
        assert_eq!(
            config.bridge.battery.probe_command,
            vec!["vcgencmd", "pmicrd"]
        );
        assert_eq!(config.bridge.battery.mode, SamplerMode::Percent);
        assert_eq!(config.bridge.teleinfo.baud, 1200);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            zenoh: { mode: "peer" },
            bridge: {
                key_prefix: "home/gpio",
                device_name: "Board",
                device_id: "board-01",
                poll_interval_secs: 10,
                relay: { chip: "/dev/gpiochip1", line: 4 },
                leds: { enabled: false },
                battery: {
                    probe_command: ["pmic-tool", "read"],
                    probe_timeout_ms: 500,
                    mode: "voltage",
                },
                charge: { chip: "/dev/gpiochip0", line: 12 },
                teleinfo: {
                    enable_marker: "/etc/gpioha/enable_teleinfo",
                    port: "/dev/ttyUSB0",
                },
            },
            logging: { level: "debug" },
        }"#;

        let config: GpioBridgeConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.bridge.key_prefix, "home/gpio");
        assert_eq!(config.bridge.poll_interval_secs, 10);
        assert_eq!(config.bridge.relay.line, 4);
        assert!(!config.bridge.leds.enabled);
        assert_eq!(config.bridge.battery.mode, SamplerMode::Voltage);
        assert_eq!(config.bridge.charge.line, 12);
        assert_eq!(config.bridge.teleinfo.port, "/dev/ttyUSB0");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validate_zero_interval() {
        let json = r#"{ bridge: { poll_interval_secs: 0 } }"#;
        let config: GpioBridgeConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_probe_command() {
        let json = r#"{ bridge: { battery: { probe_command: [] } } }"#;
        let config: GpioBridgeConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_prefix() {
        let json = r#"{ bridge: { key_prefix: "gpioha/" } }"#;
        let config: GpioBridgeConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_teleinfo_enabled_by_marker() {
        let marker = std::env::temp_dir().join(format!(
            "gpioha_marker_{}",
            std::process::id()
        ));

        let config = TeleinfoConfig {
            enable_marker: marker.clone(),
            ..TeleinfoConfig::default()
        };
        assert!(!config.enabled());

        std::fs::write(&marker, b"").unwrap();
        assert!(config.enabled());
        std::fs::remove_file(&marker).unwrap();
    }
}
