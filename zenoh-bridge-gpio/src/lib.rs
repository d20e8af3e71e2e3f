//! Zenoh bridge for board GPIO peripherals.
//!
//! Exposes a board's relay, RGB status LED channels, PMIC battery telemetry
//! and (optionally) a teleinfo utility-meter feed as remote-controllable or
//! read-only entities on a Zenoh network.
//!
//! Module map:
//! - [`config`] - bridge configuration (JSON5)
//! - [`actuator`] - physical outputs behind switch entities
//! - [`dispatch`] - inbound command dispatch
//! - [`power`] - PMIC probe, battery sampling and charge sense
//! - [`teleinfo`] - utility-meter frame parsing and serial reader
//! - [`bridge`] - the supervisor owning the whole lifecycle

pub mod actuator;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod power;
pub mod teleinfo;

/// Stable entity identities exposed by the bridge.
///
/// These are wire-visible: they appear in key expressions and discovery
/// payloads, so they must not change between releases.
pub mod ident {
    pub const RELAY1: &str = "RELAY1";
    pub const LED_R: &str = "LED_R";
    pub const LED_G: &str = "LED_G";
    pub const LED_B: &str = "LED_B";
    pub const BATTERY: &str = "ups";
    pub const CHARGING: &str = "battery_charging";

    pub const TIC_BASE: &str = "tic_base";
    pub const TIC_HC: &str = "tic_hc";
    pub const TIC_HP: &str = "tic_hp";
    pub const TIC_PAPP: &str = "tic_papp";
    pub const TIC_IINST: &str = "tic_iinst";
}
