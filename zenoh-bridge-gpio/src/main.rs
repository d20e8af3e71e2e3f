//! Zenoh bridge for board GPIO peripherals.
//!
//! Exposes the board's relay, RGB LED channels, battery telemetry and
//! optional teleinfo meter feed as Zenoh entities.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use gpioha_common::config::LoggingConfig;
use zenoh_bridge_gpio::bridge::GpioBridge;
use zenoh_bridge_gpio::config::GpioBridgeConfig;

/// Zenoh bridge for board GPIO peripherals.
#[derive(Parser, Debug)]
#[command(name = "zenoh-bridge-gpio")]
#[command(about = "Exposes board peripherals to Zenoh as remote-controllable entities")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "gpio.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = GpioBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    gpioha_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    tracing::info!("Starting zenoh-bridge-gpio");

    let bridge = GpioBridge::start(config)
        .await
        .context("Failed to start bridge")?;

    bridge.run().await.map_err(|e| anyhow::anyhow!("{}", e))
}
