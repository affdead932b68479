// src/main.rs
//! GPS Relay - forwards serial NMEA fixes to a remote collector

use anyhow::Context;
use clap::Parser;
use gps_relay::{config::RelayConfig, supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RelayConfig::parse();
    config.validate().context("invalid configuration")?;

    log::info!("Starting GPS relay on device {}", config.device);
    supervisor::run(config).await.context("GPS relay failed")?;

    Ok(())
}
