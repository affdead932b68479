// src/config.rs
//! Startup configuration, from command line flags or the environment

use crate::error::{RelayError, Result};
use crate::sink::FIX_LOG_FILE;
use clap::Parser;
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_DEVICE: &str = "/dev/ttyNMEA1";

#[derive(Debug, Clone, Parser)]
#[command(name = "gps-relay", version, about = "Forward serial NMEA fixes to a remote collector")]
pub struct RelayConfig {
    /// Serial device the receiver is attached to
    #[arg(long, env = "gps1", default_value = DEFAULT_DEVICE)]
    pub device: String,

    /// Baud rate the device is opened with
    #[arg(long, env = "GPS_BAUD_RATE", default_value_t = 9600)]
    pub baud_rate: u32,

    /// Directory holding gps_data.log
    #[arg(long, env = "CAF_APP_LOG_DIR", default_value = ".")]
    pub log_dir: PathBuf,

    /// System identity stamped on every fix
    #[arg(long, env = "CAF_SYSTEM_NAME")]
    pub identity: String,

    /// Collector endpoint fixes are POSTed to
    #[arg(long, env = "GPS_COLLECTOR_URL")]
    pub collector_url: String,

    /// Liveness listener address
    #[arg(long, env = "GPS_RELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Liveness listener port
    #[arg(long, env = "GPS_RELAY_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Seconds between serial drains
    #[arg(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Serial port timeout in seconds, handed to the port when it is opened.
    /// Reads on the async stream never block on it; `--drain-idle-ms` and the
    /// poll interval bound how long a drain waits for input.
    #[arg(long, default_value_t = 5)]
    pub read_timeout_secs: u64,

    /// Collector request timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub publish_timeout_secs: u64,

    /// A drain ends once no complete line arrives within this many milliseconds
    #[arg(long, default_value_t = 250)]
    pub drain_idle_ms: u64,

    /// Keep the last quality sample across drains instead of resetting it
    #[arg(long)]
    pub retain_quality: bool,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(RelayError::Config(
                "system identity (CAF_SYSTEM_NAME) must not be empty".to_string(),
            ));
        }

        if !(self.collector_url.starts_with("http://") || self.collector_url.starts_with("https://")) {
            return Err(RelayError::Config(format!(
                "collector URL {:?} is not an http(s) URL",
                self.collector_url
            )));
        }

        if self.poll_interval_secs == 0 {
            return Err(RelayError::Config("poll interval must be at least one second".to_string()));
        }

        if self.device.trim().is_empty() {
            return Err(RelayError::Config("serial device path must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn fix_log_path(&self) -> PathBuf {
        self.log_dir.join(FIX_LOG_FILE)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn drain_idle(&self) -> Duration {
        Duration::from_millis(self.drain_idle_ms)
    }
}
