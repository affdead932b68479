// src/sink.rs
//! Telemetry sink: durable fix log plus remote collector upload

use crate::{
    config::RelayConfig,
    error::{RelayError, Result},
    gps::Fix,
};
use log::{debug, error};
use reqwest::header::CONTENT_TYPE;
use std::{
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

/// File name of the durable fix log inside the log directory
pub const FIX_LOG_FILE: &str = "gps_data.log";

/// Outcome of one emission; each effect succeeds or fails on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkReport {
    pub logged: bool,
    pub published: bool,
}

/// Destination for fixes accepted by the update policy
pub trait FixSink {
    fn emit(&mut self, fix: &Fix) -> impl Future<Output = SinkReport> + Send;
}

/// Append-only JSON-lines log of emitted fixes
#[derive(Debug, Clone)]
pub struct FixLog {
    path: PathBuf,
}

impl FixLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one fix as a single line, opening the file for each write
    pub async fn append(&self, fix: &Fix) -> Result<()> {
        let mut line = fix.to_json_line()?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Posts fixes to the remote collector
#[derive(Debug, Clone)]
pub struct Publisher {
    client: reqwest::Client,
    url: String,
}

impl Publisher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gps-relay/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn publish(&self, fix: &Fix) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .json(fix)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RelayError::Connection(format!(
                "collector {} answered {}",
                self.url,
                response.status()
            )));
        }

        Ok(())
    }
}

/// Fans an accepted fix out to the log and the collector.
///
/// Neither effect is retried and a failure in one never skips the other.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    log: FixLog,
    publisher: Publisher,
}

impl TelemetrySink {
    pub fn new(log: FixLog, publisher: Publisher) -> Self {
        Self { log, publisher }
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let log = FixLog::new(config.fix_log_path());
        let publisher = Publisher::new(config.collector_url.clone(), config.publish_timeout())?;
        Ok(Self::new(log, publisher))
    }

    pub fn log(&self) -> &FixLog {
        &self.log
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }
}

impl FixSink for TelemetrySink {
    async fn emit(&mut self, fix: &Fix) -> SinkReport {
        let logged = match self.log.append(fix).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to append fix to {}: {}", self.log.path().display(), e);
                false
            }
        };

        let published = match self.publisher.publish(fix).await {
            Ok(()) => {
                debug!("Published fix to {}", self.publisher.url());
                true
            }
            Err(e) => {
                error!("Failed to publish fix: {}", e);
                false
            }
        };

        SinkReport { logged, published }
    }
}
