// src/supervisor.rs
//! Process supervision: start the acquisition loop and liveness endpoint,
//! stop both cooperatively on SIGINT/SIGTERM

use crate::{
    acquisition::{self, Acquisition, AcquisitionSettings},
    config::RelayConfig,
    error::Result,
    liveness::{LivenessHandle, LivenessService},
    shutdown::{self, Shutdown},
    sink::{FixSink, TelemetrySink},
};
use log::info;
use tokio::{io::AsyncRead, task::JoinHandle};

/// Open every resource, run until a termination signal arrives, then shut down
pub async fn run(config: RelayConfig) -> Result<()> {
    let serial = acquisition::open_serial(&config)?;
    let sink = TelemetrySink::from_config(&config)?;
    let liveness = LivenessService::bind(&config.listen_addr())?;

    info!(
        "Relaying fixes for {:?} to {} (log: {})",
        config.identity,
        config.collector_url,
        config.fix_log_path().display()
    );

    let supervisor = Supervisor::start(
        serial,
        sink,
        liveness,
        &config.identity,
        AcquisitionSettings::from_config(&config),
    );

    let signal = wait_for_termination().await?;
    info!("{} received, shutting down", signal);
    supervisor.shutdown().await
}

/// Handles to the two running units
pub struct Supervisor {
    shutdown: Shutdown,
    acquisition: JoinHandle<()>,
    liveness: LivenessHandle,
    listener: JoinHandle<usize>,
}

impl Supervisor {
    /// Spawn the acquisition loop as a task and the listener on a blocking thread
    pub fn start<R, S>(
        source: R,
        sink: S,
        liveness: LivenessService,
        identity: &str,
        settings: AcquisitionSettings,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        S: FixSink + Send + 'static,
    {
        let (shutdown, signal) = shutdown::channel();

        let acquisition = tokio::spawn(Acquisition::new(source, sink, identity, settings).run(signal));

        let liveness_handle = liveness.handle();
        let listener = tokio::task::spawn_blocking(move || liveness.serve());

        Self {
            shutdown,
            acquisition,
            liveness: liveness_handle,
            listener,
        }
    }

    /// Cancel the loop, wait for it to release the device, then stop the listener
    pub async fn shutdown(self) -> Result<()> {
        info!("Stopping acquisition loop");
        self.shutdown.trigger();
        self.acquisition.await?;

        info!("Stopping liveness endpoint");
        self.liveness.shutdown();
        self.listener.await?;

        info!("Shutdown complete");
        Ok(())
    }
}

/// Resolve with the name of the first termination signal received
#[cfg(unix)]
pub async fn wait_for_termination() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    };
    Ok(name)
}

#[cfg(not(unix))]
pub async fn wait_for_termination() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}
