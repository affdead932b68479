// src/acquisition.rs
//! Serial acquisition loop: drain, parse, correlate, filter, emit

use crate::{
    config::RelayConfig,
    error::{RelayError, Result},
    gps::{nmea, FixCorrelator},
    policy::EmissionState,
    shutdown::ShutdownSignal,
    sink::FixSink,
};
use chrono::Utc;
use log::{debug, info, warn};
use std::{io::ErrorKind, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    time::{sleep, timeout_at, Instant},
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Longest line kept while waiting for its newline. NMEA caps sentences at 82 bytes.
pub const MAX_LINE_LEN: usize = 128;

/// Open the receiver's serial device
pub fn open_serial(config: &RelayConfig) -> Result<SerialStream> {
    info!("Opening GPS receiver on {} at {} baud", config.device, config.baud_rate);

    tokio_serial::new(&config.device, config.baud_rate)
        .timeout(config.read_timeout())
        .open_native_async()
        .map_err(|e| {
            RelayError::Connection(format!("Failed to open serial port {}: {}", config.device, e))
        })
}

/// Timing and correlation knobs for the loop
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionSettings {
    pub poll_interval: Duration,
    pub drain_idle: Duration,
    pub retain_quality: bool,
}

impl AcquisitionSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            drain_idle: config.drain_idle(),
            retain_quality: config.retain_quality,
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            drain_idle: Duration::from_millis(250),
            retain_quality: false,
        }
    }
}

/// Counters for one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationStats {
    pub lines: usize,
    pub malformed: usize,
    pub fixes: usize,
    pub emitted: usize,
    pub suppressed: usize,
    pub read_errors: usize,
}

/// Owns the input stream and all per-loop state. The stream is dropped exactly
/// once, when [`Acquisition::run`] returns.
pub struct Acquisition<R, S> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    correlator: FixCorrelator,
    emission: EmissionState,
    sink: S,
    settings: AcquisitionSettings,
}

impl<R, S> Acquisition<R, S>
where
    R: AsyncRead + Unpin,
    S: FixSink,
{
    pub fn new(source: R, sink: S, identity: &str, settings: AcquisitionSettings) -> Self {
        Self {
            reader: BufReader::new(source),
            pending: Vec::new(),
            correlator: FixCorrelator::new(identity),
            emission: EmissionState::new(),
            sink,
            settings,
        }
    }

    pub fn emission_state(&self) -> &EmissionState {
        &self.emission
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Loop until `shutdown` fires, sleeping `poll_interval` between drains
    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        info!("Acquisition loop started");
        let mut total = IterationStats::default();

        while !shutdown.is_cancelled() {
            let stats = self.run_iteration().await;
            debug!("Drain finished: {:?}", stats);
            total.lines += stats.lines;
            total.emitted += stats.emitted;

            tokio::select! {
                _ = sleep(self.settings.poll_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!(
            "Acquisition loop stopped after {} lines, {} fixes emitted; releasing device",
            total.lines, total.emitted
        );
    }

    /// Read everything currently buffered and push it through the pipeline.
    /// A drain never runs longer than `poll_interval`, however fast lines arrive.
    pub async fn run_iteration(&mut self) -> IterationStats {
        if !self.settings.retain_quality {
            self.correlator.reset();
        }
        self.emission.restart_counter();

        let deadline = Instant::now() + self.settings.poll_interval;
        let mut stats = IterationStats::default();
        while let Some(line) = self.next_line(deadline, &mut stats).await {
            stats.lines += 1;

            let sentence = match nmea::parse(&line) {
                Ok(sentence) => sentence,
                Err(e) => {
                    stats.malformed += 1;
                    debug!("Skipping line: {}", e);
                    continue;
                }
            };

            let Some(fix) = self.correlator.observe(&sentence, Utc::now()) else {
                continue;
            };
            stats.fixes += 1;

            if self.emission.should_emit(&fix) {
                let report = self.sink.emit(&fix).await;
                info!(
                    "Fix {:.6},{:.6} {} {} sats={} quality={} (logged={}, published={})",
                    fix.latitude,
                    fix.longitude,
                    fix.format_speed(),
                    fix.format_bearing(),
                    fix.satellites,
                    fix.fix_quality.description(),
                    report.logged,
                    report.published
                );
                self.emission.record_emission(fix);
                stats.emitted += 1;
            } else {
                self.emission
                    .record_suppression(self.settings.poll_interval.as_secs());
                stats.suppressed += 1;
            }
        }

        stats
    }

    /// Next complete line, or `None` once nothing arrives within `drain_idle`,
    /// the drain deadline passes, the stream ends or the read fails.
    /// A partial line stays in `pending` and is finished by a later call.
    async fn next_line(&mut self, deadline: Instant, stats: &mut IterationStats) -> Option<Vec<u8>> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!("Drain deadline reached");
                return None;
            }

            let room = (MAX_LINE_LEN - self.pending.len()) as u64;
            let mut limited = (&mut self.reader).take(room);
            let read = timeout_at(
                (now + self.settings.drain_idle).min(deadline),
                limited.read_until(b'\n', &mut self.pending),
            )
            .await;

            match read {
                Err(_) => return None,
                Ok(Ok(_)) if self.pending.ends_with(b"\n") => {
                    return Some(std::mem::take(&mut self.pending));
                }
                Ok(Ok(_)) if self.pending.len() >= MAX_LINE_LEN => {
                    debug!("Discarding {} bytes without a line ending", self.pending.len());
                    self.pending.clear();
                    stats.lines += 1;
                    stats.malformed += 1;
                }
                // End of stream, possibly after an unterminated final line
                Ok(Ok(_)) if self.pending.is_empty() => return None,
                Ok(Ok(_)) => return Some(std::mem::take(&mut self.pending)),
                Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => return None,
                Ok(Err(e)) => {
                    warn!("Error reading from serial port: {}", e);
                    stats.read_errors += 1;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gps::{nmea::tests::with_checksum, Fix},
        shutdown,
        sink::SinkReport,
    };
    use std::{
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        task::{Context, Poll},
    };
    use tokio::{
        io::{AsyncWriteExt, DuplexStream, ReadBuf},
        time::timeout,
    };

    #[derive(Clone, Default)]
    struct RecordingSink {
        fixes: Arc<Mutex<Vec<Fix>>>,
    }

    impl RecordingSink {
        fn emitted(&self) -> Vec<Fix> {
            self.fixes.lock().unwrap().clone()
        }
    }

    impl FixSink for RecordingSink {
        async fn emit(&mut self, fix: &Fix) -> SinkReport {
            self.fixes.lock().unwrap().push(fix.clone());
            SinkReport {
                logged: true,
                published: true,
            }
        }
    }

    /// Counts how many times the wrapped stream is dropped
    struct CountingReader {
        inner: DuplexStream,
        drops: Arc<AtomicUsize>,
    }

    impl AsyncRead for CountingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl Drop for CountingReader {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Fails the first read, then behaves like the wrapped stream
    struct FlakyReader {
        inner: DuplexStream,
        failed: bool,
    }

    impl AsyncRead for FlakyReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if !self.failed {
                self.failed = true;
                return Poll::Ready(Err(std::io::Error::new(ErrorKind::Other, "framing error")));
            }
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    /// Write a quality + position burst every 200 ms until the reader goes away
    fn stream_bursts(mut tx: DuplexStream) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let burst = gga(8) + &rmc("4807.038");
            while tx.write_all(burst.as_bytes()).await.is_ok() {
                sleep(Duration::from_millis(200)).await;
            }
        })
    }

    fn gga(satellites: u32) -> String {
        with_checksum(&format!(
            "$GPGGA,123519,4807.038,N,01131.000,E,1,{:02},0.9,545.4,M,46.9,M,,",
            satellites
        )) + "\r\n"
    }

    fn rmc(latitude: &str) -> String {
        with_checksum(&format!(
            "$GPRMC,123519,A,{},N,01131.000,E,022.4,084.4,230394,003.1,W",
            latitude
        )) + "\r\n"
    }

    fn void_rmc() -> String {
        with_checksum("$GPRMC,123519,V,,,,,,,230394,,") + "\r\n"
    }

    fn acquisition(
        source: DuplexStream,
        settings: AcquisitionSettings,
    ) -> (Acquisition<DuplexStream, RecordingSink>, RecordingSink) {
        let sink = RecordingSink::default();
        (Acquisition::new(source, sink.clone(), "unit-1", settings), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_quality_then_position_emits() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (mut acq, sink) = acquisition(rx, AcquisitionSettings::default());

        tx.write_all((gga(8) + &rmc("4807.038")).as_bytes()).await.unwrap();
        let stats = acq.run_iteration().await;

        assert_eq!(stats.lines, 2);
        assert_eq!(stats.emitted, 1);
        let emitted = sink.emitted();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].satellites, 8);
        assert_eq!(emitted[0].identity, "unit-1");
        assert!((emitted[0].latitude - 48.1173).abs() < 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_before_quality_is_dropped() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (mut acq, sink) = acquisition(rx, AcquisitionSettings::default());

        tx.write_all((rmc("4807.038") + &void_rmc() + &gga(8) + &void_rmc()).as_bytes())
            .await
            .unwrap();
        let stats = acq.run_iteration().await;

        assert_eq!(stats.lines, 4);
        assert_eq!(stats.fixes, 0);
        assert!(sink.emitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_fixes_suppressed_within_drain() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (mut acq, sink) = acquisition(rx, AcquisitionSettings::default());

        let burst = gga(8) + &rmc("4807.038") + &rmc("4807.038") + &rmc("4807.038");
        tx.write_all(burst.as_bytes()).await.unwrap();
        let stats = acq.run_iteration().await;

        assert_eq!(stats.fixes, 3);
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.suppressed, 2);
        assert_eq!(sink.emitted().len(), 1);
        assert_eq!(acq.emission_state().seconds_since_last_emission(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_moved_position_emits_again() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (mut acq, sink) = acquisition(rx, AcquisitionSettings::default());

        let burst = gga(8) + &rmc("4807.038") + &rmc("4807.100");
        tx.write_all(burst.as_bytes()).await.unwrap();
        acq.run_iteration().await;

        assert_eq!(sink.emitted().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_restarts_each_drain() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (mut acq, sink) = acquisition(rx, AcquisitionSettings::default());

        tx.write_all((gga(8) + &rmc("4807.038")).as_bytes()).await.unwrap();
        acq.run_iteration().await;
        tx.write_all((gga(8) + &rmc("4807.038")).as_bytes()).await.unwrap();
        let stats = acq.run_iteration().await;

        // The first fix of every drain sees the counter past the freshness window
        assert_eq!(stats.emitted, 1);
        assert_eq!(sink.emitted().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_lines_do_not_stop_drain() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (mut acq, sink) = acquisition(rx, AcquisitionSettings::default());

        tx.write_all(gga(8).as_bytes()).await.unwrap();
        tx.write_all(&[0xff, 0xfe, b'$', b'\n']).await.unwrap();
        tx.write_all(b"$GPRMC,123519,A,4807\r\n").await.unwrap();
        tx.write_all(b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*00\r\n")
            .await
            .unwrap();
        tx.write_all(rmc("4807.038").as_bytes()).await.unwrap();
        let stats = acq.run_iteration().await;

        assert_eq!(stats.lines, 5);
        assert_eq!(stats.malformed, 3);
        assert_eq!(stats.emitted, 1);
        assert_eq!(sink.emitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quality_lost_across_drains() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (mut acq, sink) = acquisition(rx, AcquisitionSettings::default());

        tx.write_all(gga(8).as_bytes()).await.unwrap();
        acq.run_iteration().await;
        tx.write_all(rmc("4807.038").as_bytes()).await.unwrap();
        let stats = acq.run_iteration().await;

        assert_eq!(stats.lines, 1);
        assert_eq!(stats.fixes, 0);
        assert!(sink.emitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retained_quality_survives_drains() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let settings = AcquisitionSettings {
            retain_quality: true,
            ..AcquisitionSettings::default()
        };
        let (mut acq, sink) = acquisition(rx, settings);

        tx.write_all(gga(8).as_bytes()).await.unwrap();
        acq.run_iteration().await;
        tx.write_all(rmc("4807.038").as_bytes()).await.unwrap();
        let stats = acq.run_iteration().await;

        assert_eq!(stats.emitted, 1);
        assert_eq!(sink.emitted()[0].satellites, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_line_completed_next_drain() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (mut acq, sink) = acquisition(rx, AcquisitionSettings::default());

        let quality = gga(8);
        let (head, tail) = quality.split_at(20);
        tx.write_all(head.as_bytes()).await.unwrap();
        let stats = acq.run_iteration().await;
        assert_eq!(stats.lines, 0);

        tx.write_all((tail.to_string() + &rmc("4807.038")).as_bytes())
            .await
            .unwrap();
        let stats = acq.run_iteration().await;

        assert_eq!(stats.lines, 2);
        assert_eq!(stats.malformed, 0);
        assert_eq!(sink.emitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_ends_drain() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (mut acq, sink) = acquisition(rx, AcquisitionSettings::default());

        tx.write_all((gga(8) + &rmc("4807.038")).as_bytes()).await.unwrap();
        drop(tx);

        assert_eq!(acq.run_iteration().await.emitted, 1);
        assert_eq!(acq.run_iteration().await, IterationStats::default());
        assert_eq!(sink.emitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_releases_device_once() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let drops = Arc::new(AtomicUsize::new(0));
        let reader = CountingReader {
            inner: rx,
            drops: Arc::clone(&drops),
        };
        let sink = RecordingSink::default();
        let settings = AcquisitionSettings::default();
        let acq = Acquisition::new(reader, sink.clone(), "unit-1", settings);

        let (trigger, signal) = shutdown::channel();
        let handle = tokio::spawn(acq.run(signal));

        tx.write_all((gga(8) + &rmc("4807.038")).as_bytes()).await.unwrap();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.emitted().len(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        trigger.trigger();
        timeout(settings.poll_interval, handle).await.unwrap().unwrap();

        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let (_tx, rx) = tokio::io::duplex(64);
        let (acq, sink) = acquisition(rx, AcquisitionSettings::default());
        let (trigger, signal) = shutdown::channel();
        trigger.trigger();

        timeout(Duration::from_secs(1), acq.run(signal)).await.unwrap();
        assert!(sink.emitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_ends_drain_and_loop_recovers() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let reader = FlakyReader {
            inner: rx,
            failed: false,
        };
        let sink = RecordingSink::default();
        let mut acq = Acquisition::new(reader, sink.clone(), "unit-1", AcquisitionSettings::default());

        tx.write_all((gga(8) + &rmc("4807.038")).as_bytes()).await.unwrap();
        let stats = acq.run_iteration().await;
        assert_eq!(stats.read_errors, 1);
        assert_eq!(stats.lines, 0);
        assert!(sink.emitted().is_empty());

        let stats = acq.run_iteration().await;
        assert_eq!(stats.read_errors, 0);
        assert_eq!(stats.emitted, 1);
        assert_eq!(sink.emitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_stream_drain_is_bounded() {
        let (tx, rx) = tokio::io::duplex(4096);
        let settings = AcquisitionSettings::default();
        let (mut acq, sink) = acquisition(rx, settings);
        let writer = stream_bursts(tx);

        let started = Instant::now();
        let stats = acq.run_iteration().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= settings.poll_interval);
        assert!(elapsed < settings.poll_interval + settings.drain_idle);
        assert!(stats.fixes > 1);
        assert_eq!(sink.emitted().len(), 1);

        drop(acq);
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_observed_during_continuous_stream() {
        let (tx, rx) = tokio::io::duplex(4096);
        let settings = AcquisitionSettings::default();
        let (acq, sink) = acquisition(rx, settings);
        let writer = stream_bursts(tx);

        let (trigger, signal) = shutdown::channel();
        let handle = tokio::spawn(acq.run(signal));

        sleep(Duration::from_secs(2)).await;
        trigger.trigger();
        timeout(settings.poll_interval * 2, handle).await.unwrap().unwrap();

        assert!(!sink.emitted().is_empty());
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unterminated_noise_is_bounded() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (mut acq, sink) = acquisition(rx, AcquisitionSettings::default());

        tx.write_all(&[b'x'; 1000]).await.unwrap();
        let stats = acq.run_iteration().await;
        assert_eq!(stats.malformed, 1000 / MAX_LINE_LEN);
        assert!(acq.pending.len() < MAX_LINE_LEN);

        tx.write_all((String::from("\n") + &gga(8) + &rmc("4807.038")).as_bytes())
            .await
            .unwrap();
        let stats = acq.run_iteration().await;
        assert_eq!(stats.emitted, 1);
        assert_eq!(sink.emitted().len(), 1);
    }
}
