//! The scanner's single polling task.
//!
//! Each iteration waits at most one poll interval for a capture line, then
//! sweeps the registry for departures whether or not a line arrived, then
//! pushes the line (if any) through assembler, decoder and registry. The
//! registry is owned by the loop, so no locking is involved.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::assembler::PacketAssembler;
use crate::capture::{CaptureError, CaptureSource};
use crate::clock::{Clock, SystemClock};
use crate::config::ScannerConfig;
use crate::decoder::{decode, parse_hex_frame};
use crate::distance;
use crate::error::{PalmbeachError, Result};
use crate::feedback::{Feedback, SilentFeedback, SoundFeedback};
use crate::notifier::{CollectorClient, CollectorNotifier, Notifier};
use crate::registry::{PresenceEvent, PresenceRegistry};
use crate::types::{BeaconReading, Decoded};

/// Per-reading filtering and loop cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Readings with a larger signal strength (weaker signal) are ignored.
    pub sensitivity: u16,

    /// Reference power for logged distance estimates.
    pub reference_power: u16,

    /// Longest wait for a capture line before sweeping anyway.
    pub poll_interval: Duration,

    /// Log every frame and reading at `info`.
    pub verbose: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

impl From<&ScannerConfig> for ScanSettings {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            sensitivity: config.sensitivity,
            reference_power: config.reference_power,
            poll_interval: config.poll_interval(),
            verbose: config.verbose,
        }
    }
}

/// Counters kept by a running loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Capture lines consumed.
    pub lines: u64,
    /// Frames completed by the assembler.
    pub frames: u64,
    /// Frames that decoded to a trackable reading.
    pub readings: u64,
    /// Readings passed to the registry.
    pub registered: u64,
    /// Readings dropped by the sensitivity filter.
    pub filtered: u64,
    /// Frames classified as an untracked beacon kind.
    pub classified: u64,
    /// Frames that were not beacons.
    pub rejected: u64,
    /// Frames that failed to parse or decode.
    pub decode_errors: u64,
    /// Appear events emitted.
    pub appeared: u64,
    /// Disappear events emitted.
    pub disappeared: u64,
    /// Liveness pings emitted.
    pub pings: u64,
}

/// Drives capture → assembler → decoder → registry → notifier.
pub struct ScanLoop<C> {
    capture: C,
    assembler: PacketAssembler,
    registry: PresenceRegistry,
    settings: ScanSettings,
    notifier: Arc<dyn Notifier>,
    feedback: Arc<dyn Feedback>,
    clock: Arc<dyn Clock>,
    stats: ScanStats,
}

impl<C: CaptureSource> ScanLoop<C> {
    /// Creates a loop that reports nowhere, plays nothing and uses the
    /// system clock.
    pub fn new(capture: C, registry: PresenceRegistry, settings: ScanSettings) -> Self {
        Self {
            capture,
            assembler: PacketAssembler::new(),
            registry,
            settings,
            notifier: Arc::new(CollectorNotifier::disabled()),
            feedback: Arc::new(SilentFeedback),
            clock: Arc::new(SystemClock),
            stats: ScanStats::default(),
        }
    }

    /// Builds a fully wired loop from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the collector client cannot be created.
    pub fn from_config(capture: C, config: &ScannerConfig) -> Result<Self> {
        let client = config
            .collector_url
            .clone()
            .map(|url| CollectorClient::new(url, config.room.clone(), config.notify_timeout()))
            .transpose()?;
        if client.is_none() {
            info!("No collector configured, events are logged only");
        }

        let feedback: Arc<dyn Feedback> =
            if config.appear_sound.is_some() || config.disappear_sound.is_some() {
                Arc::new(SoundFeedback::new(
                    config.appear_sound.clone(),
                    config.disappear_sound.clone(),
                ))
            } else {
                Arc::new(SilentFeedback)
            };

        Ok(Self::new(
            capture,
            PresenceRegistry::new(config.presence_settings()),
            ScanSettings::from(config),
        )
        .with_notifier(Arc::new(CollectorNotifier::new(client)))
        .with_feedback(feedback))
    }

    /// Replaces the notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replaces the feedback hook.
    #[must_use]
    pub fn with_feedback(mut self, feedback: Arc<dyn Feedback>) -> Self {
        self.feedback = feedback;
        self
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The registry owned by this loop.
    pub const fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// Counters so far.
    pub const fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Runs until `shutdown` completes or the capture source ends or fails.
    ///
    /// The capture source is shut down before this returns, on every path.
    ///
    /// # Errors
    ///
    /// Returns a capture error if the stream fails or closes. Nothing else
    /// stops the loop.
    pub async fn run<S>(mut self, shutdown: S) -> Result<ScanStats>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            sensitivity = self.settings.sensitivity,
            timeout_in = self.registry.settings().timeout_in,
            timeout_out_secs = self.registry.settings().timeout_out.num_seconds(),
            "Scan loop started"
        );

        let outcome = loop {
            let polled = tokio::select! {
                biased;
                () = &mut shutdown => None,
                polled = timeout(self.settings.poll_interval, self.capture.next_line()) => Some(polled),
            };
            let Some(polled) = polled else {
                info!("Shutdown requested");
                break Ok(());
            };

            let now = self.clock.now();
            self.sweep(now);

            match polled {
                Err(_elapsed) => {}
                Ok(Ok(Some(line))) => self.process_line(&line, now),
                Ok(Ok(None)) => break Err(CaptureError::Closed),
                Ok(Err(e)) => break Err(e),
            }
        };

        if let Err(e) = self.capture.shutdown().await {
            warn!(error = %e, "Capture did not shut down cleanly");
        }
        info!(stats = ?self.stats, "Scan loop stopped");

        outcome.map(|()| self.stats).map_err(PalmbeachError::from)
    }

    /// Runs the registry's departure sweep and dispatches its events.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        for event in self.registry.cleanup(now) {
            self.emit(&event);
        }
    }

    /// Feeds one capture line through the pipeline.
    pub fn process_line(&mut self, line: &str, now: DateTime<Utc>) {
        self.stats.lines += 1;
        if let Some(frame) = self.assembler.feed(line) {
            self.handle_frame(&frame, now);
        }
    }

    fn handle_frame(&mut self, frame: &str, now: DateTime<Utc>) {
        self.stats.frames += 1;
        if self.settings.verbose {
            info!(frame, "Frame");
        } else {
            trace!(frame, "Frame");
        }

        let decoded = parse_hex_frame(frame).and_then(|bytes| decode(&bytes));
        match decoded {
            Ok(Decoded::Reading(reading)) => self.handle_reading(&reading, now),
            Ok(Decoded::Classified(kind)) => {
                self.stats.classified += 1;
                debug!(%kind, "Untracked beacon frame");
            }
            Ok(Decoded::NotABeacon) => self.stats.rejected += 1,
            Err(e) => {
                self.stats.decode_errors += 1;
                debug!(error = %e, "Dropping malformed frame");
            }
        }
    }

    fn handle_reading(&mut self, reading: &BeaconReading, now: DateTime<Utc>) {
        self.stats.readings += 1;
        if reading.signal_strength > self.settings.sensitivity {
            self.stats.filtered += 1;
            trace!(
                identifier = %reading.identifier,
                signal_strength = reading.signal_strength,
                "Reading beyond sensitivity"
            );
            return;
        }

        self.stats.registered += 1;
        let event = self
            .registry
            .register(&reading.identifier, reading.signal_strength, now);
        self.log_reading(reading);

        if let Some(event) = event {
            self.emit(&event);
        }
    }

    fn log_reading(&self, reading: &BeaconReading) {
        let distance_m =
            match distance::estimate(reading.signal_strength, self.settings.reference_power) {
                Ok(d) => Some(d),
                Err(e) => {
                    debug!(identifier = %reading.identifier, error = %e, "No distance estimate");
                    None
                }
            };
        let mean_distance_m = self
            .registry
            .get(&reading.identifier)
            .and_then(|record| record.mean_signal())
            .and_then(|mean| distance::estimate_mean(mean, self.settings.reference_power).ok());

        if self.settings.verbose {
            info!(
                kind = %reading.kind,
                identifier = %reading.identifier,
                signal_strength = reading.signal_strength,
                distance_m,
                mean_distance_m,
                "Reading"
            );
        } else {
            debug!(
                kind = %reading.kind,
                identifier = %reading.identifier,
                signal_strength = reading.signal_strength,
                distance_m,
                mean_distance_m,
                "Reading"
            );
        }
    }

    fn emit(&mut self, event: &PresenceEvent) {
        match event {
            PresenceEvent::Appeared(record) => {
                self.stats.appeared += 1;
                self.feedback.on_appear(&record.identifier);
            }
            PresenceEvent::Disappeared(record) => {
                self.stats.disappeared += 1;
                self.feedback.on_disappear(&record.identifier);
            }
            PresenceEvent::Ping => {
                self.stats.pings += 1;
                info!(active = self.registry.active().count(), "Ping");
            }
        }
        self.notifier.dispatch(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use chrono::TimeZone;
    use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};
    use tokio::sync::Notify;

    use crate::capture::LineCapture;
    use crate::clock::ManualClock;
    use crate::decoder::tests::ibeacon_frame;
    use crate::registry::{PresenceSettings, RecordSnapshot};

    const UUID: [u8; 16] = [0xAA; 16];
    const ID: &str = "ibeacon-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn frame_line(calibration: u8) -> String {
        let hex: Vec<String> = ibeacon_frame(&UUID, calibration)
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect();
        format!("> {}", hex.join(" "))
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        disappeared: Notify,
    }

    impl Recorder {
        fn count(&self, name: &str) -> usize {
            self.events.lock().unwrap().iter().filter(|e| *e == name).count()
        }
    }

    impl Notifier for Recorder {
        fn notify_appear(&self, record: &RecordSnapshot) {
            assert!(record.active);
            self.events.lock().unwrap().push("appear".into());
        }
        fn notify_disappear(&self, record: &RecordSnapshot) {
            assert!(!record.active);
            self.events.lock().unwrap().push("disappear".into());
            self.disappeared.notify_one();
        }
        fn notify_ping(&self) {
            self.events.lock().unwrap().push("ping".into());
        }
    }

    /// Advances by a fixed step every time it is read.
    struct SteppingClock {
        inner: ManualClock,
        step: chrono::Duration,
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let now = self.inner.now();
            self.inner.advance(self.step);
            now
        }
    }

    /// Line capture that records whether it was shut down.
    struct TrackedCapture {
        inner: LineCapture<BufReader<DuplexStream>>,
        shut_down: Arc<AtomicBool>,
    }

    impl CaptureSource for TrackedCapture {
        async fn next_line(&mut self) -> crate::capture::CaptureResult<Option<String>> {
            self.inner.next_line().await
        }

        async fn shutdown(&mut self) -> crate::capture::CaptureResult<()> {
            self.shut_down.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn settings() -> ScanSettings {
        ScanSettings {
            sensitivity: 100,
            reference_power: 65,
            poll_interval: Duration::from_millis(20),
            verbose: false,
        }
    }

    fn scan_loop<C: CaptureSource>(capture: C, timeout_in: u32) -> ScanLoop<C> {
        ScanLoop::new(
            capture,
            PresenceRegistry::new(PresenceSettings {
                timeout_in,
                timeout_out: chrono::Duration::seconds(5),
            }),
            settings(),
        )
    }

    fn idle_capture() -> LineCapture<&'static [u8]> {
        LineCapture::new(&b""[..])
    }

    #[test]
    fn test_frame_is_registered_when_flushed() {
        let recorder = Arc::new(Recorder::default());
        let mut scanner = scan_loop(idle_capture(), 1).with_notifier(recorder.clone());

        // 0xC4 -> signal strength 60
        scanner.process_line(&frame_line(0xC4), at(0));
        assert!(scanner.registry().is_empty());

        scanner.process_line("< 01 0C 20 02 00 00", at(0));
        let record = scanner.registry().get(ID).unwrap();
        assert!(record.is_active());
        assert_eq!(record.signal_window().back(), Some(&60));
        assert_eq!(recorder.count("appear"), 1);

        let stats = scanner.stats();
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.appeared, 1);
    }

    #[test]
    fn test_weak_readings_are_filtered() {
        let mut scanner = scan_loop(idle_capture(), 1);

        // 0x90 -> signal strength 112, beyond the sensitivity of 100
        scanner.process_line(&frame_line(0x90), at(0));
        scanner.process_line("< 01", at(0));

        assert!(scanner.registry().is_empty());
        assert_eq!(scanner.stats().readings, 1);
        assert_eq!(scanner.stats().filtered, 1);
    }

    #[test]
    fn test_bad_frames_do_not_touch_the_registry() {
        let mut scanner = scan_loop(idle_capture(), 1);

        scanner.process_line("> 04 3E zz", at(0));
        scanner.process_line("> 04 3E 2A 02 01", at(0));
        scanner.process_line(&frame_line(0xC4), at(0));
        scanner.process_line("< 01", at(0));

        let stats = scanner.stats();
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.registered, 1);
        assert_eq!(scanner.registry().len(), 1);
    }

    #[test]
    fn test_sweep_reports_departure() {
        let recorder = Arc::new(Recorder::default());
        let mut scanner = scan_loop(idle_capture(), 1).with_notifier(recorder.clone());

        scanner.process_line(&frame_line(0xC4), at(0));
        scanner.process_line("< 01", at(0));
        scanner.sweep(at(3));
        assert_eq!(recorder.count("disappear"), 0);

        scanner.sweep(at(6));
        assert_eq!(recorder.count("disappear"), 1);
        assert_eq!(recorder.count("ping"), 1);
        assert_eq!(scanner.stats().disappeared, 1);
    }

    #[tokio::test]
    async fn test_run_reports_arrival_and_departure_then_releases_capture() {
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        for _ in 0..3 {
            writer.write_all(frame_line(0xC4).as_bytes()).await.unwrap();
            writer.write_all(b"\n< 01 0C 20 02 00 00\n").await.unwrap();
        }

        let shut_down = Arc::new(AtomicBool::new(false));
        let capture = TrackedCapture {
            inner: LineCapture::new(BufReader::new(reader)),
            shut_down: shut_down.clone(),
        };
        let recorder = Arc::new(Recorder::default());
        let clock = Arc::new(SteppingClock {
            inner: ManualClock::new(at(0)),
            step: chrono::Duration::seconds(2),
        });

        let scanner = scan_loop(capture, 3)
            .with_notifier(recorder.clone())
            .with_clock(clock);

        let waiter = recorder.clone();
        let stats = tokio::time::timeout(
            Duration::from_secs(10),
            scanner.run(async move { waiter.disappeared.notified().await }),
        )
        .await
        .expect("scan loop did not observe the departure")
        .unwrap();

        assert_eq!(recorder.count("appear"), 1);
        assert_eq!(recorder.count("disappear"), 1);
        assert_eq!(stats.registered, 3);
        assert_eq!(stats.appeared, 1);
        assert_eq!(stats.disappeared, 1);
        assert!(stats.pings >= 1);
        assert!(shut_down.load(Ordering::SeqCst));

        drop(writer);
    }

    #[tokio::test]
    async fn test_run_ends_when_capture_closes() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        writer.write_all(b"> 04 3E\n").await.unwrap();
        drop(writer);

        let shut_down = Arc::new(AtomicBool::new(false));
        let capture = TrackedCapture {
            inner: LineCapture::new(BufReader::new(reader)),
            shut_down: shut_down.clone(),
        };

        let err = scan_loop(capture, 3)
            .run(std::future::pending())
            .await
            .unwrap_err();
        assert!(err.is_end_of_stream());
        assert!(shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_idle_capture_still_sweeps() {
        let (_writer, reader) = tokio::io::duplex(1024);
        let capture = LineCapture::new(BufReader::new(reader));
        let recorder = Arc::new(Recorder::default());

        let mut scanner = scan_loop(capture, 1).with_notifier(recorder.clone());
        scanner.process_line(&frame_line(0xC4), at(0));
        scanner.process_line("< 01", at(0));

        let clock = Arc::new(ManualClock::new(at(10)));
        let waiter = recorder.clone();
        let stats = scanner
            .with_clock(clock)
            .run(async move { waiter.disappeared.notified().await })
            .await
            .unwrap();

        assert_eq!(stats.lines, 2);
        assert_eq!(stats.disappeared, 1);
    }
}
