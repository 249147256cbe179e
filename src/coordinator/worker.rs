//! Per-band decode cycle worker.
//!
//! One worker per enabled band. After aligning to the cycle grid it loops
//! record -> decode -> parse -> publish until stopped. Nothing inside the
//! loop is fatal: every failure is logged and the next cycle starts.

use super::ManagerError;
use crate::config::{Band, Instance, ReceiverIdentity};
use crate::decoder::{read_spots, run_decoder, Decode, SpotBatch};
use crate::metrics::{MetricsStore, MODE_WSPR};
use crate::publish::SpotPublisher;
use crate::receiver::{capture_path, Receiver, RecordingError, RecordingParams, Session, SessionRequest};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// WSPR slot length.
pub const CYCLE_SECS: u64 = 120;

/// Timing knobs for the cycle loop.
#[derive(Debug, Clone)]
pub struct CycleTiming {
    /// Slot length; cycles start on multiples of this since the epoch.
    pub period: Duration,
    /// Pause after opening a fresh session before trusting it.
    pub settle: Duration,
    /// Pause after a cycle that produced no capture.
    pub retry_backoff: Duration,
}

impl Default for CycleTiming {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(CYCLE_SECS),
            settle: Duration::from_secs(2),
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Dependencies shared by every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub decoder_path: PathBuf,
    /// Base work directory; each band works in its own subdirectory.
    pub work_dir: PathBuf,
    pub identity: ReceiverIdentity,
    pub receiver: Arc<dyn Receiver>,
    pub publisher: Option<Arc<dyn SpotPublisher>>,
    pub metrics: Arc<MetricsStore>,
    pub timing: CycleTiming,
    /// Record into one fixed file per band and keep it.
    pub keep_wav: bool,
}

/// Where a worker is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    Idle,
    SyncingToCycle,
    Recording,
    Decoding,
    Publishing,
    Stopped,
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub band: String,
    pub instance: String,
    pub frequency_hz: u64,
    pub generation: u64,
    pub state: WorkerState,
    pub session_active: bool,
    pub cycles: u64,
    pub last_cycle: Option<DateTime<Utc>>,
}

struct WorkerInner {
    running: bool,
    state: WorkerState,
    session: Option<Session>,
    cycles: u64,
    last_cycle: Option<DateTime<Utc>>,
}

static GENERATIONS: AtomicU64 = AtomicU64::new(1);

/// Decode cycle worker for one band.
pub struct BandWorker {
    band: Band,
    instance: Instance,
    generation: u64,
    work_dir: PathBuf,
    params: RecordingParams,
    ctx: WorkerContext,
    inner: Arc<Mutex<WorkerInner>>,
    stop_tx: broadcast::Sender<()>,
}

impl BandWorker {
    pub fn new(band: Band, instance: Instance, ctx: WorkerContext) -> Arc<Self> {
        let work_dir = ctx.work_dir.join(&band.name);
        let mut params = RecordingParams::wspr(band.frequency_hz, ctx.timing.period.as_secs());
        params.gain_db = band.gain_db;
        if ctx.keep_wav {
            params.fixed_filename = Some(format!("{}.wav", band.name));
        }
        let (stop_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            band,
            instance,
            generation: GENERATIONS.fetch_add(1, Ordering::Relaxed),
            work_dir,
            params,
            ctx,
            inner: Arc::new(Mutex::new(WorkerInner {
                running: false,
                state: WorkerState::Idle,
                session: None,
                cycles: 0,
                last_cycle: None,
            })),
            stop_tx,
        })
    }

    pub fn band(&self) -> &Band {
        &self.band
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Create the work directory and launch the cycle loop.
    ///
    /// Returns once the loop task is spawned; the loop itself first waits
    /// for the next cycle boundary.
    pub async fn start(self: &Arc<Self>) -> Result<(), ManagerError> {
        if self.inner.lock().running {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|source| ManagerError::WorkDir {
                path: self.work_dir.clone(),
                source,
            })?;

        {
            let mut inner = self.inner.lock();
            inner.running = true;
            inner.state = WorkerState::SyncingToCycle;
        }

        let stop_rx = self.stop_tx.subscribe();
        tokio::spawn(self.clone().run(stop_rx));

        tracing::info!(
            "Worker {}: started on {} at {} Hz",
            self.band.name,
            self.instance.name,
            self.band.frequency_hz
        );
        Ok(())
    }

    /// Ask the loop to exit at its next check and release the session.
    /// Calling it again is a no-op.
    pub fn stop(&self) {
        let session = {
            let mut inner = self.inner.lock();
            if !inner.running {
                return;
            }
            inner.running = false;
            inner.state = WorkerState::Stopped;
            inner.session.take()
        };
        let _ = self.stop_tx.send(());
        drop(session);

        tracing::info!("Worker {}: stopped", self.band.name);
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn status(&self) -> WorkerStatus {
        let inner = self.inner.lock();
        WorkerStatus {
            band: self.band.name.clone(),
            instance: self.instance.name.clone(),
            frequency_hz: self.band.frequency_hz,
            generation: self.generation,
            state: inner.state,
            session_active: inner.session.is_some(),
            cycles: inner.cycles,
            last_cycle: inner.last_cycle,
        }
    }

    async fn run(self: Arc<Self>, mut stop_rx: broadcast::Receiver<()>) {
        let wait = time_until_next_cycle(Utc::now(), self.ctx.timing.period);
        tracing::debug!(
            "Worker {}: waiting {:.1}s for cycle boundary",
            self.band.name,
            wait.as_secs_f64()
        );

        let stopped = tokio::select! {
            _ = stop_rx.recv() => true,
            _ = tokio::time::sleep(wait) => false,
        };

        if !stopped {
            while !self.stop_requested(&mut stop_rx) {
                self.run_cycle().await;
            }
        }

        let session = {
            let mut inner = self.inner.lock();
            inner.running = false;
            inner.state = WorkerState::Stopped;
            inner.session.take()
        };
        drop(session);
        tracing::debug!("Worker {}: cycle loop exited", self.band.name);
    }

    fn stop_requested(&self, stop_rx: &mut broadcast::Receiver<()>) -> bool {
        match stop_rx.try_recv() {
            Err(broadcast::error::TryRecvError::Empty) => !self.is_running(),
            _ => true,
        }
    }

    fn set_state(&self, state: WorkerState) {
        let mut inner = self.inner.lock();
        if inner.running {
            inner.state = state;
        }
    }

    async fn run_cycle(self: &Arc<Self>) {
        let timing = &self.ctx.timing;
        let cycle_start = cycle_start(Utc::now(), timing.period);
        let wav = capture_path(
            &self.work_dir,
            cycle_start,
            self.band.frequency_hz,
            self.params.fixed_filename.as_deref(),
        );

        // Record
        self.set_state(WorkerState::Recording);
        match self.ensure_session() {
            Ok(true) => tokio::time::sleep(timing.settle).await,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Worker {}: {}", self.band.name, e);
                self.backoff().await;
                return;
            }
        }

        let slot_end = cycle_start + timing.period;
        let remaining = (slot_end - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(remaining).await;

        if !tokio::fs::try_exists(&wav).await.unwrap_or(false) {
            tracing::warn!(
                "Worker {}: {}",
                self.band.name,
                RecordingError::MissingCapture(wav)
            );
            self.backoff().await;
            return;
        }

        // Decode
        self.set_state(WorkerState::Decoding);
        let started = Instant::now();
        let decoded = run_decoder(
            &self.ctx.decoder_path,
            &self.work_dir,
            self.band.frequency_hz,
            &wav,
        )
        .await;
        self.ctx
            .metrics
            .record_execution_time(MODE_WSPR, &self.band.name, started.elapsed());

        match decoded {
            Ok(run) => {
                tracing::debug!(
                    "Worker {}: decoder finished in {:.2}s: {}",
                    self.band.name,
                    run.elapsed.as_secs_f64(),
                    run.output.trim()
                );

                // Parse + publish
                self.set_state(WorkerState::Publishing);
                let batch = match read_spots(&self.work_dir).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::warn!("Worker {}: {}", self.band.name, e);
                        SpotBatch::default()
                    }
                };
                for rejected in &batch.rejected {
                    tracing::debug!("Worker {}: skipped spot {}", self.band.name, rejected);
                }
                self.publish_decodes(&batch.decodes);
                self.ctx.metrics.record_raw_cycle_decodes(
                    MODE_WSPR,
                    &self.band.name,
                    batch.candidate_lines(),
                );

                tracing::info!(
                    "Worker {}: cycle {} produced {} spots ({} rejected)",
                    self.band.name,
                    cycle_start.format("%H:%M"),
                    batch.decodes.len(),
                    batch.rejected.len()
                );
            }
            Err(e) => {
                tracing::warn!("Worker {}: {}", self.band.name, e);
            }
        }

        if self.params.fixed_filename.is_none() {
            if let Err(e) = tokio::fs::remove_file(&wav).await {
                tracing::warn!(
                    "Worker {}: failed to remove {}: {}",
                    self.band.name,
                    wav.display(),
                    e
                );
            }
        }

        let mut inner = self.inner.lock();
        inner.cycles += 1;
        inner.last_cycle = Some(cycle_start);
    }

    /// Open a session if there is none. Returns whether one was opened.
    fn ensure_session(self: &Arc<Self>) -> Result<bool, RecordingError> {
        if self.inner.lock().session.is_some() {
            return Ok(false);
        }

        let request = SessionRequest {
            band: self.band.name.clone(),
            instance: self.instance.clone(),
            params: self.params.clone(),
            output_dir: self.work_dir.clone(),
            user: self.ctx.identity.callsign.clone(),
        };
        let mut session = self.ctx.receiver.open(&request)?;
        let id = session.id();
        let failure = session.take_failure();

        {
            let mut inner = self.inner.lock();
            if !inner.running {
                return Ok(false);
            }
            inner.session = Some(session);
        }

        if let Some(failure) = failure {
            let inner = Arc::downgrade(&self.inner);
            let band = self.band.name.clone();
            tokio::spawn(watch_session(inner, id, failure, band));
        }

        tracing::info!("Worker {}: recording session {} opened", self.band.name, id);
        Ok(true)
    }

    fn publish_decodes(&self, decodes: &[Decode]) {
        for decode in decodes {
            self.ctx
                .metrics
                .record_decode(MODE_WSPR, &self.band.name, &decode.callsign);

            if let Some(publisher) = &self.ctx.publisher {
                if let Err(e) = publisher.publish(decode, &self.band.name, self.band.frequency_hz) {
                    tracing::error!(
                        "Worker {}: failed to publish {}: {}",
                        self.band.name,
                        decode.callsign,
                        e
                    );
                }
            }
        }
    }

    async fn backoff(&self) {
        let jitter = Duration::from_millis(rand::random::<u64>() % 500);
        tokio::time::sleep(self.ctx.timing.retry_backoff + jitter).await;
    }
}

/// Clear the worker's session handle once that session reports it died, so
/// the next cycle opens a new one.
async fn watch_session(
    inner: Weak<Mutex<WorkerInner>>,
    id: u64,
    failure: tokio::sync::oneshot::Receiver<String>,
    band: String,
) {
    let reason = failure.await;
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let dead = {
        let mut inner = inner.lock();
        if inner.session.as_ref().map(Session::id) == Some(id) {
            inner.session.take()
        } else {
            None
        }
    };

    if dead.is_some() {
        match reason {
            Ok(reason) => tracing::warn!(
                "Worker {}: recording session {} died ({}); reconnecting next cycle",
                band,
                id,
                reason
            ),
            Err(_) => tracing::warn!(
                "Worker {}: recording session {} ended; reconnecting next cycle",
                band,
                id
            ),
        }
    }
}

/// Time from `now` to the next cycle boundary; zero when already on one.
pub fn time_until_next_cycle(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ns = period.as_nanos().max(1) as i128;
    let now_ns = now.timestamp() as i128 * 1_000_000_000 + now.timestamp_subsec_nanos() as i128;
    let into_cycle = now_ns.rem_euclid(period_ns);
    if into_cycle == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos((period_ns - into_cycle) as u64)
    }
}

/// Start of the cycle containing `now`.
pub fn cycle_start(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let period_secs = period.as_secs().max(1) as i64;
    let ts = now.timestamp();
    let truncated = ts - ts.rem_euclid(period_secs);
    DateTime::from_timestamp(truncated, 0).unwrap_or(now)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::decoder::tests::fake_decoder;
    use crate::publish::PublishError;
    use crate::receiver::SessionControl;
    use chrono::{Duration as ChronoDuration, TimeZone, Timelike};
    use std::path::Path;

    /// Receiver that opens sessions in-process and optionally drops a
    /// capture file into the output directory on open.
    #[derive(Default)]
    pub(crate) struct FakeReceiver {
        pub opened: Mutex<Vec<SessionRequest>>,
        pub controls: Mutex<Vec<SessionControl>>,
        pub write_fixed_capture: bool,
        /// Keep writing the per-cycle capture for the current cycle while
        /// the test runs.
        pub write_cycle_captures: bool,
    }

    impl Receiver for FakeReceiver {
        fn open(&self, request: &SessionRequest) -> Result<Session, RecordingError> {
            if self.write_fixed_capture {
                if let Some(name) = &request.params.fixed_filename {
                    std::fs::write(request.output_dir.join(name), b"RIFF")?;
                }
            }
            if self.write_cycle_captures {
                let dir = request.output_dir.clone();
                let period = Duration::from_secs(request.params.segment_secs.max(1));
                let frequency_hz = request.params.frequency_hz;
                tokio::spawn(async move {
                    for _ in 0..60 {
                        let start = cycle_start(Utc::now(), period);
                        let path = capture_path(&dir, start, frequency_hz, None);
                        if !path.exists() {
                            let _ = std::fs::write(&path, b"RIFF");
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                });
            }
            let (session, control) = Session::pair();
            self.opened.lock().push(request.clone());
            self.controls.lock().push(control);
            Ok(session)
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingPublisher {
        pub spots: Mutex<Vec<(String, String, u64)>>,
        /// Callsign whose spots fail to publish.
        pub reject: Option<String>,
    }

    impl SpotPublisher for RecordingPublisher {
        fn publish(&self, decode: &Decode, band: &str, dial_frequency_hz: u64) -> Result<(), PublishError> {
            if self.reject.as_deref() == Some(decode.callsign.as_str()) {
                return Err(PublishError::NoRuntime);
            }
            self.spots
                .lock()
                .push((decode.callsign.clone(), band.to_string(), dial_frequency_hz));
            Ok(())
        }
    }

    pub(crate) fn context(work_dir: &Path, receiver: Arc<dyn Receiver>) -> WorkerContext {
        WorkerContext {
            decoder_path: work_dir.join("no-decoder"),
            work_dir: work_dir.to_path_buf(),
            identity: ReceiverIdentity {
                callsign: "N0CALL".to_string(),
                locator: "FN42".to_string(),
            },
            receiver,
            publisher: None,
            metrics: Arc::new(MetricsStore::new()),
            timing: CycleTiming::default(),
            keep_wav: false,
        }
    }

    pub(crate) fn band(name: &str, instance: &str, frequency_hz: u64) -> Band {
        Band {
            name: name.to_string(),
            instance: instance.to_string(),
            frequency_hz,
            enabled: true,
            gain_db: None,
        }
    }

    pub(crate) fn instance(name: &str) -> Instance {
        Instance {
            name: name.to_string(),
            host: format!("{}.local", name),
            port: 8073,
            password: None,
            display_name: None,
        }
    }

    fn fast_timing() -> CycleTiming {
        CycleTiming {
            period: Duration::from_secs(1),
            settle: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_time_until_next_cycle_lands_on_boundary() {
        let period = Duration::from_secs(CYCLE_SECS);
        let base = Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap();
        for offset_ms in [1, 999, 59_000, 60_000, 61_500, 119_999, 7_654_321] {
            let now = base + ChronoDuration::milliseconds(offset_ms);
            let wait = time_until_next_cycle(now, period);
            assert!(wait < period);
            let next = now + ChronoDuration::from_std(wait).unwrap();
            assert_eq!(next.second(), 0);
            assert_eq!(next.nanosecond(), 0);
            assert_eq!(next.minute() % 2, 0, "{} is not an even minute", next);
        }
        assert_eq!(time_until_next_cycle(base, period), Duration::ZERO);
    }

    #[test]
    fn test_time_until_next_cycle_subsecond() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 12, 1, 59).unwrap()
            + ChronoDuration::nanoseconds(250_000_000);
        let wait = time_until_next_cycle(now, Duration::from_secs(CYCLE_SECS));
        assert_eq!(wait, Duration::from_millis(750));
    }

    #[test]
    fn test_cycle_start() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 12, 3, 41).unwrap();
        assert_eq!(
            cycle_start(now, Duration::from_secs(CYCLE_SECS)),
            Utc.with_ymd_and_hms(2025, 3, 14, 12, 2, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let receiver = Arc::new(FakeReceiver::default());
        let worker = BandWorker::new(band("20m", "kiwi1", 14_095_600), instance("kiwi1"), context(tmp.path(), receiver));

        // Never started: stop is a no-op.
        worker.stop();
        assert_eq!(worker.status().state, WorkerState::Idle);

        worker.start().await.unwrap();
        assert!(worker.is_running());
        assert!(tmp.path().join("20m").is_dir());
        assert_eq!(worker.status().state, WorkerState::SyncingToCycle);

        worker.stop();
        worker.stop();
        assert!(!worker.is_running());
        assert_eq!(worker.status().state, WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_start_fails_when_work_dir_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("20m"), b"not a dir").unwrap();
        let receiver = Arc::new(FakeReceiver::default());
        let worker = BandWorker::new(band("20m", "kiwi1", 14_095_600), instance("kiwi1"), context(tmp.path(), receiver));

        assert!(matches!(worker.start().await, Err(ManagerError::WorkDir { .. })));
        assert!(!worker.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cycles_decode_record_and_publish() {
        let tmp = tempfile::tempdir().unwrap();
        let decoder = fake_decoder(
            tmp.path(),
            r#"cat > wspr_spots.txt <<EOF
250314 1208 0 -21 0.4 14.097085 K1ABC FN42 37
250314 1208 0 -9 0.0 14.097150 DL1XYZ JO62 23 1
not a spot line
EOF"#,
        );

        let receiver = Arc::new(FakeReceiver {
            write_fixed_capture: true,
            ..Default::default()
        });
        let publisher = Arc::new(RecordingPublisher::default());
        let mut ctx = context(tmp.path(), receiver.clone());
        ctx.decoder_path = decoder;
        ctx.publisher = Some(publisher.clone());
        ctx.timing = fast_timing();
        ctx.keep_wav = true;
        let metrics = ctx.metrics.clone();

        let worker = BandWorker::new(band("20m", "kiwi1", 14_095_600), instance("kiwi1"), ctx);
        worker.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        worker.stop();

        let status = worker.status();
        assert!(status.cycles >= 1, "no cycle completed");
        assert_eq!(status.state, WorkerState::Stopped);
        assert!(!status.session_active);

        assert!(metrics.total_decodes(MODE_WSPR, "20m", 1) >= 2);
        assert_eq!(metrics.unique_callsigns(MODE_WSPR, "20m", 1), 2);
        // Candidate lines include the rejected one.
        let avg = metrics.avg_decodes_per_cycle(MODE_WSPR, "20m", 1, 60);
        assert!((avg - 3.0).abs() < 1e-9);
        assert!(metrics.execution_stats(MODE_WSPR, "20m", 60).samples >= 1);

        let spots = publisher.spots.lock();
        assert!(spots.len() >= 2);
        assert_eq!(spots[0], ("K1ABC".to_string(), "20m".to_string(), 14_095_600));

        // Only one session was needed, and the fixed capture file is kept.
        assert_eq!(receiver.opened.lock().len(), 1);
        assert!(tmp.path().join("20m").join("20m.wav").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_publish_failure_does_not_drop_rest_of_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let decoder = fake_decoder(
            tmp.path(),
            r#"cat > wspr_spots.txt <<EOF
250314 1208  31 -21  0.4  14.097085  K1ABC FN42 37  0  1  0
250314 1208  22  -9  0.0  14.097150  DL1XYZ JO62 23  1  1  0
EOF"#,
        );

        let receiver = Arc::new(FakeReceiver {
            write_fixed_capture: true,
            ..Default::default()
        });
        let publisher = Arc::new(RecordingPublisher {
            reject: Some("K1ABC".to_string()),
            ..Default::default()
        });
        let mut ctx = context(tmp.path(), receiver);
        ctx.decoder_path = decoder;
        ctx.publisher = Some(publisher.clone());
        ctx.timing = fast_timing();
        ctx.keep_wav = true;
        let metrics = ctx.metrics.clone();

        let worker = BandWorker::new(band("20m", "kiwi1", 14_095_600), instance("kiwi1"), ctx);
        worker.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(worker.is_running());
        worker.stop();

        assert!(worker.status().cycles >= 1);
        // Both spots are counted even though one never went out.
        assert_eq!(metrics.unique_callsigns(MODE_WSPR, "20m", 1), 2);
        let spots = publisher.spots.lock();
        assert!(!spots.is_empty());
        assert!(spots.iter().all(|(call, _, _)| call == "DL1XYZ"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_decoder_keeps_worker_running() {
        let tmp = tempfile::tempdir().unwrap();
        let decoder = fake_decoder(tmp.path(), "echo 'cannot open wav' >&2\nexit 3");

        let receiver = Arc::new(FakeReceiver {
            write_cycle_captures: true,
            ..Default::default()
        });
        let publisher = Arc::new(RecordingPublisher::default());
        let mut ctx = context(tmp.path(), receiver);
        ctx.decoder_path = decoder;
        ctx.publisher = Some(publisher.clone());
        ctx.timing = fast_timing();
        let metrics = ctx.metrics.clone();

        let worker = BandWorker::new(band("40m", "kiwi1", 7_038_600), instance("kiwi1"), ctx);
        worker.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(4000)).await;

        assert!(worker.is_running());
        let band_dir = tmp.path().join("40m");
        // Every cycle before the previous one has been decoded by now.
        let decoded_before = capture_path(
            &band_dir,
            cycle_start(Utc::now(), Duration::from_secs(1)) - ChronoDuration::seconds(1),
            7_038_600,
            None,
        );
        let cycles = worker.status().cycles;
        worker.stop();
        assert!(cycles >= 1, "no cycle completed");

        assert!(metrics.execution_stats(MODE_WSPR, "40m", 60).samples >= 1);
        assert_eq!(metrics.total_decodes(MODE_WSPR, "40m", 1), 0);
        assert!(publisher.spots.lock().is_empty());

        let stale = std::fs::read_dir(&band_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|x| x == "wav") && *p < decoded_before)
            .count();
        assert_eq!(stale, 0, "decoded captures were left behind");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dead_session_is_reopened() {
        let tmp = tempfile::tempdir().unwrap();
        let receiver = Arc::new(FakeReceiver::default());
        let mut ctx = context(tmp.path(), receiver.clone());
        ctx.timing = fast_timing();

        let worker = BandWorker::new(band("30m", "kiwi1", 10_138_700), instance("kiwi1"), ctx);
        worker.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(receiver.opened.lock().len(), 1);

        let control = receiver.controls.lock().remove(0);
        control.fail("connection reset by peer");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!worker.status().session_active);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        worker.stop();
        assert!(receiver.opened.lock().len() >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_capture_skips_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let receiver = Arc::new(FakeReceiver::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let mut ctx = context(tmp.path(), receiver.clone());
        ctx.timing = fast_timing();
        ctx.publisher = Some(publisher.clone());
        let metrics = ctx.metrics.clone();

        let worker = BandWorker::new(band("40m", "kiwi1", 7_038_600), instance("kiwi1"), ctx);
        worker.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(worker.is_running());
        assert_eq!(worker.status().cycles, 0);
        worker.stop();

        assert!(publisher.spots.lock().is_empty());
        assert!(metrics.tracked_keys().is_empty());
    }
}
