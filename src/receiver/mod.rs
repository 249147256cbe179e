//! Recording sessions against remote receivers.
//!
//! A session streams audio from one receiver instance into the band's work
//! directory, one file per cycle. The worker only needs to open a session,
//! notice when it dies, and drop it to stop the capture.

mod command;

pub use command::*;

use crate::config::Instance;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::oneshot;

/// Recording error types.
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("failed to start recorder: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("capture file {0} was not produced")]
    MissingCapture(PathBuf),
}

/// Receiver-side parameters for one band.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingParams {
    /// Dial frequency in Hz.
    pub frequency_hz: u64,
    /// Passband low edge, Hz above the dial frequency.
    pub low_cut_hz: i32,
    /// Passband high edge, Hz above the dial frequency.
    pub high_cut_hz: i32,
    /// Fixed RF gain in dB; `None` leaves AGC on.
    pub gain_db: Option<f64>,
    /// Length of each captured file. Sessions themselves run until dropped.
    pub segment_secs: u64,
    /// Record every segment into this one file name instead of per-cycle names.
    pub fixed_filename: Option<String>,
}

impl RecordingParams {
    /// WSPR defaults: USB, 1300-1700 Hz passband, AGC on.
    pub fn wspr(frequency_hz: u64, segment_secs: u64) -> Self {
        Self {
            frequency_hz,
            low_cut_hz: 1300,
            high_cut_hz: 1700,
            gain_db: None,
            segment_secs,
            fixed_filename: None,
        }
    }

    /// Dial frequency in kHz, as receivers expect it.
    pub fn frequency_khz(&self) -> f64 {
        self.frequency_hz as f64 / 1000.0
    }
}

/// Everything needed to open one session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub band: String,
    pub instance: Instance,
    pub params: RecordingParams,
    pub output_dir: PathBuf,
    /// Name the session identifies itself with on the receiver.
    pub user: String,
}

/// Capability to open recording sessions.
pub trait Receiver: Send + Sync {
    fn open(&self, request: &SessionRequest) -> Result<Session, RecordingError>;
}

static SESSION_IDS: AtomicU64 = AtomicU64::new(1);

/// A live capture. Dropping it stops the capture.
#[derive(Debug)]
pub struct Session {
    id: u64,
    _shutdown: oneshot::Sender<()>,
    failure: Option<oneshot::Receiver<String>>,
}

/// Backend half of a [`Session`].
#[derive(Debug)]
pub struct SessionControl {
    /// Resolves once the session is dropped.
    pub shutdown: oneshot::Receiver<()>,
    failure: oneshot::Sender<String>,
}

impl Session {
    /// Create a session and the control half its backend keeps.
    pub fn pair() -> (Session, SessionControl) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (failure_tx, failure_rx) = oneshot::channel();
        (
            Session {
                id: SESSION_IDS.fetch_add(1, Ordering::Relaxed),
                _shutdown: shutdown_tx,
                failure: Some(failure_rx),
            },
            SessionControl {
                shutdown: shutdown_rx,
                failure: failure_tx,
            },
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Take the channel that resolves when the capture dies. Can be taken once.
    pub fn take_failure(&mut self) -> Option<oneshot::Receiver<String>> {
        self.failure.take()
    }
}

impl SessionControl {
    /// Report that the capture died.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.failure.send(reason.into());
    }
}

/// Capture file for the cycle starting at `cycle_start`.
pub fn capture_path(
    work_dir: &Path,
    cycle_start: DateTime<Utc>,
    frequency_hz: u64,
    fixed_filename: Option<&str>,
) -> PathBuf {
    match fixed_filename {
        Some(name) => work_dir.join(name),
        None => work_dir.join(format!(
            "{}_{}_usb.wav",
            cycle_start.format("%Y%m%dT%H%M%SZ"),
            frequency_hz
        )),
    }
}
