//! External WSPR decoder invocation.
//!
//! The decoder is run once per cycle against the captured audio file. Its
//! console output is only kept for diagnostics; the spots themselves are read
//! from a fixed-name file it writes into its working directory.

mod spots;

pub use spots::*;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;

/// File the decoder writes its spots to, relative to its working directory.
pub const SPOTS_FILE: &str = "wspr_spots.txt";

/// Decoder error types.
#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("failed to launch decoder {path}: {source}")]
    Launch {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("decoder exited with {status}: {output}")]
    Failed { status: String, output: String },
    #[error("failed to read spots file: {0}")]
    Read(#[from] std::io::Error),
}

/// Successful decoder run.
#[derive(Debug)]
pub struct DecoderRun {
    pub elapsed: Duration,
    pub output: String,
}

/// Format a dial frequency the way the decoder expects it (MHz, 6 decimals).
pub fn frequency_arg(frequency_hz: u64) -> String {
    format!("{:.6}", frequency_hz as f64 / 1_000_000.0)
}

/// Run the decoder on one captured file and wait for it to exit.
///
/// Any spots file left from an earlier run is removed first.
pub async fn run_decoder(
    decoder: &Path,
    work_dir: &Path,
    frequency_hz: u64,
    wav: &Path,
) -> Result<DecoderRun, DecoderError> {
    match tokio::fs::remove_file(work_dir.join(SPOTS_FILE)).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(DecoderError::Read(e)),
    }

    let start = Instant::now();
    let output = Command::new(decoder)
        .arg("-f")
        .arg(frequency_arg(frequency_hz))
        .arg(wav)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| DecoderError::Launch {
            path: decoder.to_path_buf(),
            source,
        })?;
    let elapsed = start.elapsed();

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(DecoderError::Failed {
            status: output.status.to_string(),
            output: combined.trim().to_string(),
        });
    }

    Ok(DecoderRun {
        elapsed,
        output: combined,
    })
}

/// Read and parse the spots file. A missing file means no decodes.
pub async fn read_spots(work_dir: &Path) -> Result<SpotBatch, DecoderError> {
    match tokio::fs::read_to_string(work_dir.join(SPOTS_FILE)).await {
        Ok(text) => Ok(parse_spots(&text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(SpotBatch::default()),
        Err(e) => Err(DecoderError::Read(e)),
    }
}
