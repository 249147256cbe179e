//! Parser for the decoder's spot file.
//!
//! One spot per line:
//!
//! ```txt
//! YYMMDD HHMM <sync> <snr> <dt> <freq MHz> <call> [<grid>] <power> [<drift> ...]
//! ```
//!
//! Columns after drift (wsprd writes decode cycles and jitter there) are
//! ignored.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;

/// One decoded WSPR transmission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decode {
    pub time: DateTime<Utc>,
    pub snr: i32,
    /// Time offset in seconds.
    pub dt: f64,
    /// Absolute frequency in MHz.
    pub frequency_mhz: f64,
    pub callsign: String,
    pub locator: Option<String>,
    pub power_dbm: i32,
    /// Frequency drift in Hz.
    pub drift: i32,
}

/// Why a single spot line was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpotError {
    #[error("line does not match spot format")]
    Malformed,
    #[error("invalid {field} '{value}'")]
    BadField { field: &'static str, value: String },
}

/// A rejected line, with its 1-based position in the file.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line}: {source}")]
pub struct ParseError {
    pub line: usize,
    pub source: SpotError,
}

/// Result of parsing a whole spot file.
#[derive(Debug, Default)]
pub struct SpotBatch {
    pub decodes: Vec<Decode>,
    pub rejected: Vec<ParseError>,
}

impl SpotBatch {
    /// Every non-blank line, parsed or not.
    pub fn candidate_lines(&self) -> usize {
        self.decodes.len() + self.rejected.len()
    }
}

fn spot_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(\d{6})\s+(\d{4})\s+\S+\s+(\S+)\s+(\S+)\s+(\S+)\s+(<[^>\s]*>|\S+)\s+(\S.*?)\s*$",
        )
        .unwrap()
    })
}

/// Whether a token can be a Maidenhead locator.
fn looks_like_locator(token: &str) -> bool {
    token.len() >= 2 && matches!(token.chars().next(), Some('A'..='R'))
}

fn field<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, SpotError> {
    value.parse().map_err(|_| SpotError::BadField {
        field: name,
        value: value.to_string(),
    })
}

/// Parse one line of decoder output.
pub fn parse_spot_line(line: &str) -> Result<Decode, SpotError> {
    let caps = spot_regex().captures(line).ok_or(SpotError::Malformed)?;

    let date = NaiveDate::parse_from_str(&caps[1], "%y%m%d").map_err(|_| SpotError::BadField {
        field: "date",
        value: caps[1].to_string(),
    })?;
    let time = NaiveTime::parse_from_str(&caps[2], "%H%M").map_err(|_| SpotError::BadField {
        field: "time",
        value: caps[2].to_string(),
    })?;

    let snr: i32 = field("snr", &caps[3])?;
    let dt: f64 = field("dt", &caps[4])?;
    let frequency_mhz: f64 = field("frequency", &caps[5])?;

    let callsign = caps[6]
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string();

    let rest: Vec<&str> = caps[7].split_whitespace().collect();
    let (locator, power, drift) = match rest.as_slice() {
        [grid, power, more @ ..] if looks_like_locator(grid) => {
            (Some(grid.to_string()), *power, more.first())
        }
        [power, more @ ..] => (None, *power, more.first()),
        [] => return Err(SpotError::Malformed),
    };

    let power_dbm: i32 = field("power", power)?;
    let drift: i32 = match drift {
        Some(d) => field("drift", d)?,
        None => 0,
    };

    Ok(Decode {
        time: date.and_time(time).and_utc(),
        snr,
        dt,
        frequency_mhz,
        callsign,
        locator,
        power_dbm,
        drift,
    })
}

/// Parse a whole spot file. Bad lines are collected, never fatal.
pub fn parse_spots(text: &str) -> SpotBatch {
    let mut batch = SpotBatch::default();

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_spot_line(line) {
            Ok(decode) => batch.decodes.push(decode),
            Err(source) => batch.rejected.push(ParseError {
                line: idx + 1,
                source,
            }),
        }
    }

    batch
}
