//! Spot publishing.
//!
//! Publishing never blocks a decode cycle: a publisher hands the spot off and
//! returns, and the delivery outcome is only logged.

mod webhook;

pub use webhook::*;

use crate::config::ReceiverIdentity;
use crate::decoder::Decode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Publish error types.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to encode spot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("no async runtime available to deliver spot")]
    NoRuntime,
}

/// Sink for decoded spots.
pub trait SpotPublisher: Send + Sync {
    /// Queue one spot for delivery and return without waiting for it.
    fn publish(&self, decode: &Decode, band: &str, dial_frequency_hz: u64) -> Result<(), PublishError>;
}

/// Wire format of a published spot.
#[derive(Debug, Clone, Serialize)]
pub struct SpotMessage {
    pub time: DateTime<Utc>,
    pub band: String,
    pub dial_frequency_hz: u64,
    pub frequency_hz: u64,
    pub callsign: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    pub snr: i32,
    pub dt: f64,
    pub power_dbm: i32,
    pub drift: i32,
    pub reporter: String,
    pub reporter_locator: String,
}

impl SpotMessage {
    pub fn new(
        decode: &Decode,
        band: &str,
        dial_frequency_hz: u64,
        reporter: &ReceiverIdentity,
    ) -> Self {
        Self {
            time: decode.time,
            band: band.to_string(),
            dial_frequency_hz,
            frequency_hz: (decode.frequency_mhz * 1_000_000.0).round() as u64,
            callsign: decode.callsign.clone(),
            locator: decode.locator.clone(),
            snr: decode.snr,
            dt: decode.dt,
            power_dbm: decode.power_dbm,
            drift: decode.drift,
            reporter: reporter.callsign.clone(),
            reporter_locator: reporter.locator.clone(),
        }
    }
}
