//! Per-(mode, band) decode time series.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;

/// Reporting windows in hours, shortest first.
pub const WINDOW_HOURS: [u32; WINDOW_COUNT] = [1, 3, 6, 12, 24];

pub const WINDOW_COUNT: usize = 5;

/// Index of `hours` in [`WINDOW_HOURS`], if it is a supported window.
pub fn window_index(hours: u32) -> Option<usize> {
    WINDOW_HOURS.iter().position(|&h| h == hours)
}

#[derive(Debug, Clone)]
struct DecodeEvent {
    callsign: String,
    time: DateTime<Utc>,
}

/// Retained decode events plus window counts and distinct-callsign counts
/// derived from them at the last refresh.
#[derive(Debug, Default)]
pub struct TimeSeries {
    events: Vec<DecodeEvent>,
    counts: [u64; WINDOW_COUNT],
    unique: [usize; WINDOW_COUNT],
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one decode and refresh every window against `now`.
    pub fn record(&mut self, callsign: &str, now: DateTime<Utc>) {
        self.events.push(DecodeEvent {
            callsign: callsign.to_string(),
            time: now,
        });
        self.refresh(now);
    }

    /// Drop events older than the longest window and rebuild counts and
    /// distinct callsigns from what is left.
    ///
    /// Every window is recomputed from the retained events in one pass: each
    /// event lands in the shortest window containing it and counts toward
    /// that one and every longer one.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        let longest = ChronoDuration::hours(WINDOW_HOURS[WINDOW_COUNT - 1] as i64);
        self.events.retain(|e| now - e.time < longest);

        let mut counts = [0u64; WINDOW_COUNT];
        let mut shortest: HashMap<&str, usize> = HashMap::new();
        for event in &self.events {
            let age = now - event.time;
            let Some(first) = WINDOW_HOURS
                .iter()
                .position(|&h| age < ChronoDuration::hours(h as i64))
            else {
                continue;
            };
            counts[first] += 1;
            shortest
                .entry(event.callsign.as_str())
                .and_modify(|i| *i = (*i).min(first))
                .or_insert(first);
        }

        let mut unique = [0usize; WINDOW_COUNT];
        for &first in shortest.values() {
            unique[first] += 1;
        }
        for i in 1..WINDOW_COUNT {
            counts[i] += counts[i - 1];
            unique[i] += unique[i - 1];
        }

        self.counts = counts;
        self.unique = unique;
    }

    /// Decode count for a supported window, 0 otherwise.
    pub fn total(&self, hours: u32) -> u64 {
        window_index(hours).map(|i| self.counts[i]).unwrap_or(0)
    }

    /// Distinct callsigns for a supported window, 0 otherwise.
    pub fn unique(&self, hours: u32) -> usize {
        window_index(hours).map(|i| self.unique[i]).unwrap_or(0)
    }

    /// Retained events no older than `window` relative to `now`.
    pub fn count_since(&self, window: ChronoDuration, now: DateTime<Utc>) -> usize {
        self.events.iter().filter(|e| now - e.time <= window).count()
    }

    pub fn retained(&self) -> usize {
        self.events.len()
    }
}
