//! In-memory decode metrics.
//!
//! Workers write here after every cycle; the status API reads. Each
//! (mode, band) pair has its own record behind its own lock. The outer map
//! lock is only held long enough to find or create a pair's record.

mod series;

pub use series::*;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Mode label for WSPR decodes.
pub const MODE_WSPR: &str = "WSPR";

/// How long the global recent-decode list is kept.
const RECENT_HORIZON_SECS: i64 = 60;
/// How long raw per-cycle counts are kept.
const RAW_CYCLE_RETENTION_MINUTES: i64 = 60;
/// How long decoder execution samples are kept.
const EXECUTION_RETENTION_HOURS: i64 = 24;

/// A tracked (mode, band) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SeriesKey {
    pub mode: String,
    pub band: String,
}

impl SeriesKey {
    pub fn new(mode: &str, band: &str) -> Self {
        Self {
            mode: mode.to_string(),
            band: band.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RawCycleSample {
    count: usize,
    time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct ExecutionSample {
    seconds: f64,
    time: DateTime<Utc>,
}

/// Decoder execution time statistics, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub samples: usize,
}

/// Counts for one reporting window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    pub hours: u32,
    pub total_decodes: u64,
    pub unique_callsigns: usize,
}

/// Snapshot of one (mode, band) pair for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesReport {
    pub mode: String,
    pub band: String,
    pub windows: Vec<WindowReport>,
    pub avg_decodes_per_cycle: f64,
    pub execution: ExecutionStats,
    /// Decode events still held for the 24h window.
    pub retained_events: usize,
}

/// Snapshot of the whole store.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub generated_at: DateTime<Utc>,
    pub decodes_last_minute: usize,
    pub series: Vec<SeriesReport>,
}

/// Everything tracked for one (mode, band) pair.
#[derive(Default)]
struct SeriesRecord {
    decodes: TimeSeries,
    raw_cycles: VecDeque<RawCycleSample>,
    executions: VecDeque<ExecutionSample>,
}

impl SeriesRecord {
    fn prune(&mut self, now: DateTime<Utc>) {
        prune_front(&mut self.raw_cycles, |s| {
            now - s.time > ChronoDuration::minutes(RAW_CYCLE_RETENTION_MINUTES)
        });
        prune_front(&mut self.executions, |s| {
            now - s.time > ChronoDuration::hours(EXECUTION_RETENTION_HOURS)
        });
    }
}

/// Thread-safe decode metrics store.
#[derive(Default)]
pub struct MetricsStore {
    records: RwLock<HashMap<SeriesKey, Arc<Mutex<SeriesRecord>>>>,
    recent: Mutex<VecDeque<DateTime<Utc>>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Writes ---

    /// Record one decoded spot.
    pub fn record_decode(&self, mode: &str, band: &str, callsign: &str) {
        self.record_decode_at(mode, band, callsign, Utc::now());
    }

    pub fn record_decode_at(&self, mode: &str, band: &str, callsign: &str, now: DateTime<Utc>) {
        {
            let mut recent = self.recent.lock();
            recent.push_back(now);
            prune_front(&mut *recent, |t| now - *t > ChronoDuration::seconds(RECENT_HORIZON_SECS));
        }

        let record = self.record_for(&SeriesKey::new(mode, band));
        record.lock().decodes.record(callsign, now);
    }

    /// Record the number of candidate lines one cycle produced.
    pub fn record_raw_cycle_decodes(&self, mode: &str, band: &str, count: usize) {
        self.record_raw_cycle_decodes_at(mode, band, count, Utc::now());
    }

    pub fn record_raw_cycle_decodes_at(
        &self,
        mode: &str,
        band: &str,
        count: usize,
        now: DateTime<Utc>,
    ) {
        let record = self.record_for(&SeriesKey::new(mode, band));
        let mut record = record.lock();
        record.raw_cycles.push_back(RawCycleSample { count, time: now });
        record.prune(now);
    }

    /// Record how long one decoder invocation took.
    pub fn record_execution_time(&self, mode: &str, band: &str, duration: Duration) {
        self.record_execution_time_at(mode, band, duration, Utc::now());
    }

    pub fn record_execution_time_at(
        &self,
        mode: &str,
        band: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) {
        let record = self.record_for(&SeriesKey::new(mode, band));
        let mut record = record.lock();
        record.executions.push_back(ExecutionSample {
            seconds: duration.as_secs_f64(),
            time: now,
        });
        record.prune(now);
    }

    /// Drop expired samples and rebuild every window from retained events.
    pub fn cleanup_old_data(&self) {
        self.cleanup_old_data_at(Utc::now());
    }

    pub fn cleanup_old_data_at(&self, now: DateTime<Utc>) {
        let records: Vec<Arc<Mutex<SeriesRecord>>> =
            self.records.read().values().cloned().collect();

        for record in records {
            let mut record = record.lock();
            record.prune(now);
            record.decodes.refresh(now);
        }

        let mut recent = self.recent.lock();
        prune_front(&mut *recent, |t| now - *t > ChronoDuration::seconds(RECENT_HORIZON_SECS));
    }

    // --- Queries ---

    /// Decodes in the last `hours` (1, 3, 6, 12 or 24), else 0.
    pub fn total_decodes(&self, mode: &str, band: &str, hours: u32) -> u64 {
        self.existing(mode, band)
            .map(|r| r.lock().decodes.total(hours))
            .unwrap_or(0)
    }

    /// Distinct callsigns in the last `hours` (1, 3, 6, 12 or 24), else 0.
    pub fn unique_callsigns(&self, mode: &str, band: &str, hours: u32) -> usize {
        self.existing(mode, band)
            .map(|r| r.lock().decodes.unique(hours))
            .unwrap_or(0)
    }

    /// Average decodes per cycle over the last `window_minutes`.
    ///
    /// Uses raw per-cycle counts when there are any in the window, otherwise
    /// spreads the retained decode events over the number of cycles that fit
    /// in the window.
    pub fn avg_decodes_per_cycle(
        &self,
        mode: &str,
        band: &str,
        cycle_secs: u64,
        window_minutes: u64,
    ) -> f64 {
        self.avg_decodes_per_cycle_at(mode, band, cycle_secs, window_minutes, Utc::now())
    }

    pub fn avg_decodes_per_cycle_at(
        &self,
        mode: &str,
        band: &str,
        cycle_secs: u64,
        window_minutes: u64,
        now: DateTime<Utc>,
    ) -> f64 {
        let window = ChronoDuration::minutes(window_minutes as i64);
        let Some(record) = self.existing(mode, band) else {
            return 0.0;
        };
        let record = record.lock();

        let (sum, n) = record
            .raw_cycles
            .iter()
            .filter(|s| now - s.time <= window)
            .fold((0usize, 0usize), |(sum, n), s| (sum + s.count, n + 1));
        if n > 0 {
            return sum as f64 / n as f64;
        }

        let events = record.decodes.count_since(window, now);

        if cycle_secs == 0 {
            return 0.0;
        }
        let cycles = (window_minutes * 60) as f64 / cycle_secs as f64;
        if cycles <= 0.0 {
            return 0.0;
        }
        events as f64 / cycles
    }

    /// Decoder execution time over the last `window_minutes`.
    pub fn execution_stats(&self, mode: &str, band: &str, window_minutes: u64) -> ExecutionStats {
        self.execution_stats_at(mode, band, window_minutes, Utc::now())
    }

    pub fn execution_stats_at(
        &self,
        mode: &str,
        band: &str,
        window_minutes: u64,
        now: DateTime<Utc>,
    ) -> ExecutionStats {
        let window = ChronoDuration::minutes(window_minutes as i64);
        let Some(record) = self.existing(mode, band) else {
            return ExecutionStats::default();
        };
        let record = record.lock();

        let mut stats = ExecutionStats {
            min: f64::MAX,
            ..Default::default()
        };
        let mut sum = 0.0;
        for s in record.executions.iter().filter(|s| now - s.time <= window) {
            sum += s.seconds;
            stats.min = stats.min.min(s.seconds);
            stats.max = stats.max.max(s.seconds);
            stats.samples += 1;
        }

        if stats.samples == 0 {
            return ExecutionStats::default();
        }
        stats.avg = sum / stats.samples as f64;
        stats
    }

    /// Decodes recorded across all bands in the last minute.
    pub fn decodes_last_minute(&self) -> usize {
        let now = Utc::now();
        self.recent
            .lock()
            .iter()
            .filter(|t| now - **t <= ChronoDuration::seconds(RECENT_HORIZON_SECS))
            .count()
    }

    /// Every (mode, band) pair with any recorded data, sorted.
    pub fn tracked_keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self.records.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Full snapshot for reporting, using a 2-minute cycle and a 60-minute lookback.
    pub fn report(&self) -> MetricsReport {
        let series = self
            .tracked_keys()
            .into_iter()
            .map(|key| SeriesReport {
                windows: WINDOW_HOURS
                    .iter()
                    .map(|&hours| WindowReport {
                        hours,
                        total_decodes: self.total_decodes(&key.mode, &key.band, hours),
                        unique_callsigns: self.unique_callsigns(&key.mode, &key.band, hours),
                    })
                    .collect(),
                avg_decodes_per_cycle: self.avg_decodes_per_cycle(&key.mode, &key.band, 120, 60),
                execution: self.execution_stats(&key.mode, &key.band, 60),
                retained_events: self
                    .existing(&key.mode, &key.band)
                    .map(|r| r.lock().decodes.retained())
                    .unwrap_or(0),
                mode: key.mode,
                band: key.band,
            })
            .collect();

        MetricsReport {
            generated_at: Utc::now(),
            decodes_last_minute: self.decodes_last_minute(),
            series,
        }
    }

    fn existing(&self, mode: &str, band: &str) -> Option<Arc<Mutex<SeriesRecord>>> {
        self.records.read().get(&SeriesKey::new(mode, band)).cloned()
    }

    fn record_for(&self, key: &SeriesKey) -> Arc<Mutex<SeriesRecord>> {
        if let Some(record) = self.records.read().get(key) {
            return record.clone();
        }
        self.records
            .write()
            .entry(key.clone())
            .or_default()
            .clone()
    }
}

/// Pop from the front while `expired` holds. Samples arrive in time order.
fn prune_front<T, F>(samples: &mut VecDeque<T>, expired: F)
where
    F: Fn(&T) -> bool,
{
    while let Some(front) = samples.front() {
        if expired(front) {
            samples.pop_front();
        } else {
            break;
        }
    }
}
