//! Per function call statistics.
//!
//! Every call is classified as successful, not-modified or unsuccessful and
//! folded into the matching aggregate. Unsuccessful calls are additionally
//! aggregated per error code. All updates of one function happen under one
//! mutex so a snapshot is always internally consistent.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::protocol::model::{FunctionResult, Outcome};

/// Timestamped duration of one call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extreme {
    /// When the call started
    pub at: DateTime<Utc>,
    /// How long it took, in milliseconds
    pub duration_ms: u64,
}

/// Counters of one class of calls
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Aggregate {
    /// Number of calls
    pub count: u64,
    /// Sum of all durations in milliseconds
    pub total_ms: u64,
    /// Fastest call
    pub min: Option<Extreme>,
    /// Slowest call
    pub max: Option<Extreme>,
    /// Most recent call
    pub last: Option<Extreme>,
}

impl Aggregate {
    /// Average duration in milliseconds, rounded down; zero without calls
    pub fn average_ms(&self) -> u64 {
        self.total_ms.checked_div(self.count).unwrap_or(0)
    }

    fn record(&mut self, at: DateTime<Utc>, duration_ms: u64) {
        let call = Extreme { at, duration_ms };
        self.count += 1;
        self.total_ms = self.total_ms.saturating_add(duration_ms);
        if self.min.map_or(true, |min| duration_ms < min.duration_ms) {
            self.min = Some(call);
        }
        if self.max.map_or(true, |max| duration_ms > max.duration_ms) {
            self.max = Some(call);
        }
        self.last = Some(call);
    }
}

/// Consistent copy of a function's statistics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    /// Calls without error code
    pub successful: Aggregate,
    /// Not-modified calls
    pub not_modified: Aggregate,
    /// Calls with an error code
    pub unsuccessful: Aggregate,
    /// Unsuccessful calls per error code
    pub by_error_code: BTreeMap<String, Aggregate>,
    /// Time of the last reset, or of creation
    pub last_reset: DateTime<Utc>,
}

#[derive(Debug)]
struct Buckets {
    successful: Aggregate,
    not_modified: Aggregate,
    unsuccessful: Aggregate,
    by_error_code: BTreeMap<String, Aggregate>,
    last_reset: DateTime<Utc>,
}

impl Buckets {
    fn new() -> Self {
        Self {
            successful: Aggregate::default(),
            not_modified: Aggregate::default(),
            unsuccessful: Aggregate::default(),
            by_error_code: BTreeMap::new(),
            last_reset: Utc::now(),
        }
    }

    fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            successful: self.successful.clone(),
            not_modified: self.not_modified.clone(),
            unsuccessful: self.unsuccessful.clone(),
            by_error_code: self.by_error_code.clone(),
            last_reset: self.last_reset,
        }
    }
}

/// Statistics of one function
#[derive(Debug)]
pub struct FunctionStatistics {
    buckets: Mutex<Buckets>,
}

impl Default for FunctionStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionStatistics {
    /// Empty statistics, last reset now
    pub fn new() -> Self {
        Self { buckets: Mutex::new(Buckets::new()) }
    }

    /// Records a call that started at `started` and ends now
    pub fn record_call(&self, started: Instant, start_time: DateTime<Utc>, result: &FunctionResult) {
        self.record(start_time, started.elapsed(), result);
    }

    /// Records a call with a known duration
    pub fn record(&self, start_time: DateTime<Utc>, duration: Duration, result: &FunctionResult) {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let mut buckets = self.buckets.lock();
        match result.outcome() {
            Outcome::Successful => buckets.successful.record(start_time, duration_ms),
            Outcome::NotModified => buckets.not_modified.record(start_time, duration_ms),
            Outcome::Unsuccessful(code) => {
                buckets.unsuccessful.record(start_time, duration_ms);
                buckets
                    .by_error_code
                    .entry(code.as_str().to_string())
                    .or_default()
                    .record(start_time, duration_ms);
            }
        }
    }

    /// Consistent copy of the current values
    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.buckets.lock().snapshot()
    }

    /// Zeroes every bucket and records the reset time
    pub fn reset(&self) {
        *self.buckets.lock() = Buckets::new();
    }

    /// Takes a snapshot and resets in one step, so no call is lost in between
    pub fn snapshot_and_reset(&self) -> StatisticsSnapshot {
        let mut buckets = self.buckets.lock();
        let snapshot = buckets.snapshot();
        *buckets = Buckets::new();
        snapshot
    }
}
