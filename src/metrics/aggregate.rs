//! Running statistics kept per cube.
//!
//! Aggregates are plain values: every update goes through the lock of the
//! cube that owns them, so no field needs to be atomic.

use crate::metrics::histogram::LatencyHistogram;
use serde::Serialize;

/// Running statistics for one quantity within one bucket.
///
/// `min`, `max` and their event names are only meaningful once `hits > 0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CounterAggregate {
    pub hits: u64,
    pub total: i64,
    pub sum_of_squares: f64,
    /// Most recent value, not necessarily between min and max of older data
    pub last: i64,
    pub min: i64,
    pub max: i64,
    pub min_event: String,
    pub max_event: String,
}

impl CounterAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one value. `event` names the value's origin and is only
    /// evaluated when the value becomes the new min or max; ties keep the
    /// first event seen.
    pub fn record<F>(&mut self, value: i64, event: F)
    where
        F: Fn() -> String,
    {
        let first = self.hits == 0;

        self.hits += 1;
        self.total = self.total.saturating_add(value);
        self.sum_of_squares += (value as f64) * (value as f64);
        self.last = value;

        if first || value < self.min {
            self.min = value;
            self.min_event = event();
        }
        if first || value > self.max {
            self.max = value;
            self.max_event = event();
        }
    }

    /// Mean value, NaN while empty
    pub fn avg(&self) -> f64 {
        if self.hits == 0 {
            return f64::NAN;
        }
        self.total as f64 / self.hits as f64
    }

    pub fn is_empty(&self) -> bool {
        self.hits == 0
    }
}

/// Elapsed-time aggregate: a counter aggregate over durations in
/// milliseconds, plus a latency histogram and the time spent in
/// sub-processes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ElapsedAggregate {
    pub durations: CounterAggregate,
    pub histogram: LatencyHistogram,
    pub sub_process_total: i64,
}

impl ElapsedAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<F>(&mut self, duration_ms: i64, sub_process_ms: i64, event: F)
    where
        F: Fn() -> String,
    {
        self.durations.record(duration_ms, event);
        self.histogram.record(duration_ms);
        self.sub_process_total = self.sub_process_total.saturating_add(sub_process_ms);
    }

    pub fn hits(&self) -> u64 {
        self.durations.hits
    }

    pub fn avg(&self) -> f64 {
        self.durations.avg()
    }

    /// Mean time spent in sub-processes, NaN while empty
    pub fn sub_avg(&self) -> f64 {
        if self.durations.hits == 0 {
            return f64::NAN;
        }
        self.sub_process_total as f64 / self.durations.hits as f64
    }
}
