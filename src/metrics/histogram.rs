use serde::Serialize;

/// Number of latency buckets.
pub const NUM_BUCKETS: usize = 8;

/// Inclusive upper bounds of the latency buckets in milliseconds.
/// Durations above the last bound are not counted in any bucket.
pub const LATENCY_BOUNDS_MS: [i64; NUM_BUCKETS] = [50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000];

/// Fixed latency histogram for elapsed-time aggregates.
///
/// Not synchronized: it lives inside a cube and is only touched under the
/// cube lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyHistogram {
    buckets: [u64; NUM_BUCKETS],
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `duration_ms` in the smallest bucket whose bound it does not
    /// exceed. Returns the bucket index, or `None` above 10 s.
    pub fn record(&mut self, duration_ms: i64) -> Option<usize> {
        let idx = bucket_index(duration_ms)?;
        self.buckets[idx] += 1;
        Some(idx)
    }

    /// Bucket counts, `[<=50ms, <=100ms, ..., <=10000ms]`
    pub fn counts(&self) -> [u64; NUM_BUCKETS] {
        self.buckets
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().sum()
    }
}

/// Returns the bucket index for a duration in milliseconds.
pub fn bucket_index(duration_ms: i64) -> Option<usize> {
    LATENCY_BOUNDS_MS.iter().position(|&bound| duration_ms <= bound)
}
