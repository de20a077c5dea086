//! Time granularities used to bucket aggregates.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use std::fmt;

/// A bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TimeLevel {
    /// Not retained; only used to name individual events
    Second,
    Minute,
    Hour,
}

impl TimeLevel {
    /// Levels kept in memory by an axis store, finest first
    pub const RETAINED: [TimeLevel; 2] = [TimeLevel::Minute, TimeLevel::Hour];

    /// Length of one bucket in seconds
    pub const fn interval_seconds(self) -> i64 {
        match self {
            TimeLevel::Second => 1,
            TimeLevel::Minute => 60,
            TimeLevel::Hour => 3_600,
        }
    }

    pub fn interval(self) -> Duration {
        Duration::seconds(self.interval_seconds())
    }

    /// Extended levels keep one aggregate per counter code besides elapsed time
    pub const fn is_extended(self) -> bool {
        !matches!(self, TimeLevel::Second)
    }

    /// `strftime` pattern rendering a bucket start at this resolution
    pub const fn bucket_format(self) -> &'static str {
        match self {
            TimeLevel::Second => "%Y-%m-%d %H:%M:%S",
            TimeLevel::Minute => "%Y-%m-%d %H:%M",
            TimeLevel::Hour => "%Y-%m-%d %H",
        }
    }

    /// Short code written into exported records
    pub const fn code(self) -> &'static str {
        match self {
            TimeLevel::Second => "SEC",
            TimeLevel::Minute => "MIN",
            TimeLevel::Hour => "HEU",
        }
    }

    /// Start of the bucket containing `at`
    pub fn truncate(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let secs = at.timestamp();
        let start = secs - secs.rem_euclid(self.interval_seconds());
        Utc.timestamp_opt(start, 0).single().unwrap_or(at)
    }

    /// End (exclusive) of the bucket starting at `bucket_start`
    pub fn bucket_end(self, bucket_start: DateTime<Utc>) -> DateTime<Utc> {
        bucket_start + self.interval()
    }

    pub fn format(self, at: DateTime<Utc>) -> String {
        at.format(self.bucket_format()).to_string()
    }
}

impl fmt::Display for TimeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
