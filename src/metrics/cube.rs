//! One time bucket of aggregated data.

use crate::metrics::aggregate::{CounterAggregate, ElapsedAggregate};
use crate::metrics::level::TimeLevel;
use crate::process::CompletedProcess;
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Reserved axis receiving every process.
pub const GLOBAL_AXIS: &str = "global";

/// Identity of a bucket: axis, truncated start time and level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CubeKey {
    axis: Arc<str>,
    bucket_start: DateTime<Utc>,
    level: TimeLevel,
}

impl CubeKey {
    /// Key of the bucket of `level` containing `at`. An empty axis maps to
    /// the global axis.
    pub fn new(axis: &str, at: DateTime<Utc>, level: TimeLevel) -> Self {
        let axis = if axis.is_empty() { GLOBAL_AXIS } else { axis };
        Self::with_shared_axis(Arc::from(axis), at, level)
    }

    pub(crate) fn with_shared_axis(axis: Arc<str>, at: DateTime<Utc>, level: TimeLevel) -> Self {
        Self {
            axis,
            bucket_start: level.truncate(at),
            level,
        }
    }

    pub fn axis(&self) -> &str {
        &self.axis
    }

    pub fn bucket_start(&self) -> DateTime<Utc> {
        self.bucket_start
    }

    pub fn bucket_end(&self) -> DateTime<Utc> {
        self.level.bucket_end(self.bucket_start)
    }

    pub fn level(&self) -> TimeLevel {
        self.level
    }

    pub fn is_global(&self) -> bool {
        &*self.axis == GLOBAL_AXIS
    }
}

impl fmt::Display for CubeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.axis, self.level, self.level.format(self.bucket_start))
    }
}

/// Aggregates of one bucket.
///
/// A cube is not synchronized itself; its retention store wraps it in a
/// mutex and every mutation or export happens under that lock.
#[derive(Debug, Clone, PartialEq)]
pub struct Cube {
    key: CubeKey,
    elapsed: ElapsedAggregate,
    /// Present only on extended levels
    counters: Option<AHashMap<String, CounterAggregate>>,
    first_hit: Option<DateTime<Utc>>,
    last_hit: Option<DateTime<Utc>>,
    modified: bool,
    expired: bool,
}

impl Cube {
    pub fn new(key: CubeKey) -> Self {
        let counters = key.level().is_extended().then(AHashMap::new);
        Self {
            key,
            elapsed: ElapsedAggregate::new(),
            counters,
            first_hit: None,
            last_hit: None,
            modified: false,
            expired: false,
        }
    }

    /// Fold one completed process into this bucket.
    pub fn add_value(&mut self, process: &CompletedProcess) {
        let at = process.timestamp();
        let global = self.key.is_global();
        // Provenance of a new min/max: the operation name on the global
        // axis, the event time on per-operation axes.
        let event = || {
            if global {
                process.name.clone()
            } else {
                TimeLevel::Second.format(at)
            }
        };

        self.elapsed
            .record(process.duration_ms, process.sub_processes_ms, &event);

        if let Some(counters) = self.counters.as_mut() {
            for (code, value) in &process.counters {
                counters
                    .entry(code.clone())
                    .or_default()
                    .record(*value, &event);
            }
        }

        if self.first_hit.map_or(true, |first| at < first) {
            self.first_hit = Some(at);
        }
        if self.last_hit.map_or(true, |last| at > last) {
            self.last_hit = Some(at);
        }
        self.modified = true;
    }

    /// Whether the bucket window has fully elapsed at `now`. Once true,
    /// stays true.
    pub fn check_expired(&mut self, now: DateTime<Utc>) -> bool {
        if !self.expired && now >= self.key.bucket_end() {
            self.expired = true;
        }
        self.expired
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn clear_modified(&mut self) {
        self.modified = false;
    }

    pub fn key(&self) -> &CubeKey {
        &self.key
    }

    pub fn elapsed(&self) -> &ElapsedAggregate {
        &self.elapsed
    }

    pub fn counter(&self, code: &str) -> Option<&CounterAggregate> {
        self.counters.as_ref()?.get(code)
    }

    /// Per-counter aggregates sorted by code; empty on non-extended levels
    pub fn counters(&self) -> Vec<(&str, &CounterAggregate)> {
        let mut counters: Vec<_> = self
            .counters
            .iter()
            .flat_map(|map| map.iter().map(|(code, agg)| (code.as_str(), agg)))
            .collect();
        counters.sort_by(|a, b| a.0.cmp(b.0));
        counters
    }

    pub fn first_hit(&self) -> Option<DateTime<Utc>> {
        self.first_hit
    }

    pub fn last_hit(&self) -> Option<DateTime<Utc>> {
        self.last_hit
    }
}
