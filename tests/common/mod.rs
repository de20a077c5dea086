//! Common test utilities and fixtures.

#![allow(dead_code)]

use anyhow::bail;
use hypercube::core::{Config, ConfigBuilder};
use hypercube::definitions::{CounterDefinition, DatabaseDefinition};
use hypercube::export::{CounterRecord, ExceptionRecord, MemoryStore, MonitoringStore};
use hypercube::Analytics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DATABASE: &str = "SVC";

/// Engine with one database and the usual counters, plus an attached
/// memory store.
pub struct Fixture {
    pub analytics: Analytics,
    pub store: Arc<MemoryStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let analytics = Analytics::new(config).unwrap();
        analytics.open_database(DATABASE, "Service calls").unwrap();
        analytics.create_counter("SQL queries", "NB_SQL", 20, 50, 1).unwrap();
        analytics.create_counter("Rows read", "NB_ROWS", 1000, 5000, 2).unwrap();

        let store = Arc::new(MemoryStore::new());
        analytics.add_monitoring_store(store.clone()).unwrap();
        Self { analytics, store }
    }

    /// Fixture flushing every `interval`
    pub fn with_interval(interval: Duration) -> Self {
        Self::with_config(ConfigBuilder::new().flush_interval(interval).build().unwrap())
    }
}

/// Store failing every call, by error or by panic.
#[derive(Default)]
pub struct FailingStore {
    pub panics: bool,
    pub calls: AtomicUsize,
}

impl FailingStore {
    pub fn panicking() -> Self {
        Self {
            panics: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self, what: &str) -> anyhow::Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("{what} exploded");
        }
        bail!("{what} unavailable")
    }
}

impl MonitoringStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    fn create_database(&self, _: &DatabaseDefinition) -> anyhow::Result<()> {
        self.fail("database table")
    }

    fn create_counter(&self, _: &CounterDefinition) -> anyhow::Result<()> {
        self.fail("counter table")
    }

    fn store_counters(&self, _: &[CounterRecord]) -> anyhow::Result<()> {
        self.fail("counter storage")
    }

    fn handle_exception(&self, _: &ExceptionRecord) -> anyhow::Result<i64> {
        self.fail("exception table")
    }
}

/// Elapsed-time record of one axis
pub fn elapsed_record<'a>(records: &'a [CounterRecord], axis: &str) -> Option<&'a CounterRecord> {
    records
        .iter()
        .find(|r| r.axis == axis && r.is_elapsed_time())
}

/// Counter record of one axis
pub fn counter_record<'a>(
    records: &'a [CounterRecord],
    axis: &str,
    code: &str,
) -> Option<&'a CounterRecord> {
    records
        .iter()
        .find(|r| r.axis == axis && r.counter_code.as_deref() == Some(code))
}
