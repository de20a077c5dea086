//! Export of aggregated buckets to monitoring stores.
//!
//! A monitoring store is any external consumer of counter data: a
//! database writer, a log, an in-memory collector. The engine hands each
//! store the definitions it knows and, on every flush pass, a batch of
//! flat [`CounterRecord`]s. A failing store never affects the engine or
//! the other stores.

use crate::definitions::{CounterDefinition, DatabaseDefinition, DefinitionRepository};
use crate::metrics::histogram::NUM_BUCKETS;
use crate::metrics::{Cube, CounterAggregate};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub mod log;
pub mod memory;

pub use self::log::LogStore;
pub use memory::MemoryStore;

/// Code whose label, when registered, names the elapsed-time records.
pub const ELAPSED_TIME_CODE: &str = "ELAPSED_TIME";

/// Destination for exported counter data.
///
/// Implementations are called from the flush thread and from caller
/// threads (definition registration), so they must be `Send + Sync`.
pub trait MonitoringStore: Send + Sync {
    /// Returns the store's name for logging.
    fn name(&self) -> &str;

    /// A database was opened.
    fn create_database(&self, database: &DatabaseDefinition) -> anyhow::Result<()>;

    /// A counter was defined.
    fn create_counter(&self, counter: &CounterDefinition) -> anyhow::Result<()>;

    /// Persist one flush batch.
    fn store_counters(&self, records: &[CounterRecord]) -> anyhow::Result<()>;

    /// Persist an exception report and return the id assigned to it.
    fn handle_exception(&self, exception: &ExceptionRecord) -> anyhow::Result<i64>;
}

/// One exported aggregate: the elapsed time of a bucket
/// (`counter_code == None`) or one counter of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterRecord {
    pub database_name: String,
    pub axis: String,
    /// "MIN" or "HEU"
    pub level: &'static str,
    pub bucket_start: DateTime<Utc>,
    pub counter_code: Option<String>,
    pub counter_label: Option<String>,
    pub hits: u64,
    pub last: i64,
    pub min: i64,
    pub min_event_name: String,
    pub max: i64,
    pub max_event_name: String,
    pub total: i64,
    pub sum_of_squares: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_histogram: Option<[u64; NUM_BUCKETS]>,
}

impl CounterRecord {
    /// Flatten a cube: one elapsed-time record followed by one record per
    /// counter code, sorted by code.
    pub fn from_cube(
        database: &str,
        cube: &Cube,
        definitions: &DefinitionRepository,
    ) -> Vec<CounterRecord> {
        let elapsed = cube.elapsed();
        let mut records = Vec::with_capacity(1 + cube.counters().len());

        let mut record = Self::base(
            database,
            cube,
            None,
            definitions.get(ELAPSED_TIME_CODE).map(|d| d.label.clone()),
            &elapsed.durations,
        );
        record.sub_avg = Some(elapsed.sub_avg());
        record.latency_histogram = Some(elapsed.histogram.counts());
        records.push(record);

        for (code, aggregate) in cube.counters() {
            let label = definitions.get(code).map(|d| d.label.clone());
            records.push(Self::base(database, cube, Some(code.to_string()), label, aggregate));
        }

        records
    }

    fn base(
        database: &str,
        cube: &Cube,
        counter_code: Option<String>,
        counter_label: Option<String>,
        aggregate: &CounterAggregate,
    ) -> Self {
        let key = cube.key();
        Self {
            database_name: database.to_string(),
            axis: key.axis().to_string(),
            level: key.level().code(),
            bucket_start: key.bucket_start(),
            counter_code,
            counter_label,
            hits: aggregate.hits,
            last: aggregate.last,
            min: aggregate.min,
            min_event_name: aggregate.min_event.clone(),
            max: aggregate.max,
            max_event_name: aggregate.max_event.clone(),
            total: aggregate.total,
            sum_of_squares: aggregate.sum_of_squares,
            sub_avg: None,
            latency_histogram: None,
        }
    }

    /// Mean value, NaN when there are no hits
    pub fn avg(&self) -> f64 {
        if self.hits == 0 {
            return f64::NAN;
        }
        self.total as f64 / self.hits as f64
    }

    pub fn is_elapsed_time(&self) -> bool {
        self.counter_code.is_none()
    }
}

/// Exception report forwarded to monitoring stores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionRecord {
    pub database_name: Option<String>,
    pub message: String,
    /// Messages of the source chain, outermost first
    pub causes: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ExceptionRecord {
    pub fn from_error(error: &(dyn std::error::Error + 'static), database: Option<&str>) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            database_name: database.map(str::to_string),
            message: error.to_string(),
            causes,
            occurred_at: Utc::now(),
        }
    }
}

/// Run one store call, turning both errors and panics into a logged
/// `None`.
pub(crate) fn call_isolated<T, F>(store: &dyn MonitoringStore, operation: &str, call: F) -> Option<T>
where
    F: FnOnce(&dyn MonitoringStore) -> anyhow::Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| call(store))) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::error!(store = store.name(), operation, "Monitoring store failed: {:#}", e);
            None
        },
        Err(_) => {
            tracing::error!(store = store.name(), operation, "Monitoring store panicked");
            None
        },
    }
}

/// Registered monitoring stores.
#[derive(Default)]
pub struct StoreSet {
    stores: RwLock<Vec<Arc<dyn MonitoringStore>>>,
}

impl StoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store; returns the number of stores afterwards
    pub fn push(&self, store: Arc<dyn MonitoringStore>) -> usize {
        let mut stores = self.stores.write();
        stores.push(store);
        stores.len()
    }

    /// Call every store, in registration order, and collect the
    /// successful results. The lock is not held during the calls.
    pub fn dispatch<T, F>(&self, operation: &str, call: F) -> Vec<T>
    where
        F: Fn(&dyn MonitoringStore) -> anyhow::Result<T>,
    {
        let stores = self.stores.read().clone();
        stores
            .iter()
            .filter_map(|store| call_isolated(store.as_ref(), operation, &call))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.stores.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{CubeKey, TimeLevel, GLOBAL_AXIS};
    use crate::process::CompletedProcess;
    use anyhow::bail;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    struct Broken;

    impl MonitoringStore for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn create_database(&self, _: &DatabaseDefinition) -> anyhow::Result<()> {
            bail!("database refused")
        }

        fn create_counter(&self, _: &CounterDefinition) -> anyhow::Result<()> {
            panic!("counter table missing")
        }

        fn store_counters(&self, _: &[CounterRecord]) -> anyhow::Result<()> {
            bail!("disk full")
        }

        fn handle_exception(&self, _: &ExceptionRecord) -> anyhow::Result<i64> {
            bail!("no exception table")
        }
    }

    fn sample_cube() -> Cube {
        let at = Utc.with_ymd_and_hms(2024, 8, 8, 8, 8, 0).unwrap();
        let mut cube = Cube::new(CubeKey::new(GLOBAL_AXIS, at, TimeLevel::Minute));
        cube.add_value(&CompletedProcess::new("OpA", at, 30).with_counter("NB_SQL", 4));
        cube.add_value(
            &CompletedProcess::new("OpB", at, 70)
                .with_counter("NB_SQL", 1)
                .with_counter("AAA", 9)
                .with_sub_processes_ms(20),
        );
        cube
    }

    #[test]
    fn test_records_from_cube() {
        let definitions = DefinitionRepository::new();
        definitions.register(CounterDefinition::new("NB_SQL", "SQL calls", 0, 0, 0));
        definitions.register(CounterDefinition::new(ELAPSED_TIME_CODE, "Elapsed", 0, 0, 0));

        let records = CounterRecord::from_cube("SVC", &sample_cube(), &definitions);
        assert_eq!(records.len(), 3);

        let elapsed = &records[0];
        assert!(elapsed.is_elapsed_time());
        assert_eq!(elapsed.counter_label.as_deref(), Some("Elapsed"));
        assert_eq!(elapsed.level, "MIN");
        assert_eq!(elapsed.axis, "global");
        assert_eq!(elapsed.hits, 2);
        assert_eq!(elapsed.total, 100);
        assert_eq!((elapsed.min, elapsed.min_event_name.as_str()), (30, "OpA"));
        assert_eq!((elapsed.max, elapsed.max_event_name.as_str()), (70, "OpB"));
        assert_eq!(elapsed.sub_avg, Some(10.0));
        assert_eq!(elapsed.latency_histogram, Some([1, 1, 0, 0, 0, 0, 0, 0]));
        assert_eq!(elapsed.avg(), 50.0);

        assert_eq!(records[1].counter_code.as_deref(), Some("AAA"));
        assert_eq!(records[1].counter_label, None);
        assert_eq!(records[2].counter_code.as_deref(), Some("NB_SQL"));
        assert_eq!(records[2].counter_label.as_deref(), Some("SQL calls"));
        assert_eq!(records[2].total, 5);
        assert_eq!(records[2].sub_avg, None);
    }

    #[test]
    fn test_record_serializes_flat() {
        let records = CounterRecord::from_cube("SVC", &sample_cube(), &DefinitionRepository::new());
        let json = serde_json::to_value(&records[1]).unwrap();

        assert_eq!(json["database_name"], "SVC");
        assert_eq!(json["counter_code"], "AAA");
        assert!(json.get("latency_histogram").is_none());
    }

    #[test]
    fn test_dispatch_isolates_failures() {
        let stores = StoreSet::new();
        let memory = Arc::new(MemoryStore::new());
        stores.push(Arc::new(Broken));
        stores.push(Arc::clone(&memory) as Arc<dyn MonitoringStore>);

        let ids = stores.dispatch("create_counter", |s| {
            s.create_counter(&CounterDefinition::new("X", "x", 0, 0, 0))
        });
        assert_eq!(ids.len(), 1);
        assert_eq!(memory.counters().len(), 1);

        let ok = stores.dispatch("store_counters", |s| s.store_counters(&[]));
        assert_eq!(ok.len(), 1);
        assert_eq!(memory.batch_count(), 1);
    }

    #[test]
    fn test_exception_record_walks_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let outer = crate::core::CubeError::from(inner);
        let record = ExceptionRecord::from_error(&outer, Some("SVC"));

        assert_eq!(record.message, "IO error: socket closed");
        assert_eq!(record.causes, vec!["socket closed".to_string()]);
        assert_eq!(record.database_name.as_deref(), Some("SVC"));
    }
}
