//! Engine façade: definitions, databases, process recording and export.
//!
//! An [`Analytics`] instance is created once at process start, shared
//! (usually behind an `Arc`) with the code it instruments, and disposed at
//! process end. Its lifecycle is:
//!
//! ```text
//! Idle --add_monitoring_store--> Running --dispose--> Stopped
//!   \____________________________dispose_____________/
//! ```
//!
//! # Example
//!
//! ```no_run
//! use hypercube::analytics::Analytics;
//! use hypercube::core::Config;
//! use hypercube::export::LogStore;
//! use hypercube::process::ProcessContext;
//! use std::sync::Arc;
//!
//! # fn main() -> hypercube::Result<()> {
//! let analytics = Analytics::new(Config::default())?;
//! analytics.open_database("SVC", "Service calls")?;
//! analytics.create_counter("SQL queries", "NB_SQL", 100, 500, 1)?;
//! analytics.add_monitoring_store(Arc::new(LogStore::new()))?;
//!
//! let mut ctx = ProcessContext::new();
//! analytics.start_process(&mut ctx, "GetCustomer");
//! analytics.inc_value(&mut ctx, "NB_SQL", 1)?;
//! let elapsed_ms = analytics.stop_process(&mut ctx, "SVC")?;
//! # let _ = elapsed_ms;
//!
//! analytics.dispose();
//! # Ok(())
//! # }
//! ```

mod scheduler;

use crate::core::{Config, CubeError, Result};
use crate::definitions::{CounterDefinition, DatabaseDefinition, DefinitionRepository};
use crate::export::{call_isolated, CounterRecord, ExceptionRecord, MonitoringStore, StoreSet};
use crate::metrics::{Cube, FlushMode, HyperCube, TimeLevel};
use crate::process::{CompletedProcess, ProcessContext, ProcessHandle};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use scheduler::FlushWorker;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Target of [`Analytics::reset`] addressing every database.
pub const RESET_ALL: &str = "ALL";

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Configured, no monitoring store, no flush thread
    Idle,
    /// Flush thread running
    Running,
    /// Disposed; terminal
    Stopped,
}

/// Call count and total duration of one process name, kept in summary
/// mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub count: u64,
    pub total_duration_ms: i64,
}

impl ProcessSummary {
    pub fn avg_duration_ms(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.total_duration_ms as f64 / self.count as f64
    }
}

/// A logical database: its definition and its hypercube.
pub struct Database {
    definition: DatabaseDefinition,
    cube: HyperCube,
    seq: u64,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &DatabaseDefinition {
        &self.definition
    }

    pub fn cube(&self) -> &HyperCube {
        &self.cube
    }
}

/// State shared between the façade and the flush thread.
pub(crate) struct Engine {
    config: Config,
    enabled: AtomicBool,
    summary_enabled: AtomicBool,
    definitions: DefinitionRepository,
    databases: DashMap<String, Arc<Database>>,
    next_seq: AtomicU64,
    stores: StoreSet,
    /// Serializes definition fan-out with store back-fill, so every store
    /// sees each definition exactly once. Stores must not call back into
    /// the engine from `create_counter` or `create_database`.
    registration: Mutex<()>,
    summary: Mutex<AHashMap<String, ProcessSummary>>,
}

impl Engine {
    fn database(&self, name: &str) -> Result<Arc<Database>> {
        self.databases
            .get(name)
            .map(|db| Arc::clone(db.value()))
            .ok_or_else(|| CubeError::unknown_database(name))
    }

    /// Databases in opening order
    fn databases(&self) -> Vec<Arc<Database>> {
        let mut databases: Vec<_> = self.databases.iter().map(|db| Arc::clone(db.value())).collect();
        databases.sort_by_key(|db| db.seq);
        databases
    }

    fn export_levels(&self) -> &'static [TimeLevel] {
        if self.config.flush.export_hour_level {
            &TimeLevel::RETAINED
        } else {
            &[TimeLevel::Minute]
        }
    }

    /// Drain every database and hand the records to every store. Returns
    /// the number of records exported. Without stores nothing is drained,
    /// so buckets stay pending until a store is registered.
    pub(crate) fn flush_pass(&self, now: DateTime<Utc>, mode: FlushMode) -> usize {
        if self.stores.is_empty() {
            return 0;
        }

        let levels = self.export_levels();
        let mut records = Vec::new();
        let mut cubes = Vec::new();
        for database in self.databases() {
            cubes.clear();
            database.cube.run_storage(levels, now, mode, &mut cubes);
            for cube in &cubes {
                records.extend(CounterRecord::from_cube(database.name(), cube, &self.definitions));
            }
        }

        if records.is_empty() {
            tracing::trace!("Flush pass found nothing to export");
            return 0;
        }

        let delivered = self
            .stores
            .dispatch("store_counters", |store| store.store_counters(&records))
            .len();
        tracing::debug!(
            records = records.len(),
            stores = self.stores.len(),
            delivered,
            ?mode,
            "Flush pass exported records"
        );
        records.len()
    }

    fn clear(&self) {
        self.databases.clear();
        self.definitions.clear();
        self.stores.clear();
        self.summary.lock().clear();
    }
}

/// The engine façade.
pub struct Analytics {
    engine: Arc<Engine>,
    state: Mutex<LifecycleState>,
    worker: Mutex<Option<FlushWorker>>,
}

impl Analytics {
    /// Create an idle engine from a validated configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            enabled = config.engine.enabled,
            summary_enabled = config.engine.summary_enabled,
            "Analytics engine created"
        );

        let engine = Engine {
            enabled: AtomicBool::new(config.engine.enabled),
            summary_enabled: AtomicBool::new(config.engine.summary_enabled),
            config,
            definitions: DefinitionRepository::new(),
            databases: DashMap::new(),
            next_seq: AtomicU64::new(0),
            stores: StoreSet::new(),
            registration: Mutex::new(()),
            summary: Mutex::new(AHashMap::new()),
        };

        Ok(Self {
            engine: Arc::new(engine),
            state: Mutex::new(LifecycleState::Idle),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.engine.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn is_enabled(&self) -> bool {
        self.engine.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.engine.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_summary_enabled(&self) -> bool {
        self.engine.summary_enabled.load(Ordering::Relaxed)
    }

    pub fn set_summary_enabled(&self, enabled: bool) {
        self.engine.summary_enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_tracing(&self) -> bool {
        self.is_enabled() || self.is_summary_enabled()
    }

    /// Define a counter. Redefining an existing code is a no-op and does
    /// not notify the monitoring stores again.
    pub fn create_counter(
        &self,
        label: &str,
        code: &str,
        warning_threshold: i64,
        critical_threshold: i64,
        priority: i32,
    ) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let definition =
            CounterDefinition::new(code, label, warning_threshold, critical_threshold, priority);
        if definition.code.is_empty() {
            return Err(CubeError::config("Counter code must not be empty"));
        }

        let _registration = self.engine.registration.lock();
        let (definition, created) = self.engine.definitions.register(definition);
        if created {
            tracing::debug!(code = %definition.code, "Counter defined");
            self.engine
                .stores
                .dispatch("create_counter", |store| store.create_counter(&definition));
        }
        Ok(())
    }

    /// Open a database. Opening an existing name is a no-op.
    pub fn open_database(&self, name: &str, description: &str) -> Result<()> {
        self.open_database_with(DatabaseDefinition::new(name, description))
    }

    pub fn open_database_with(&self, definition: DatabaseDefinition) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        if definition.name.trim().is_empty() {
            return Err(CubeError::config("Database name must not be empty"));
        }

        let engine = &self.engine;
        let _registration = engine.registration.lock();
        let created = match engine.databases.entry(definition.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let database = Arc::new(Database {
                    cube: HyperCube::new(&definition.name, engine.config.retention.clone()),
                    definition,
                    seq: engine.next_seq.fetch_add(1, Ordering::Relaxed),
                });
                slot.insert(Arc::clone(&database));
                Some(database)
            },
        };

        // Stores are notified outside the map shard lock
        if let Some(database) = created {
            tracing::info!(database = %database.name(), "Database opened");
            engine
                .stores
                .dispatch("create_database", |store| store.create_database(database.definition()));
        }
        Ok(())
    }

    /// Open a process in `ctx`. Returns `None` when instrumentation is off.
    pub fn start_process(&self, ctx: &mut ProcessContext, name: &str) -> Option<ProcessHandle> {
        if !self.is_tracing() {
            return None;
        }
        Some(ctx.start(name))
    }

    /// Add `delta` to a defined counter of the current process
    pub fn inc_value(&self, ctx: &mut ProcessContext, code: &str, delta: i64) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let definition = self
            .engine
            .definitions
            .get(code)
            .ok_or_else(|| CubeError::unknown_counter(code))?;
        ctx.inc_value(&definition.code, delta)
    }

    /// Close the current process of `ctx` and record it into `database`.
    /// Returns the duration in milliseconds, 0 when instrumentation is off.
    ///
    /// The process is closed even when the database is unknown.
    pub fn stop_process(&self, ctx: &mut ProcessContext, database: &str) -> Result<i64> {
        if !self.is_tracing() {
            // Keep the stack balanced when tracing was switched off mid-process
            if !ctx.is_empty() {
                ctx.stop_current()?;
            }
            return Ok(0);
        }

        let process = ctx.stop_current()?;
        self.finish(process, database)
    }

    /// Like [`Analytics::stop_process`], but fails with
    /// [`CubeError::NotCurrentProcess`] unless `handle` is the current
    /// process. The stack is left untouched on that error.
    pub fn stop_process_handle(
        &self,
        ctx: &mut ProcessContext,
        handle: ProcessHandle,
        database: &str,
    ) -> Result<i64> {
        if !self.is_tracing() {
            if !ctx.is_empty() {
                ctx.stop(handle)?;
            }
            return Ok(0);
        }

        let process = ctx.stop(handle)?;
        self.finish(process, database)
    }

    fn finish(&self, process: CompletedProcess, database: &str) -> Result<i64> {
        if !self.is_enabled() {
            let mut summary = self.engine.summary.lock();
            let entry = summary.entry(process.name.clone()).or_default();
            entry.count += 1;
            entry.total_duration_ms = entry.total_duration_ms.saturating_add(process.duration_ms);
            return Ok(process.duration_ms);
        }

        self.engine.database(database)?.cube.add_process(&process);
        Ok(process.duration_ms)
    }

    /// Record a process traced outside of [`Analytics::start_process`]
    pub fn record_process(&self, database: &str, process: &CompletedProcess) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.engine.database(database)?.cube.add_process(process);
        Ok(())
    }

    /// Clear the buckets of one database, or of all of them with
    /// [`RESET_ALL`] (which also clears the summary table).
    pub fn reset(&self, target: &str) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        if target.eq_ignore_ascii_case(RESET_ALL) {
            for database in self.engine.databases() {
                database.cube.reset();
            }
            self.engine.summary.lock().clear();
            return Ok(());
        }

        self.engine.database(target)?.cube.reset();
        Ok(())
    }

    /// Register a monitoring store. It first receives every known counter
    /// and database; the flush thread is started on the first store.
    pub fn add_monitoring_store(&self, store: Arc<dyn MonitoringStore>) -> Result<()> {
        if self.state() == LifecycleState::Stopped {
            return Err(CubeError::Disposed);
        }
        if !self.is_enabled() {
            return Ok(());
        }

        let registration = self.engine.registration.lock();
        for counter in self.engine.definitions.all() {
            call_isolated(store.as_ref(), "create_counter", |s| s.create_counter(&counter));
        }
        for database in self.engine.databases() {
            call_isolated(store.as_ref(), "create_database", |s| {
                s.create_database(database.definition())
            });
        }

        let name = store.name().to_string();
        let count = self.engine.stores.push(store);
        drop(registration);
        tracing::info!(store = %name, stores = count, "Monitoring store registered");

        self.ensure_started()
    }

    fn ensure_started(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let mut state = self.state.lock();
        if *state == LifecycleState::Stopped {
            return Err(CubeError::Disposed);
        }

        *worker = Some(FlushWorker::spawn(
            Arc::clone(&self.engine),
            self.engine.config.flush.interval,
        )?);
        *state = LifecycleState::Running;
        Ok(())
    }

    /// Forward an error report to every store. Returns the id assigned by
    /// the first store that accepted it.
    pub fn handle_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        database: Option<&str>,
    ) -> Option<i64> {
        if !self.is_enabled() {
            return None;
        }

        let record = ExceptionRecord::from_error(error, database);
        self.engine
            .stores
            .dispatch("handle_exception", |store| store.handle_exception(&record))
            .into_iter()
            .next()
    }

    /// Run one flush pass now, on the calling thread
    pub fn flush(&self, mode: FlushMode) -> usize {
        self.engine.flush_pass(Utc::now(), mode)
    }

    pub fn database(&self, name: &str) -> Option<Arc<Database>> {
        self.engine.database(name).ok()
    }

    /// Names of the open databases, in opening order
    pub fn database_names(&self) -> Vec<String> {
        self.engine
            .databases()
            .iter()
            .map(|db| db.name().to_string())
            .collect()
    }

    /// Snapshot of one bucket
    pub fn cube(
        &self,
        database: &str,
        axis: &str,
        level: TimeLevel,
        at: DateTime<Utc>,
    ) -> Result<Option<Cube>> {
        Ok(self.engine.database(database)?.cube.cube(axis, level, at))
    }

    pub fn counter_definition(&self, code: &str) -> Option<Arc<CounterDefinition>> {
        self.engine.definitions.get(code)
    }

    pub fn counter_definitions(&self) -> Vec<Arc<CounterDefinition>> {
        self.engine.definitions.all()
    }

    /// Summary-mode table, sorted by process name
    pub fn summary(&self) -> Vec<(String, ProcessSummary)> {
        let mut rows: Vec<_> = self
            .engine
            .summary
            .lock()
            .iter()
            .map(|(name, summary)| (name.clone(), *summary))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Stop the flush thread (running its final pass) and clear all state.
    /// Further calls are no-ops.
    pub fn dispose(&self) {
        // Same lock order as `ensure_started`, so no worker can be spawned
        // after this point.
        let worker = {
            let mut worker = self.worker.lock();
            let mut state = self.state.lock();
            if *state == LifecycleState::Stopped {
                return;
            }
            *state = LifecycleState::Stopped;
            worker.take()
        };

        if let Some(worker) = worker {
            worker.shutdown();
        }

        self.engine.enabled.store(false, Ordering::Relaxed);
        self.engine.summary_enabled.store(false, Ordering::Relaxed);
        self.engine.clear();
        tracing::info!("Analytics engine disposed");
    }
}

impl Drop for Analytics {
    fn drop(&mut self) {
        self.dispose();
    }
}
