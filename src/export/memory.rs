//! In-memory monitoring store.

use super::{CounterRecord, ExceptionRecord, MonitoringStore};
use crate::definitions::{CounterDefinition, DatabaseDefinition};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Default)]
struct Contents {
    databases: Vec<DatabaseDefinition>,
    counters: Vec<CounterDefinition>,
    records: Vec<CounterRecord>,
    exceptions: Vec<ExceptionRecord>,
    batches: usize,
}

/// Keeps everything it receives. Useful for embedding the engine in a
/// process that reads its own statistics, and for tests.
#[derive(Default)]
pub struct MemoryStore {
    contents: Mutex<Contents>,
    next_exception_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn databases(&self) -> Vec<DatabaseDefinition> {
        self.contents.lock().databases.clone()
    }

    pub fn counters(&self) -> Vec<CounterDefinition> {
        self.contents.lock().counters.clone()
    }

    /// All records received so far, in arrival order
    pub fn records(&self) -> Vec<CounterRecord> {
        self.contents.lock().records.clone()
    }

    /// Remove and return the records received so far
    pub fn take_records(&self) -> Vec<CounterRecord> {
        std::mem::take(&mut self.contents.lock().records)
    }

    pub fn exceptions(&self) -> Vec<ExceptionRecord> {
        self.contents.lock().exceptions.clone()
    }

    /// Number of `store_counters` calls received
    pub fn batch_count(&self) -> usize {
        self.contents.lock().batches
    }
}

impl MonitoringStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn create_database(&self, database: &DatabaseDefinition) -> anyhow::Result<()> {
        self.contents.lock().databases.push(database.clone());
        Ok(())
    }

    fn create_counter(&self, counter: &CounterDefinition) -> anyhow::Result<()> {
        self.contents.lock().counters.push(counter.clone());
        Ok(())
    }

    fn store_counters(&self, records: &[CounterRecord]) -> anyhow::Result<()> {
        let mut contents = self.contents.lock();
        contents.records.extend_from_slice(records);
        contents.batches += 1;
        Ok(())
    }

    fn handle_exception(&self, exception: &ExceptionRecord) -> anyhow::Result<i64> {
        self.contents.lock().exceptions.push(exception.clone());
        Ok(self.next_exception_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
