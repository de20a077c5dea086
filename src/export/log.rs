//! Monitoring store writing every export as a structured log event.

use super::{CounterRecord, ExceptionRecord, MonitoringStore};
use crate::definitions::{CounterDefinition, DatabaseDefinition};
use std::sync::atomic::{AtomicI64, Ordering};

/// Emits `tracing` events under the `hypercube::export` target, each
/// carrying the JSON form of what it received.
#[derive(Default)]
pub struct LogStore {
    next_exception_id: AtomicI64,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MonitoringStore for LogStore {
    fn name(&self) -> &str {
        "log"
    }

    fn create_database(&self, database: &DatabaseDefinition) -> anyhow::Result<()> {
        tracing::info!(
            target: "hypercube::export",
            database = %database.name,
            description = %database.description,
            priority = database.priority,
            "Database opened"
        );
        Ok(())
    }

    fn create_counter(&self, counter: &CounterDefinition) -> anyhow::Result<()> {
        let json = serde_json::to_string(counter)?;
        tracing::info!(target: "hypercube::export", counter = %json, "Counter defined");
        Ok(())
    }

    fn store_counters(&self, records: &[CounterRecord]) -> anyhow::Result<()> {
        for record in records {
            let json = serde_json::to_string(record)?;
            tracing::info!(
                target: "hypercube::export",
                database = %record.database_name,
                axis = %record.axis,
                level = record.level,
                record = %json,
                "Counter record"
            );
        }
        tracing::debug!(target: "hypercube::export", count = records.len(), "Batch written");
        Ok(())
    }

    fn handle_exception(&self, exception: &ExceptionRecord) -> anyhow::Result<i64> {
        let id = self.next_exception_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::error!(
            target: "hypercube::export",
            id,
            database = exception.database_name.as_deref().unwrap_or("-"),
            causes = ?exception.causes,
            "{}",
            exception.message
        );
        Ok(id)
    }
}
