//! All axes of one logical database.

use crate::core::RetentionConfig;
use crate::metrics::axis::AxisStore;
use crate::metrics::cube::{Cube, GLOBAL_AXIS};
use crate::metrics::level::TimeLevel;
use crate::metrics::ring_buffer::FlushMode;
use crate::process::CompletedProcess;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// One [`AxisStore`] per axis: the reserved global axis plus one per
/// process name seen.
pub struct HyperCube {
    name: String,
    retention: RetentionConfig,
    axes: DashMap<String, Arc<AxisStore>>,
}

impl HyperCube {
    pub fn new(name: &str, retention: RetentionConfig) -> Self {
        Self {
            name: name.to_string(),
            retention,
            axes: DashMap::new(),
        }
    }

    /// Existing store for `axis`, or a new one. Only creation takes the
    /// shard write lock. An empty axis is the global one.
    pub fn get_or_create_axis_store(&self, axis: &str) -> Arc<AxisStore> {
        let axis = axis_name(axis);
        if let Some(store) = self.axes.get(axis) {
            return Arc::clone(store.value());
        }

        let store = self
            .axes
            .entry(axis.to_string())
            .or_insert_with(|| {
                tracing::debug!(database = %self.name, axis, "Creating axis store");
                Arc::new(AxisStore::new(axis, &self.retention))
            });
        Arc::clone(store.value())
    }

    /// Record a process on the global axis and on its own name's axis
    pub fn add_process(&self, process: &CompletedProcess) {
        self.get_or_create_axis_store(GLOBAL_AXIS).add_process(process);
        if axis_name(&process.name) != GLOBAL_AXIS {
            self.get_or_create_axis_store(&process.name)
                .add_process(process);
        }
    }

    /// Collect drainable buckets of the given levels from every axis
    pub fn run_storage(
        &self,
        levels: &[TimeLevel],
        now: DateTime<Utc>,
        mode: FlushMode,
        out: &mut Vec<Cube>,
    ) -> usize {
        // Clone the stores out first so no shard lock is held while cubes
        // are locked.
        let stores: Vec<Arc<AxisStore>> = self.axes.iter().map(|e| Arc::clone(e.value())).collect();
        stores
            .iter()
            .map(|store| store.run_storage(levels, now, mode, out))
            .sum()
    }

    pub fn axis(&self, axis: &str) -> Option<Arc<AxisStore>> {
        self.axes.get(axis_name(axis)).map(|e| Arc::clone(e.value()))
    }

    /// Snapshot of the bucket of `level` containing `at` on `axis`
    pub fn cube(&self, axis: &str, level: TimeLevel, at: DateTime<Utc>) -> Option<Cube> {
        self.axis(axis)?.store(level)?.cube_at(at)
    }

    /// All retained buckets of `axis` at `level`, oldest first
    pub fn snapshot(&self, axis: &str, level: TimeLevel) -> Vec<Cube> {
        self.axis(axis)
            .and_then(|store| store.store(level).map(|s| s.snapshots()))
            .unwrap_or_default()
    }

    /// Axis names, sorted
    pub fn axis_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.axes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop every axis and its buckets
    pub fn reset(&self) {
        self.axes.clear();
        tracing::info!(database = %self.name, "Hypercube reset");
    }
}

fn axis_name(axis: &str) -> &str {
    if axis.is_empty() {
        GLOBAL_AXIS
    } else {
        axis
    }
}
