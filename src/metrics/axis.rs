use crate::core::RetentionConfig;
use crate::metrics::cube::Cube;
use crate::metrics::level::TimeLevel;
use crate::metrics::ring_buffer::{FlushMode, RetentionStore};
use crate::process::CompletedProcess;
use chrono::{DateTime, Utc};

/// All retained levels of one axis.
pub struct AxisStore {
    name: String,
    stores: Vec<RetentionStore>,
}

impl AxisStore {
    pub fn new(name: &str, retention: &RetentionConfig) -> Self {
        let stores = TimeLevel::RETAINED
            .iter()
            .map(|&level| RetentionStore::new(name, level, capacity_for(retention, level)))
            .collect();

        Self {
            name: name.to_string(),
            stores,
        }
    }

    /// Record a completed process at every retained level
    pub fn add_process(&self, process: &CompletedProcess) {
        for store in &self.stores {
            store.add_value(process);
        }
    }

    /// Drain the stores of the given levels into `out`
    pub fn run_storage(
        &self,
        levels: &[TimeLevel],
        now: DateTime<Utc>,
        mode: FlushMode,
        out: &mut Vec<Cube>,
    ) -> usize {
        self.stores
            .iter()
            .filter(|store| levels.contains(&store.level()))
            .map(|store| store.run_storage(now, mode, out))
            .sum()
    }

    pub fn store(&self, level: TimeLevel) -> Option<&RetentionStore> {
        self.stores.iter().find(|store| store.level() == level)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clear(&self) {
        for store in &self.stores {
            store.clear();
        }
    }
}

fn capacity_for(retention: &RetentionConfig, level: TimeLevel) -> usize {
    match level {
        TimeLevel::Hour => retention.hour_capacity,
        TimeLevel::Minute | TimeLevel::Second => retention.minute_capacity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fans_out_to_minute_and_hour() {
        let axis = AxisStore::new("OpA", &RetentionConfig::default());
        let at = Utc.with_ymd_and_hms(2024, 2, 2, 8, 15, 0).unwrap();
        axis.add_process(&CompletedProcess::new("OpA", at, 10));

        let minute = axis.store(TimeLevel::Minute).unwrap();
        let hour = axis.store(TimeLevel::Hour).unwrap();
        assert_eq!(minute.capacity(), 12);
        assert_eq!(hour.capacity(), 2);
        assert_eq!(minute.cube_at(at).unwrap().elapsed().hits(), 1);
        assert_eq!(hour.cube_at(at).unwrap().elapsed().hits(), 1);
        assert!(axis.store(TimeLevel::Second).is_none());
    }

    #[test]
    fn test_run_storage_filters_levels() {
        let axis = AxisStore::new("OpA", &RetentionConfig::default());
        let at = Utc.with_ymd_and_hms(2024, 2, 2, 8, 15, 0).unwrap();
        axis.add_process(&CompletedProcess::new("OpA", at, 10));

        let later = at + chrono::Duration::hours(2);
        let mut out = Vec::new();
        assert_eq!(axis.run_storage(&[TimeLevel::Minute], later, FlushMode::Expired, &mut out), 1);
        assert_eq!(out[0].key().level(), TimeLevel::Minute);

        assert_eq!(axis.run_storage(&TimeLevel::RETAINED, later, FlushMode::Expired, &mut out), 1);
        assert_eq!(out[1].key().level(), TimeLevel::Hour);

        axis.clear();
        assert!(axis.store(TimeLevel::Minute).unwrap().is_empty());
    }
}
