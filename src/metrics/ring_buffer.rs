//! Bounded retention of buckets for one (axis, level) pair.
//!
//! The store behaves as a ring buffer over bucket keys: buckets are kept in
//! creation order and, once the capacity is exceeded, the oldest bucket is
//! dropped. Lookup goes through a hash map so the hot path stays O(1).

use crate::metrics::cube::{Cube, CubeKey};
use crate::metrics::level::TimeLevel;
use crate::process::CompletedProcess;
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Which buckets a flush pass drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Modified buckets whose window has fully elapsed
    Expired,
    /// Every modified bucket, open or not
    All,
}

type SharedCube = Arc<Mutex<Cube>>;

#[derive(Default)]
struct Slots {
    cubes: AHashMap<CubeKey, SharedCube>,
    /// Keys in creation order, oldest first
    order: VecDeque<CubeKey>,
}

/// Fixed-capacity FIFO of cubes for one axis at one level.
pub struct RetentionStore {
    axis: Arc<str>,
    level: TimeLevel,
    capacity: usize,
    slots: Mutex<Slots>,
    evicted: AtomicU64,
    evicted_unexported: AtomicU64,
}

impl RetentionStore {
    /// Create a new store keeping at most `capacity` buckets
    pub fn new(axis: &str, level: TimeLevel, capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");

        Self {
            axis: Arc::from(axis),
            level,
            capacity,
            slots: Mutex::new(Slots::default()),
            evicted: AtomicU64::new(0),
            evicted_unexported: AtomicU64::new(0),
        }
    }

    /// Fold a completed process into the bucket matching its timestamp,
    /// creating the bucket (and evicting the oldest one) when needed.
    pub fn add_value(&self, process: &CompletedProcess) {
        let key = CubeKey::with_shared_axis(Arc::clone(&self.axis), process.timestamp(), self.level);
        let cube = self.get_or_insert(key);
        cube.lock().add_value(process);
    }

    fn get_or_insert(&self, key: CubeKey) -> SharedCube {
        let mut slots = self.slots.lock();
        if let Some(cube) = slots.cubes.get(&key) {
            return Arc::clone(cube);
        }

        tracing::debug!(bucket = %key, "Creating bucket");
        let cube = Arc::new(Mutex::new(Cube::new(key.clone())));
        slots.cubes.insert(key.clone(), Arc::clone(&cube));
        slots.order.push_back(key);

        if slots.cubes.len() > self.capacity {
            if let Some(oldest) = slots.order.pop_front() {
                if let Some(evicted) = slots.cubes.remove(&oldest) {
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    if evicted.lock().is_modified() {
                        self.evicted_unexported.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(bucket = %oldest, "Evicted a bucket that was never exported");
                    } else {
                        tracing::debug!(bucket = %oldest, "Evicted bucket");
                    }
                }
            }
        }

        cube
    }

    /// Append every drainable modified bucket to `out` and clear its
    /// modified flag. Copy and clear happen under the cube lock, so a write
    /// racing with the flush is either in the copy or still pending.
    pub fn run_storage(&self, now: DateTime<Utc>, mode: FlushMode, out: &mut Vec<Cube>) -> usize {
        let mut exported = 0;

        for shared in self.shared_cubes() {
            let mut cube = shared.lock();
            let expired = cube.check_expired(now);
            if cube.is_modified() && (expired || mode == FlushMode::All) {
                out.push(cube.clone());
                cube.clear_modified();
                exported += 1;
            }
        }

        exported
    }

    fn shared_cubes(&self) -> Vec<SharedCube> {
        let slots = self.slots.lock();
        slots
            .order
            .iter()
            .filter_map(|key| slots.cubes.get(key).cloned())
            .collect()
    }

    /// Snapshot of the bucket containing `at`
    pub fn cube_at(&self, at: DateTime<Utc>) -> Option<Cube> {
        let key = CubeKey::with_shared_axis(Arc::clone(&self.axis), at, self.level);
        let shared = self.slots.lock().cubes.get(&key).cloned()?;
        let cube = shared.lock().clone();
        Some(cube)
    }

    /// Snapshots of all buckets, oldest first
    pub fn snapshots(&self) -> Vec<Cube> {
        self.shared_cubes()
            .iter()
            .map(|shared| shared.lock().clone())
            .collect()
    }

    /// Bucket keys, oldest first
    pub fn keys(&self) -> Vec<CubeKey> {
        self.slots.lock().order.iter().cloned().collect()
    }

    pub fn axis(&self) -> &str {
        &self.axis
    }

    pub fn level(&self) -> TimeLevel {
        self.level
    }

    /// Get current number of buckets
    pub fn len(&self) -> usize {
        self.slots.lock().cubes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buckets dropped because the store was full
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Evicted buckets that still held unexported data
    pub fn evicted_unexported_count(&self) -> u64 {
        self.evicted_unexported.load(Ordering::Relaxed)
    }

    /// Drop every bucket
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.cubes.clear();
        slots.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn minute(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, m, 0).unwrap()
    }

    fn process_at(at: DateTime<Utc>, duration_ms: i64) -> CompletedProcess {
        CompletedProcess::new("OpA", at, duration_ms)
    }

    #[test]
    fn test_store_creation() {
        let store = RetentionStore::new("global", TimeLevel::Minute, 12);

        assert_eq!(store.capacity(), 12);
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert!(!store.is_full());
        assert_eq!(store.level(), TimeLevel::Minute);
    }

    #[test]
    #[should_panic(expected = "Capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        RetentionStore::new("global", TimeLevel::Minute, 0);
    }

    #[test]
    fn test_same_bucket_is_reused() {
        let store = RetentionStore::new("global", TimeLevel::Minute, 4);
        store.add_value(&process_at(minute(1), 10));
        store.add_value(&process_at(minute(1) + Duration::seconds(30), 20));

        assert_eq!(store.len(), 1);
        let cube = store.cube_at(minute(1)).unwrap();
        assert_eq!(cube.elapsed().hits(), 2);
        assert_eq!(cube.elapsed().durations.total, 30);
    }

    #[test]
    fn test_overflow_evicts_first_inserted() {
        let store = RetentionStore::new("global", TimeLevel::Minute, 3);
        for m in 0..3 {
            store.add_value(&process_at(minute(m), 10));
        }
        assert!(store.is_full());

        // Touching the oldest bucket does not protect it: eviction is FIFO
        store.add_value(&process_at(minute(0), 10));
        store.add_value(&process_at(minute(3), 10));

        assert_eq!(store.len(), 3);
        assert_eq!(
            store.keys().iter().map(|k| k.bucket_start()).collect::<Vec<_>>(),
            vec![minute(1), minute(2), minute(3)]
        );
        assert!(store.cube_at(minute(0)).is_none());
        assert_eq!(store.evicted_count(), 1);
        assert_eq!(store.evicted_unexported_count(), 1);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let store = RetentionStore::new("global", TimeLevel::Minute, 2);
        for m in 0..20 {
            store.add_value(&process_at(minute(m), 1));
            assert!(store.len() <= 2);
        }
        assert_eq!(store.evicted_count(), 18);
    }

    #[test]
    fn test_run_storage_exports_expired_modified_once() {
        let store = RetentionStore::new("global", TimeLevel::Minute, 4);
        store.add_value(&process_at(minute(1), 10));
        store.add_value(&process_at(minute(2), 10));

        // Bucket 2 is still open at 10:02:30
        let mut out = Vec::new();
        assert_eq!(store.run_storage(minute(2) + Duration::seconds(30), FlushMode::Expired, &mut out), 1);
        assert_eq!(out[0].key().bucket_start(), minute(1));

        // Nothing new: nothing exported
        out.clear();
        assert_eq!(store.run_storage(minute(5), FlushMode::Expired, &mut out), 1);
        assert_eq!(out[0].key().bucket_start(), minute(2));

        out.clear();
        assert_eq!(store.run_storage(minute(5), FlushMode::Expired, &mut out), 0);

        // A late write re-arms the bucket
        store.add_value(&process_at(minute(1), 99));
        assert_eq!(store.run_storage(minute(5), FlushMode::Expired, &mut out), 1);
        assert_eq!(out[0].elapsed().hits(), 2);
    }

    #[test]
    fn test_run_storage_all_drains_open_buckets() {
        let store = RetentionStore::new("global", TimeLevel::Minute, 4);
        store.add_value(&process_at(minute(7), 10));

        let mut out = Vec::new();
        assert_eq!(store.run_storage(minute(7), FlushMode::Expired, &mut out), 0);
        assert_eq!(store.run_storage(minute(7), FlushMode::All, &mut out), 1);
        assert!(!store.cube_at(minute(7)).unwrap().is_modified());
    }

    #[test]
    fn test_clear() {
        let store = RetentionStore::new("global", TimeLevel::Hour, 2);
        store.add_value(&process_at(minute(1), 10));
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
        assert!(store.snapshots().is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let store = Arc::new(RetentionStore::new("global", TimeLevel::Hour, 2));
        let at = minute(30);
        let mut handles = vec![];

        for thread_id in 0..4 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    store.add_value(&process_at(at, thread_id * 1000 + i));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let cube = store.cube_at(at).unwrap();
        let expected: i64 = (0..4).flat_map(|t| (0..500).map(move |i| t * 1000 + i)).sum();
        assert_eq!(cube.elapsed().hits(), 2000);
        assert_eq!(cube.elapsed().durations.total, expected);
        assert_eq!(cube.elapsed().durations.min, 0);
        assert_eq!(cube.elapsed().durations.max, 3499);
    }

    #[test]
    fn test_writes_racing_with_flush_stay_pending() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let store = Arc::new(RetentionStore::new("global", TimeLevel::Minute, 12));
        let at = minute(5);
        let now = minute(6);
        let done = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        store.add_value(&process_at(at, 5));
                    }
                })
            })
            .collect();

        let flusher = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut exported = Vec::new();
                while !done.load(Ordering::SeqCst) {
                    store.run_storage(now, FlushMode::All, &mut exported);
                }
                exported
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        let mut exported = flusher.join().unwrap();
        store.run_storage(now, FlushMode::All, &mut exported);

        // The newest export holds every write
        let newest = exported.iter().map(|c| c.elapsed().hits()).max().unwrap();
        assert_eq!(newest, 4000);
        assert_eq!(exported.last().unwrap().elapsed().hits(), 4000);
        assert!(!store.cube_at(at).unwrap().is_modified());
    }
}
