//! Nested process tracer.
//!
//! A [`ProcessContext`] holds the stack of open processes for one unit of
//! work (a request, a job, a worker loop iteration). It is owned by the
//! caller and never shared between threads. Closing a process rolls its
//! duration and counters up into its parent and yields a
//! [`CompletedProcess`] that can be recorded into a hypercube.

use crate::core::{CubeError, Result};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use std::time::Instant;

/// Handle to an open process, returned by [`ProcessContext::start`].
#[must_use = "a process handle must be passed back to stop the process"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    id: u64,
    depth: usize,
}

impl ProcessHandle {
    /// Nesting depth, 0 for a root process
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[derive(Debug)]
struct CounterProcess {
    id: u64,
    name: String,
    started_at: DateTime<Utc>,
    started: Instant,
    counters: AHashMap<String, i64>,
    sub_processes_ms: i64,
}

impl CounterProcess {
    fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            counters: AHashMap::new(),
            sub_processes_ms: 0,
        }
    }

    fn inc(&mut self, code: &str, delta: i64) {
        match self.counters.get_mut(code) {
            Some(value) => *value = value.saturating_add(delta),
            None => {
                self.counters.insert(code.to_string(), delta);
            },
        }
    }

    /// Close this process, merging it into `parent` when present.
    fn close(self, parent: Option<&mut CounterProcess>) -> CompletedProcess {
        let duration_ms = i64::try_from(self.started.elapsed().as_millis()).unwrap_or(i64::MAX);

        if let Some(parent) = parent {
            parent.sub_processes_ms = parent.sub_processes_ms.saturating_add(duration_ms);
            for (code, value) in &self.counters {
                parent.inc(code, *value);
            }
        }

        CompletedProcess {
            name: self.name,
            started_at: self.started_at,
            ended_at: Utc::now(),
            duration_ms,
            sub_processes_ms: self.sub_processes_ms,
            counters: self.counters,
        }
    }
}

/// A closed process, ready to be aggregated.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedProcess {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// Time spent in already-closed child processes
    pub sub_processes_ms: i64,
    /// Own counters plus everything rolled up from children
    pub counters: AHashMap<String, i64>,
}

impl CompletedProcess {
    /// Build a completed process directly, without tracing it.
    /// `started_at` falls back to `ended_at` when the duration does not fit
    /// in the calendar.
    pub fn new(name: &str, ended_at: DateTime<Utc>, duration_ms: i64) -> Self {
        let started_at = chrono::Duration::try_milliseconds(duration_ms)
            .and_then(|elapsed| ended_at.checked_sub_signed(elapsed))
            .unwrap_or(ended_at);
        Self {
            name: name.to_string(),
            started_at,
            ended_at,
            duration_ms,
            sub_processes_ms: 0,
            counters: AHashMap::new(),
        }
    }

    pub fn with_counter(mut self, code: &str, value: i64) -> Self {
        self.counters.insert(code.to_string(), value);
        self
    }

    pub fn with_sub_processes_ms(mut self, sub_processes_ms: i64) -> Self {
        self.sub_processes_ms = sub_processes_ms;
        self
    }

    /// Instant used to pick the bucket this process lands in
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.ended_at
    }

    pub fn counter(&self, code: &str) -> Option<i64> {
        self.counters.get(code).copied()
    }
}

/// Stack of open processes for one unit of work.
#[derive(Debug, Default)]
pub struct ProcessContext {
    stack: Vec<CounterProcess>,
    next_id: u64,
}

impl ProcessContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a process as a child of the current one (or as a root) and
    /// make it current.
    pub fn start(&mut self, name: &str) -> ProcessHandle {
        let id = self.next_id;
        self.next_id += 1;

        let depth = self.stack.len();
        self.stack.push(CounterProcess::new(id, name));
        ProcessHandle { id, depth }
    }

    /// Add `delta` to counter `code` of the current process. The code is
    /// stored as given; callers are expected to pass canonical codes.
    pub fn inc_value(&mut self, code: &str, delta: i64) -> Result<()> {
        let current = self.stack.last_mut().ok_or(CubeError::NoActiveProcess)?;
        current.inc(code, delta);
        Ok(())
    }

    /// Close the process behind `handle`, which must be the current one.
    pub fn stop(&mut self, handle: ProcessHandle) -> Result<CompletedProcess> {
        match self.stack.last() {
            None => Err(CubeError::NoActiveProcess),
            Some(current) if current.id != handle.id => Err(CubeError::NotCurrentProcess {
                name: current.name.clone(),
            }),
            Some(_) => self.stop_current(),
        }
    }

    /// Close the current process and make its parent current.
    pub fn stop_current(&mut self) -> Result<CompletedProcess> {
        let process = self.stack.pop().ok_or(CubeError::NoActiveProcess)?;
        Ok(process.close(self.stack.last_mut()))
    }

    pub fn current_name(&self) -> Option<&str> {
        self.stack.last().map(|p| p.name.as_str())
    }

    /// Current value of `code` on the current process
    pub fn current_counter(&self, code: &str) -> Option<i64> {
        self.stack.last()?.counters.get(code).copied()
    }

    /// Number of open processes
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_start_stop_root() {
        let mut ctx = ProcessContext::new();
        let handle = ctx.start("OpA");
        assert_eq!(handle.depth(), 0);
        assert_eq!(ctx.current_name(), Some("OpA"));

        thread::sleep(Duration::from_millis(5));
        let done = ctx.stop(handle).unwrap();

        assert_eq!(done.name, "OpA");
        assert!(done.duration_ms >= 5);
        assert!(done.ended_at >= done.started_at);
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_child_rolls_up_into_parent() {
        let mut ctx = ProcessContext::new();
        let parent = ctx.start("parent");
        ctx.inc_value("X", 1).unwrap();

        let child = ctx.start("child");
        ctx.inc_value("X", 5).unwrap();
        ctx.inc_value("Y", 2).unwrap();
        thread::sleep(Duration::from_millis(3));
        let child_done = ctx.stop(child).unwrap();

        assert_eq!(ctx.current_counter("X"), Some(6));
        assert_eq!(ctx.current_counter("Y"), Some(2));

        let parent_done = ctx.stop(parent).unwrap();
        assert_eq!(parent_done.sub_processes_ms, child_done.duration_ms);
        assert_eq!(parent_done.counter("X"), Some(6));
        assert!(parent_done.duration_ms >= child_done.duration_ms);
    }

    #[test]
    fn test_deep_nesting_sums_each_contribution_once() {
        let mut ctx = ProcessContext::new();
        let root = ctx.start("root");
        let mut handles = Vec::new();
        for level in 0..5 {
            handles.push(ctx.start(&format!("level-{}", level)));
            ctx.inc_value("X", 5).unwrap();
        }

        let mut direct_child_duration = 0;
        while let Some(handle) = handles.pop() {
            let done = ctx.stop(handle).unwrap();
            if handle.depth() == 1 {
                direct_child_duration = done.duration_ms;
            }
        }

        let root_done = ctx.stop(root).unwrap();
        assert_eq!(root_done.counter("X"), Some(25));
        assert_eq!(root_done.sub_processes_ms, direct_child_duration);
    }

    #[test]
    fn test_stop_requires_current_process() {
        let mut ctx = ProcessContext::new();
        let outer = ctx.start("outer");
        let inner = ctx.start("inner");

        let err = ctx.stop(outer).unwrap_err();
        assert!(matches!(err, CubeError::NotCurrentProcess { ref name } if name == "inner"));
        assert_eq!(ctx.depth(), 2);

        ctx.stop(inner).unwrap();
        ctx.stop(outer).unwrap();
    }

    #[test]
    fn test_no_active_process() {
        let mut ctx = ProcessContext::new();
        assert!(matches!(ctx.inc_value("X", 1), Err(CubeError::NoActiveProcess)));
        assert!(matches!(ctx.stop_current(), Err(CubeError::NoActiveProcess)));
    }

    #[test]
    fn test_completed_process_with_huge_duration() {
        let ended_at = Utc::now();
        let process = CompletedProcess::new("Forever", ended_at, i64::MAX);

        assert_eq!(process.started_at, ended_at);
        assert_eq!(process.duration_ms, i64::MAX);

        let process = CompletedProcess::new("Rewind", ended_at, i64::MIN);
        assert_eq!(process.started_at, ended_at);
    }

    #[test]
    fn test_completed_process_builder() {
        let now = Utc::now();
        let p = CompletedProcess::new("OpB", now, 42)
            .with_counter("NB_SQL", 3)
            .with_sub_processes_ms(7);

        assert_eq!(p.timestamp(), now);
        assert_eq!(p.started_at, now - chrono::Duration::milliseconds(42));
        assert_eq!(p.counter("NB_SQL"), Some(3));
        assert_eq!(p.sub_processes_ms, 7);
    }
}
