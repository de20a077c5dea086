//! Hypercube - embedded application performance monitoring engine.
//!
//! Application code marks the start and end of named processes (service
//! calls, queries, batch steps) and bumps named counters inside them. The
//! engine aggregates durations and counter values into time-bucketed
//! cubes, one per process name plus a global one, at minute and hour
//! granularity. A background thread periodically hands the finished
//! buckets to pluggable monitoring stores.
//!
//! # Features
//!
//! - **Low overhead**: recording touches a handful of short-lived locks
//! - **Bounded memory**: fixed-capacity FIFO retention per axis and level
//! - **Nested processes**: sub-process time and counters roll up to parents
//! - **Failure isolation**: a failing or panicking store never affects the
//!   engine or the other stores
//!
//! # Architecture
//!
//! - `process`: per-thread stack of open processes
//! - `metrics`: aggregates, cubes, retention stores and the hypercube
//! - `definitions`: counter and database definitions
//! - `export`: monitoring store trait and built-in stores
//! - `analytics`: the engine façade and its flush thread
//! - `core`: configuration and errors
//! - `cli`: command-line demo
//!
//! # Example
//!
//! ```no_run
//! use hypercube::{Analytics, Config, ProcessContext};
//!
//! fn main() -> hypercube::Result<()> {
//!     let analytics = Analytics::new(Config::default())?;
//!     analytics.open_database("SVC", "Service calls")?;
//!
//!     let mut ctx = ProcessContext::new();
//!     analytics.start_process(&mut ctx, "GetCustomer");
//!     analytics.stop_process(&mut ctx, "SVC")?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod analytics;
pub mod cli;
pub mod core;
pub mod definitions;
pub mod export;
pub mod metrics;
pub mod process;

// Re-export core types for convenience
pub use crate::analytics::{Analytics, LifecycleState, ProcessSummary};
pub use crate::core::{Config, CubeError, Result};
pub use crate::export::{CounterRecord, MonitoringStore};
pub use crate::metrics::{FlushMode, TimeLevel};
pub use crate::process::{CompletedProcess, ProcessContext, ProcessHandle};
