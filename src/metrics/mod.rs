//! Time-bucketed aggregation of completed processes.
//!
//! Layout, leaf to root:
//! - [`CounterAggregate`] / [`ElapsedAggregate`]: running statistics
//! - [`Cube`]: the aggregates of one bucket, keyed by [`CubeKey`]
//! - [`RetentionStore`]: bounded FIFO of cubes for one axis and level
//! - [`AxisStore`]: the retained levels of one axis
//! - [`HyperCube`]: every axis of one database

pub mod aggregate;
pub mod axis;
pub mod cube;
pub mod histogram;
pub mod hypercube;
pub mod level;
pub mod ring_buffer;

pub use aggregate::{CounterAggregate, ElapsedAggregate};
pub use axis::AxisStore;
pub use cube::{Cube, CubeKey, GLOBAL_AXIS};
pub use histogram::{LatencyHistogram, LATENCY_BOUNDS_MS};
pub use hypercube::HyperCube;
pub use level::TimeLevel;
pub use ring_buffer::{FlushMode, RetentionStore};
