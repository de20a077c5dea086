//! Configuration and error types shared by every layer of the engine.

#![warn(missing_docs)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, EngineConfig, FlushConfig, LogLevel, RetentionConfig};
pub use error::{CubeError, Result};
