//! Configuration management for the engine.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Builder-style programmatic overrides
//! - Validation and defaults

use crate::core::{CubeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Instrumentation switches
    pub engine: EngineConfig,
    /// Bucket retention per time level
    pub retention: RetentionConfig,
    /// Background flush behaviour
    pub flush: FlushConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Instrumentation switches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Full instrumentation (cubes, counters, export)
    pub enabled: bool,
    /// Lightweight mode: per-name call count and total duration only
    pub summary_enabled: bool,
}

/// Number of buckets kept per (axis, level)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Minute buckets kept per axis
    pub minute_capacity: usize,
    /// Hour buckets kept per axis
    pub hour_capacity: usize,
}

/// Background flush configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Time between two flush passes
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Also export expired hour buckets
    pub export_hour_level: bool,
    /// Drain still-open modified buckets during the shutdown pass
    pub flush_open_buckets_on_shutdown: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread ids and line numbers
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            engine: EngineConfig::default(),
            retention: RetentionConfig::default(),
            flush: FlushConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            enabled: true,
            summary_enabled: false,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            minute_capacity: 12,
            hour_capacity: 2,
        }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        FlushConfig {
            interval: Duration::from_secs(60),
            export_hour_level: false,
            flush_open_buckets_on_shutdown: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.retention.minute_capacity == 0 {
            return Err(CubeError::config("retention.minute_capacity must be greater than 0"));
        }

        if self.retention.hour_capacity == 0 {
            return Err(CubeError::config("retention.hour_capacity must be greater than 0"));
        }

        if self.flush.interval.is_zero() {
            return Err(CubeError::config("flush.interval must be greater than 0"));
        }

        Ok(())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| CubeError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Load configuration from a YAML file
    pub fn from_file(self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded configuration from {:?}", path);
        self.from_yaml(&content)
    }

    /// Enable or disable full instrumentation
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.engine.enabled = enabled;
        self
    }

    /// Enable or disable summary mode
    pub fn summary_enabled(mut self, enabled: bool) -> Self {
        self.config.engine.summary_enabled = enabled;
        self
    }

    /// Set minute bucket capacity
    pub fn minute_capacity(mut self, capacity: usize) -> Self {
        self.config.retention.minute_capacity = capacity;
        self
    }

    /// Set hour bucket capacity
    pub fn hour_capacity(mut self, capacity: usize) -> Self {
        self.config.retention.hour_capacity = capacity;
        self
    }

    /// Set flush interval
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush.interval = interval;
        self
    }

    /// Export hour buckets alongside minute buckets
    pub fn export_hour_level(mut self, export: bool) -> Self {
        self.config.flush.export_hour_level = export;
        self
    }

    /// Drain open buckets on shutdown
    pub fn flush_open_buckets_on_shutdown(mut self, flush: bool) -> Self {
        self.config.flush.flush_open_buckets_on_shutdown = flush;
        self
    }

    /// Set log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
