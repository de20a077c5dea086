//! Command-line interface for the hypercube demo.
//!
//! Runs a synthetic multi-threaded workload through the engine and exports
//! the buckets to the log, which makes the flush cycle visible without any
//! external store.

use crate::analytics::Analytics;
use crate::core::{Config, ConfigBuilder, LogLevel};
use crate::export::{LogStore, ELAPSED_TIME_CODE};
use crate::metrics::{FlushMode, TimeLevel, GLOBAL_AXIS};
use crate::process::ProcessContext;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DEMO_DATABASE: &str = "DEMO";
const DEMO_OPERATIONS: [&str; 4] = ["GetCustomer", "ListOrders", "SaveOrder", "Login"];

/// Embedded APM engine demo
#[derive(Parser, Debug)]
#[command(name = "hypercube")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (YAML)
    #[arg(short, long, env = "HYPERCUBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of worker threads generating processes
    #[arg(short, long, default_value = "4")]
    pub workers: usize,

    /// How long to run the workload
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    pub duration: Duration,

    /// Override the flush interval
    #[arg(long, value_parser = humantime::parse_duration)]
    pub flush_interval: Option<Duration>,

    /// Enable debug logging
    #[arg(short, long, env = "HYPERCUBE_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration: file first, then command-line overrides.
    pub fn load_config(&self) -> crate::Result<Config> {
        let mut builder = ConfigBuilder::new();

        if let Some(path) = &self.config {
            builder = builder.from_file(path)?;
            tracing::info!("Loaded configuration from: {:?}", path);
        }

        if let Some(interval) = self.flush_interval {
            builder = builder.flush_interval(interval);
        }
        if self.debug {
            builder = builder.log_level(LogLevel::Debug);
        }

        builder.build()
    }

    /// Initialize logging. `HYPERCUBE_LOG` takes precedence over the
    /// configured level.
    pub fn init_logging(&self, config: &Config) -> anyhow::Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let filter = EnvFilter::try_from_env("HYPERCUBE_LOG")
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

        let fmt_layer = if config.logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .context("Failed to initialize logging")?;

        Ok(())
    }
}

/// Execute the demo.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.load_config()?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  Enabled: {}", config.engine.enabled);
        println!("  Summary mode: {}", config.engine.summary_enabled);
        println!(
            "  Retention: {} minute buckets, {} hour buckets",
            config.retention.minute_capacity, config.retention.hour_capacity
        );
        println!("  Flush interval: {:?}", config.flush.interval);
        return Ok(());
    }

    cli.init_logging(&config)?;

    let analytics = Arc::new(Analytics::new(config)?);
    analytics.open_database(DEMO_DATABASE, "Synthetic workload")?;
    analytics.create_counter("Elapsed time (ms)", ELAPSED_TIME_CODE, 1000, 5000, 0)?;
    analytics.create_counter("SQL queries", "NB_SQL", 20, 50, 1)?;
    analytics.create_counter("Rows read", "NB_ROWS", 1000, 10000, 2)?;
    analytics.add_monitoring_store(Arc::new(LogStore::new()))?;

    tracing::info!(workers = cli.workers, duration = ?cli.duration, "Starting workload");
    let deadline = Instant::now() + cli.duration;

    let workers: Vec<_> = (0..cli.workers.max(1))
        .map(|index| {
            let analytics = Arc::clone(&analytics);
            thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || run_worker(&analytics, deadline))
        })
        .collect::<std::io::Result<_>>()
        .context("Failed to spawn worker thread")?;

    let mut completed = 0;
    for worker in workers {
        match worker.join() {
            Ok(Ok(count)) => completed += count,
            Ok(Err(e)) => tracing::error!("Worker failed: {:#}", e),
            Err(_) => tracing::error!("Worker panicked"),
        }
    }

    if let Ok(Some(cube)) =
        analytics.cube(DEMO_DATABASE, GLOBAL_AXIS, TimeLevel::Minute, chrono::Utc::now())
    {
        let elapsed = cube.elapsed();
        tracing::info!(
            hits = elapsed.hits(),
            avg_ms = elapsed.avg(),
            "Current minute bucket"
        );
    }
    tracing::info!(completed, "Workload finished");

    let exported = analytics.flush(FlushMode::Expired);
    tracing::debug!(exported, "Exported expired buckets");
    analytics.dispose();
    Ok(())
}

fn run_worker(analytics: &Analytics, deadline: Instant) -> anyhow::Result<u64> {
    let mut ctx = ProcessContext::new();
    let mut completed = 0;

    while Instant::now() < deadline {
        let operation = DEMO_OPERATIONS[fastrand::usize(..DEMO_OPERATIONS.len())];
        analytics.start_process(&mut ctx, operation);
        analytics.inc_value(&mut ctx, "NB_SQL", fastrand::i64(1..5))?;

        if fastrand::u8(..) < 64 {
            analytics.start_process(&mut ctx, "LoadReferenceData");
            analytics.inc_value(&mut ctx, "NB_ROWS", fastrand::i64(10..500))?;
            thread::sleep(Duration::from_millis(fastrand::u64(1..10)));
            analytics.stop_process(&mut ctx, DEMO_DATABASE)?;
        }

        thread::sleep(Duration::from_millis(fastrand::u64(1..40)));
        analytics.stop_process(&mut ctx, DEMO_DATABASE)?;
        completed += 1;
    }

    Ok(completed)
}
