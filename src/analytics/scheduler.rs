use super::Engine;
use crate::core::{CubeError, Result};
use crate::metrics::FlushMode;
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Dedicated thread running periodic flush passes.
///
/// The wait between passes is a `recv_timeout` on a shutdown channel, so
/// signalling shutdown wakes the thread at once instead of at the next
/// tick. After shutdown exactly one final pass runs.
pub(crate) struct FlushWorker {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl FlushWorker {
    pub(crate) fn spawn(engine: Arc<Engine>, interval: Duration) -> Result<Self> {
        let (shutdown, signal) = bounded(1);
        let handle = thread::Builder::new()
            .name("hypercube-flush".to_string())
            .spawn(move || run(&engine, &signal, interval))
            .map_err(|e| CubeError::Spawn(e.to_string()))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal shutdown and wait for the final pass to finish
    pub(crate) fn shutdown(mut self) {
        // A full channel means shutdown was already signalled
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Flush thread panicked");
            }
        }
    }
}

fn run(engine: &Engine, signal: &Receiver<()>, interval: Duration) {
    tracing::info!(?interval, "Flush thread started");

    loop {
        match signal.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                engine.flush_pass(Utc::now(), FlushMode::Expired);
            },
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let mode = if engine.config.flush.flush_open_buckets_on_shutdown {
        FlushMode::All
    } else {
        FlushMode::Expired
    };
    let exported = engine.flush_pass(Utc::now(), mode);
    tracing::info!(exported, "Flush thread stopped after final pass");
}
