//! Supervised pool of dispatch workers.
//!
//! Each worker loops: wait for a lease, process it, repeat. Cancellation is
//! only observed while waiting for the queue or backing off, so a delivery
//! that has started always runs to completion (or to its timeout) before the
//! worker exits. Items still leased at shutdown come back through lease
//! expiry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::settings::DispatchSettings;

/// Counters shared by all workers in a pool.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub processed: AtomicU64,
    pub sent: AtomicU64,
    pub retried: AtomicU64,
    pub failed: AtomicU64,
    pub skipped: AtomicU64,
    pub errors: AtomicU64,
}

impl DispatchStats {
    fn record(&self, outcome: &DispatchOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            DispatchOutcome::Sent { .. } => &self.sent,
            DispatchOutcome::RetryScheduled { .. } => &self.retried,
            DispatchOutcome::Failed { .. } => &self.failed,
            DispatchOutcome::Skipped(_) => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct WorkerPool {
    dispatcher: Arc<Dispatcher>,
    settings: DispatchSettings,
    stats: Arc<DispatchStats>,
    cancellation_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(dispatcher: Arc<Dispatcher>, settings: DispatchSettings) -> Self {
        Self {
            dispatcher,
            settings,
            stats: Arc::new(DispatchStats::default()),
            cancellation_token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Spawn the configured number of workers. Returns immediately.
    pub fn spawn(&mut self) {
        tracing::info!(workers = self.settings.workers, "Spawning dispatch workers");

        for worker_id in 0..self.settings.workers {
            let worker = DispatchWorker {
                id: worker_id,
                dispatcher: self.dispatcher.clone(),
                stats: self.stats.clone(),
                cancellation_token: self.cancellation_token.clone(),
                error_backoff: self.settings.error_backoff,
            };
            self.handles.push(tokio::spawn(worker.run()));
        }
    }

    /// Stop pulling new items and wait for in-flight ones.
    ///
    /// Returns an error if the workers do not finish within the shutdown
    /// timeout; leases they still hold will expire and be redelivered.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        let timeout = self.settings.shutdown_timeout;
        tracing::info!(
            workers = self.handles.len(),
            timeout_secs = timeout.as_secs(),
            "Shutting down dispatch workers"
        );
        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.handles);
        let join_all = async {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(e) = handle.await {
                    tracing::error!(worker_id, error = %e, "Dispatch worker panicked");
                }
            }
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(()) => {
                tracing::info!("Dispatch workers stopped");
                Ok(())
            }
            Err(_) => {
                tracing::error!(timeout_secs = timeout.as_secs(), "Dispatch worker shutdown timed out");
                anyhow::bail!("dispatch workers did not stop within {:?}", timeout)
            }
        }
    }
}

struct DispatchWorker {
    id: usize,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<DispatchStats>,
    cancellation_token: CancellationToken,
    error_backoff: Duration,
}

impl DispatchWorker {
    async fn run(self) {
        tracing::debug!(worker_id = self.id, "Dispatch worker started");

        loop {
            let lease = tokio::select! {
                () = self.cancellation_token.cancelled() => break,
                lease = self.dispatcher.next_lease() => lease,
            };

            let result = match lease {
                Ok(lease) => self.dispatcher.process(&lease).await.map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            };

            match result {
                Ok(outcome) => self.stats.record(&outcome),
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        worker_id = self.id,
                        error = %e,
                        backoff_ms = self.error_backoff.as_millis() as u64,
                        "Dispatch cycle failed, backing off"
                    );
                    tokio::select! {
                        () = self.cancellation_token.cancelled() => break,
                        () = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        tracing::debug!(worker_id = self.id, "Dispatch worker stopped");
    }
}
