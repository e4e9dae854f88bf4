//! The per-key worker loop.

use std::fmt::Display;
use std::hash::Hash;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::QueueConfig;
use super::dispatch::WorkerMap;
use super::operation::{OperationOutcome, WorkItem};

/// Runs the operations queued for one key, one at a time.
pub(crate) struct KeyWorker<K> {
    key: K,
    generation: u64,
    config: QueueConfig,
    workers: WorkerMap<K>,
}

impl<K> KeyWorker<K>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
{
    pub(crate) fn new(key: K, generation: u64, config: QueueConfig, workers: WorkerMap<K>) -> Self {
        KeyWorker {
            key,
            generation,
            config,
            workers,
        }
    }

    /// Processes items until shutdown, channel close, or idleness.
    ///
    /// Items left in the channel when the loop exits are dropped, which
    /// resolves their handles as abandoned.
    #[instrument(skip_all, fields(key = %self.key, generation = self.generation))]
    pub(crate) async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<WorkItem>,
        shutdown: CancellationToken,
    ) {
        debug!("Worker started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping worker");
                    break;
                }

                item = rx.recv() => {
                    match item {
                        Some(item) => self.run_item(item).await,
                        None => {
                            debug!("Channel closed");
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep(self.config.idle_timeout) => {
                    match self.retire(&mut rx).await {
                        Some(item) => self.run_item(item).await,
                        None => {
                            debug!("Worker idle, exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Removes this worker from the map if its channel is empty.
    ///
    /// Senders hold the map lock while sending, so with the write lock held
    /// an empty channel stays empty. Returns a late item instead of exiting
    /// if one arrived.
    async fn retire(&self, rx: &mut mpsc::UnboundedReceiver<WorkItem>) -> Option<WorkItem> {
        let mut workers = self.workers.write().await;
        match rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                if workers
                    .get(&self.key)
                    .is_some_and(|h| h.generation == self.generation)
                {
                    workers.remove(&self.key);
                }
                None
            }
        }
    }

    async fn run_item(&self, item: WorkItem) {
        let WorkItem {
            mut operation,
            enqueued_at,
            done,
        } = item;
        let name = operation.name();
        debug!(
            op = name,
            waited_ms = enqueued_at.elapsed().as_millis() as u64,
            "Starting operation"
        );

        let budget = self.config.operation_timeout;
        let outcome = match tokio::time::timeout(budget, operation.run()).await {
            Ok(Ok(())) => OperationOutcome::Completed,
            Ok(Err(e)) => OperationOutcome::Failed(e.0),
            Err(_) => {
                warn!(op = name, timeout = ?budget, "Operation timed out");
                let hook = operation.timed_out(budget);
                if tokio::time::timeout(self.config.compensation_timeout, hook)
                    .await
                    .is_err()
                {
                    warn!(op = name, "Timeout handler did not finish in time");
                }
                OperationOutcome::TimedOut(budget)
            }
        };

        info!(op = name, outcome = %outcome, "Operation finished");
        // The caller may have stopped waiting; that is fine.
        let _ = done.send(outcome);
    }
}
