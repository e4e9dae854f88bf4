//! Routing of work items to per-key workers.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::operation::{Enqueued, Operation, WorkItem};
use super::worker::KeyWorker;
use super::{QueueConfig, QueueError};

/// Per-key worker handle.
pub(crate) struct WorkerHandle {
    /// Channel for sending work to the worker.
    pub(crate) tx: mpsc::UnboundedSender<WorkItem>,

    /// Distinguishes this worker from earlier ones for the same key.
    pub(crate) generation: u64,

    /// Handle to the worker's task.
    pub(crate) task: JoinHandle<()>,
}

/// Active workers, keyed by queue key.
pub(crate) type WorkerMap<K> = Arc<RwLock<HashMap<K, WorkerHandle>>>;

/// A work queue serializing operations per key.
///
/// Safe to share across tasks. Enqueueing sends while holding the map lock,
/// and a worker only removes itself under the write lock after finding its
/// channel empty, so an item is never sent to a worker that is exiting.
pub struct WorkQueue<K> {
    config: QueueConfig,
    workers: WorkerMap<K>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
{
    pub fn new(config: QueueConfig) -> Self {
        Self::new_with_shutdown(config, CancellationToken::new())
    }

    /// Creates a queue that stops when `shutdown` is cancelled.
    pub fn new_with_shutdown(config: QueueConfig, shutdown: CancellationToken) -> Self {
        info!(
            operation_timeout_secs = config.operation_timeout.as_secs(),
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Creating work queue"
        );
        WorkQueue {
            config,
            workers: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Schedules `operation` after everything already queued for `key`.
    #[instrument(skip(self, operation), fields(key = %key, op = operation.name()))]
    pub async fn enqueue(
        &self,
        key: K,
        operation: Box<dyn Operation>,
    ) -> Result<Enqueued, QueueError> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::ShuttingDown);
        }

        let (done_tx, done_rx) = oneshot::channel();
        let item = WorkItem {
            operation,
            enqueued_at: Instant::now(),
            done: done_tx,
        };

        // Fast path: existing worker (read lock).
        let item = {
            let workers = self.workers.read().await;
            match workers.get(&key) {
                Some(handle) => match handle.tx.send(item) {
                    Ok(()) => return Ok(Enqueued { done: done_rx }),
                    // Worker task died; replace it below.
                    Err(mpsc::error::SendError(item)) => item,
                },
                None => item,
            }
        };

        let mut workers = self.workers.write().await;

        // Double-check after acquiring write lock.
        let item = match workers.get(&key) {
            Some(handle) => match handle.tx.send(item) {
                Ok(()) => return Ok(Enqueued { done: done_rx }),
                Err(mpsc::error::SendError(item)) => item,
            },
            None => item,
        };

        let handle = self.spawn_worker(key.clone());
        // A fresh receiver is alive, so this cannot fail.
        let _ = handle.tx.send(item);
        workers.insert(key, handle);

        Ok(Enqueued { done: done_rx })
    }

    fn spawn_worker(&self, key: K) -> WorkerHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, generation, "Spawning worker task");

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = KeyWorker::new(key, generation, self.config, self.workers.clone());
        let task = tokio::spawn(worker.run(rx, self.shutdown.child_token()));

        WorkerHandle {
            tx,
            generation,
            task,
        }
    }

    /// Returns the number of live workers.
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn has_worker(&self, key: &K) -> bool {
        self.workers.read().await.contains_key(key)
    }

    /// Stops accepting work and waits for in-flight operations to finish.
    ///
    /// Items still queued behind them resolve as abandoned.
    pub async fn shutdown(&self) {
        info!("Shutting down work queue");
        self.shutdown.cancel();

        let handles: Vec<WorkerHandle> = {
            let mut workers = self.workers.write().await;
            workers.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            drop(handle.tx);
            let _ = handle.task.await;
        }
    }
}
