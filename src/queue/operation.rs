//! Units of work run by the queue.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// An operation failed. The message is handed back to whoever enqueued it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct OperationError(pub String);

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        OperationError(message.into())
    }
}

/// A unit of work for one key.
#[async_trait]
pub trait Operation: Send {
    /// Short name for logs (e.g. `deploy`).
    fn name(&self) -> &'static str;

    async fn run(&mut self) -> Result<(), OperationError>;

    /// Called once when `run` exceeded the queue's timeout and was dropped.
    ///
    /// Runs before the next operation for the same key starts. Side effects
    /// `run` already caused are not rolled back; this hook only records the
    /// outcome.
    async fn timed_out(&mut self, after: Duration) {
        let _ = after;
    }
}

/// How an enqueued operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Completed,
    Failed(String),
    /// `run` was dropped after the queue's per-operation timeout.
    TimedOut(Duration),
    /// Never ran to an outcome: the queue shut down or the worker died.
    Abandoned,
}

impl OperationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, OperationOutcome::Completed)
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationOutcome::Completed => f.write_str("completed"),
            OperationOutcome::Failed(msg) => write!(f, "failed: {msg}"),
            OperationOutcome::TimedOut(after) => write!(f, "timed out after {after:?}"),
            OperationOutcome::Abandoned => f.write_str("abandoned"),
        }
    }
}

/// An operation waiting in a key's channel.
pub(crate) struct WorkItem {
    pub(crate) operation: Box<dyn Operation>,
    pub(crate) enqueued_at: Instant,
    pub(crate) done: oneshot::Sender<OperationOutcome>,
}

/// Handle returned by [`WorkQueue::enqueue`](super::WorkQueue::enqueue).
#[derive(Debug)]
pub struct Enqueued {
    pub(crate) done: oneshot::Receiver<OperationOutcome>,
}

impl Enqueued {
    /// Waits for the operation to finish.
    pub async fn outcome(self) -> OperationOutcome {
        self.done.await.unwrap_or(OperationOutcome::Abandoned)
    }
}
