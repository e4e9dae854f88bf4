//! Per-key serialized work queue.
//!
//! Operations for one key run one at a time in FIFO order; operations for
//! different keys run concurrently. Each key gets its own worker task, fed by
//! its own channel and spawned on first use. Idle workers exit and are
//! respawned on the next enqueue.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────┐
//!                  ┌──► │  key 23 channel  │ ──► worker 23
//! ┌──────────┐     │    └──────────────────┘
//! │ enqueue  │ ────┤
//! └──────────┘     │    ┌──────────────────┐
//!                  └──► │  key 24 channel  │ ──► worker 24
//!                       └──────────────────┘
//! ```
//!
//! Queue state is process-local; items still queued at shutdown resolve as
//! [`OperationOutcome::Abandoned`].

mod dispatch;
mod operation;
mod worker;


use std::time::Duration;

use thiserror::Error;

pub use dispatch::WorkQueue;
pub use operation::{Enqueued, Operation, OperationError, OperationOutcome};

/// Errors from enqueueing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("work queue is shutting down")]
    ShuttingDown,
}

/// Queue timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Budget for one operation's `run`.
    pub operation_timeout: Duration,

    /// Budget for the `timed_out` hook after a timeout.
    pub compensation_timeout: Duration,

    /// A worker with nothing to do for this long exits.
    pub idle_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            operation_timeout: Duration::from_secs(600),
            compensation_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}
