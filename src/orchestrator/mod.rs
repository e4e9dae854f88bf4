//! The pull request orchestrator.
//!
//! Turns webhook events into queued operations. Each event enqueues exactly
//! one [`DeployOperation`] or [`TeardownOperation`] on the work queue, keyed
//! by PR number, so everything touching one PR's app runs in delivery order
//! and never concurrently. The orchestrator itself makes no platform calls.

mod deploy;
pub mod lifecycle;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, instrument};

use crate::queue::{Enqueued, Operation, OperationOutcome, QueueConfig, QueueError, WorkQueue};
use crate::types::PrNumber;
use crate::webhooks::PullRequestEvent;

pub use deploy::{DeployOperation, DeployPipeline, TeardownOperation};
pub use lifecycle::{Decision, PrPhase, Work, decide, settle};

#[derive(Debug, Clone, Copy)]
struct PhaseEntry {
    phase: PrPhase,
    /// Identifies the most recent enqueue for the PR. Unique across PRs and
    /// lifecycles.
    generation: u64,
}

/// One PR's phase. `None` while the PR has no app.
type PhaseSlot = Arc<Mutex<Option<PhaseEntry>>>;

/// Phases partitioned by PR: events for different PRs never wait on each other.
type PhaseMap = Arc<DashMap<PrNumber, PhaseSlot>>;

/// Routes pull request events onto the work queue.
pub struct Orchestrator {
    pipeline: Arc<DeployPipeline>,
    queue: WorkQueue<PrNumber>,
    phases: PhaseMap,
    next_generation: AtomicU64,
}

impl Orchestrator {
    pub fn new(pipeline: DeployPipeline, queue: QueueConfig) -> Self {
        Orchestrator {
            pipeline: Arc::new(pipeline),
            queue: WorkQueue::new(queue),
            phases: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn pipeline(&self) -> &DeployPipeline {
        &self.pipeline
    }

    /// Current lifecycle phase of a PR, or `None` if it has no app.
    pub async fn phase(&self, pr: PrNumber) -> Option<PrPhase> {
        let slot = self.phases.get(&pr)?.value().clone();
        let entry = *slot.lock().await;
        entry.map(|e| e.phase)
    }

    /// Enqueues the operation for `event` and returns a handle to its outcome.
    #[instrument(skip(self, event), fields(pr = %event.number(), action = event.action.as_str()))]
    pub async fn handle_event(&self, event: PullRequestEvent) -> Result<Enqueued, QueueError> {
        let pr = event.number();

        let slot = self.phases.entry(pr).or_default().value().clone();
        // Held across the enqueue so phase order matches queue order.
        let mut entry = slot.lock().await;
        let decision = decide(entry.map(|e| e.phase), event.action);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let operation: Box<dyn Operation> = match decision.work {
            Work::Deploy => Box::new(DeployOperation::new(self.pipeline.clone(), event.pr)),
            Work::Teardown => Box::new(TeardownOperation::new(self.pipeline.clone(), event.pr)),
        };
        let queued = self.queue.enqueue(pr, operation).await?;
        *entry = Some(PhaseEntry {
            phase: decision.next,
            generation,
        });
        drop(entry);

        info!(
            work = %decision.work,
            phase = %decision.next,
            merged = event.merged,
            "queued"
        );

        let (tx, rx) = oneshot::channel();
        tokio::spawn(settle_when_done(
            self.phases.clone(),
            pr,
            generation,
            decision.work,
            queued,
            tx,
        ));
        Ok(Enqueued { done: rx })
    }

    /// Stops accepting events and waits for running operations.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

/// Records the phase a finished operation leaves its PR in, unless a newer
/// operation has been queued for the PR since.
async fn settle_when_done(
    phases: PhaseMap,
    pr: PrNumber,
    generation: u64,
    work: Work,
    queued: Enqueued,
    tx: oneshot::Sender<OperationOutcome>,
) {
    let outcome = queued.outcome().await;
    let slot = phases.get(&pr).map(|s| s.value().clone());
    if let Some(slot) = slot {
        let mut entry = slot.lock().await;
        let current = *entry;
        match current {
            Some(current) if current.generation == generation => {
                *entry = settle(current.phase, work, &outcome)
                    .map(|phase| PhaseEntry { phase, generation });
            }
            _ => debug!(pr = %pr, "newer operation queued, leaving phase"),
        }
        let absent = entry.is_none();
        drop(entry);

        // The map and this task hold the only references: nobody is about to
        // write a phase into the slot, so it can go.
        if absent {
            phases.remove_if(&pr, |_, s| {
                Arc::strong_count(s) == 2 && s.try_lock().is_ok_and(|e| e.is_none())
            });
        }
    }
    let _ = tx.send(outcome);
}
