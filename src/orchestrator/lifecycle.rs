//! The per-PR lifecycle state machine.
//!
//! ```text
//! absent ──open──► deploying ──done──► live ──sync──► redeploying ──done──► live
//!                                        │                                   │
//!                                        └──────────close──► closing ◄───────┘
//!                                                               │
//!                                                       done ──► absent
//! ```
//!
//! Transitions are pure: [`decide`] picks the work for an incoming action and
//! the phase to record while it is queued; [`settle`] picks the phase once
//! that work has finished.

use std::fmt;

use crate::queue::OperationOutcome;
use crate::webhooks::PrAction;

/// Where a PR's preview app is in its lifecycle. A PR with no entry is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrPhase {
    /// First deploy of a (possibly recreated) app is queued or running.
    Deploying,
    /// The last deploy finished.
    Live,
    /// A deploy of an existing app is queued or running.
    Redeploying,
    /// Teardown is queued or running.
    Closing,
}

impl PrPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrPhase::Deploying => "deploying",
            PrPhase::Live => "live",
            PrPhase::Redeploying => "redeploying",
            PrPhase::Closing => "closing",
        }
    }
}

impl fmt::Display for PrPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation an action enqueues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Work {
    Deploy,
    Teardown,
}

impl fmt::Display for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Work::Deploy => "deploy",
            Work::Teardown => "teardown",
        })
    }
}

/// What to do for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub work: Work,
    /// Phase to record while the work is pending.
    pub next: PrPhase,
}

/// Decides the work for `action` given the PR's current phase.
///
/// Every action enqueues exactly one operation. `closed` tears down whether
/// or not the PR was merged.
pub fn decide(current: Option<PrPhase>, action: PrAction) -> Decision {
    match action {
        PrAction::Closed => Decision {
            work: Work::Teardown,
            next: PrPhase::Closing,
        },
        PrAction::Opened | PrAction::Synchronize | PrAction::Reopened => {
            let next = match current {
                None | Some(PrPhase::Closing) => PrPhase::Deploying,
                Some(PrPhase::Deploying | PrPhase::Live | PrPhase::Redeploying) => {
                    PrPhase::Redeploying
                }
            };
            Decision {
                work: Work::Deploy,
                next,
            }
        }
    }
}

/// Phase after `work` finished with `outcome`, starting from `current`.
///
/// `None` means the PR is absent again. A deploy that did not complete leaves
/// the phase where it was, so the next deploy is classified the same way.
pub fn settle(current: PrPhase, work: Work, outcome: &OperationOutcome) -> Option<PrPhase> {
    match (work, outcome.is_completed()) {
        (Work::Deploy, true) => Some(PrPhase::Live),
        (Work::Teardown, true) => None,
        (_, false) => Some(current),
    }
}
