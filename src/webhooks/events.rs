//! Typed webhook events.
//!
//! Only `pull_request` deliveries drive the orchestrator. Everything else the
//! host sends is acknowledged and dropped at the HTTP layer.

use serde::{Deserialize, Serialize};

use crate::types::{PrNumber, PullRequestRef};

/// Pull request actions the orchestrator reacts to.
///
/// Other actions (labeled, assigned, edited, ...) never reach this type; the
/// parser filters them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrAction {
    Opened,
    Synchronize,
    Reopened,
    Closed,
}

impl PrAction {
    /// Parses the `action` field of a `pull_request` payload.
    pub fn from_wire(action: &str) -> Option<Self> {
        match action {
            "opened" => Some(PrAction::Opened),
            "synchronize" => Some(PrAction::Synchronize),
            "reopened" => Some(PrAction::Reopened),
            "closed" => Some(PrAction::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrAction::Opened => "opened",
            PrAction::Synchronize => "synchronize",
            PrAction::Reopened => "reopened",
            PrAction::Closed => "closed",
        }
    }
}

/// A pull request lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub action: PrAction,

    /// Number, head branch and (when sent) head commit of the PR.
    pub pr: PullRequestRef,

    /// Whether the PR was merged. Only meaningful for `closed`, and
    /// informational: merged and unmerged closes are handled alike.
    pub merged: bool,
}

impl PullRequestEvent {
    pub fn number(&self) -> PrNumber {
        self.pr.number
    }
}
