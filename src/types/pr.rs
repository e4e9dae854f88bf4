//! The pull request reference carried by every work item.

use serde::{Deserialize, Serialize};

use super::ids::{AppName, PrNumber, Sha};

/// What a single webhook delivery says about a pull request.
///
/// Immutable per delivery; a later delivery for the same PR carries a new
/// head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    /// The PR number (identity key).
    pub number: PrNumber,

    /// The head branch name.
    pub branch: String,

    /// The head commit, when the delivery included one.
    pub head: Option<Sha>,
}

impl PullRequestRef {
    pub fn new(number: PrNumber, branch: impl Into<String>, head: Option<Sha>) -> Self {
        PullRequestRef {
            number,
            branch: branch.into(),
            head,
        }
    }

    /// Returns the ref to read repository content at: the head commit when
    /// known, otherwise the tip of the branch.
    pub fn git_ref(&self) -> &str {
        match &self.head {
            Some(sha) => sha.as_str(),
            None => &self.branch,
        }
    }

    /// Returns the preview app name for this PR.
    pub fn app_name(&self) -> AppName {
        self.number.app_name()
    }
}
