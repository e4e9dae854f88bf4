//! pr-apps - ephemeral per-pull-request preview deployments.
//!
//! Pull request webhooks are turned into a serialized stream of operations
//! per PR: each open or push deploys the PR's branch to its own app on a
//! Flynn cluster, and closing the PR deletes the app. Deployment status and
//! logs are reported back to the pull request.

pub mod config;
pub mod git;
pub mod github;
pub mod orchestrator;
pub mod platform;
pub mod preview;
pub mod queue;
pub mod retry;
pub mod server;
pub mod tracker;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_utils;
