//! Reporting deployment status back to the source host.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::types::{DeploymentStatus, PullRequestRef};

/// The source host's id for a deployment it is tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HostDeploymentId(pub u64);

/// One status transition, as shown on the pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub state: DeploymentStatus,

    /// Where the preview app is served.
    pub environment_url: String,

    /// Where the deployment's log can be read.
    pub log_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A status report was not delivered.
#[derive(Debug, Clone, Error)]
#[error("status report failed: {message}")]
pub struct ReportError {
    pub message: String,
}

impl ReportError {
    pub fn new(message: impl Into<String>) -> Self {
        ReportError {
            message: message.into(),
        }
    }
}

/// The source host's deployment status API.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Registers a deployment of the PR's head commit to `environment`.
    async fn create_deployment(
        &self,
        pr: &PullRequestRef,
        environment: &str,
    ) -> Result<HostDeploymentId, ReportError>;

    async fn report_status(
        &self,
        deployment: HostDeploymentId,
        update: &StatusUpdate,
    ) -> Result<(), ReportError>;
}
