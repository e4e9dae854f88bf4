//! Deployment records: one per build attempt of a preview app.
//!
//! A deployment starts `Pending` when a build is triggered and resolves exactly
//! once to `Success` or `Failure`. Deployments that fail before any build is
//! triggered (bad preview config, platform errors) are created already failed.
//! Once terminal, a record is immutable: status changes and log appends are
//! rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::ids::{AppName, DeploymentId, PrNumber};

/// Status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Success,
    Failure,
}

impl DeploymentStatus {
    /// Returns true for `Success` and `Failure`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeploymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk of deployment log output. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    /// Position of this chunk within its deployment's log, starting at 0.
    pub ordinal: u32,
    pub text: String,
}

/// Attempted to mutate a deployment that has already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("deployment {id} is already {status}")]
pub struct AlreadyResolved {
    pub id: DeploymentId,
    pub status: DeploymentStatus,
}

/// A persisted record of one build attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub pr: PrNumber,
    pub pr_app_name: AppName,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
    /// Link to the app in the platform dashboard. Absent when the deployment
    /// failed before the app was resolved on the platform.
    pub flynn_app_url: Option<String>,
    pub deployed_app_url: String,
    pub log_chunks: Vec<LogChunk>,
}

impl Deployment {
    /// Creates a new pending deployment.
    pub fn pending(
        pr: PrNumber,
        flynn_app_url: Option<String>,
        deployed_app_url: impl Into<String>,
    ) -> Self {
        Deployment {
            id: DeploymentId::new(),
            pr,
            pr_app_name: pr.app_name(),
            status: DeploymentStatus::Pending,
            created_at: Utc::now(),
            flynn_app_url,
            deployed_app_url: deployed_app_url.into(),
            log_chunks: Vec::new(),
        }
    }

    /// Returns true once the deployment is `Success` or `Failure`.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Appends a log chunk. Empty text is ignored.
    pub fn append_log(&mut self, text: impl Into<String>) -> Result<(), AlreadyResolved> {
        self.ensure_pending()?;
        let text = text.into();
        if text.is_empty() {
            return Ok(());
        }
        let ordinal = self.log_chunks.len() as u32;
        self.log_chunks.push(LogChunk { ordinal, text });
        Ok(())
    }

    /// Moves the deployment to a terminal status.
    pub fn resolve(&mut self, status: DeploymentStatus) -> Result<(), AlreadyResolved> {
        self.ensure_pending()?;
        self.status = status;
        Ok(())
    }

    /// Returns the log as plain text, one chunk per line.
    pub fn log_text(&self) -> String {
        self.log_chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn ensure_pending(&self) -> Result<(), AlreadyResolved> {
        if self.is_terminal() {
            return Err(AlreadyResolved {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}
