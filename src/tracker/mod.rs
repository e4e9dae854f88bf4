//! Deployment status tracking.
//!
//! The tracker is the only writer of [`Deployment`] records. Each transition
//! is persisted first and then reported to the source host. A report that
//! does not get through is logged and otherwise ignored: the stored record is
//! the source of truth and the outcome of the deploy does not change.
//!
//! The work queue runs one operation per PR at a time, so a PR never has two
//! pending deployments. A resolved [`ActiveDeployment`] rejects any further
//! resolution with [`AlreadyResolved`].

pub mod reporter;
pub mod store;

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::types::{
    AlreadyResolved, Deployment, DeploymentId, DeploymentStatus, PullRequestRef,
};

pub use reporter::{HostDeploymentId, ReportError, StatusReporter, StatusUpdate};
pub use store::{DeploymentStore, InMemoryDeploymentStore, StoreError};

/// Errors from the tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    AlreadyResolved(#[from] AlreadyResolved),
}

/// Links recorded on a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentUrls {
    /// Dashboard link, when the app is known to the platform.
    pub flynn_app_url: Option<String>,
    pub deployed_app_url: String,
}

/// A deployment owned by the operation that is producing it.
///
/// The record exists in memory from [`DeploymentTracker::prepare`] on, before
/// anything is stored or reported, so whoever holds it can always resolve it.
#[derive(Debug)]
pub struct ActiveDeployment {
    deployment: Deployment,
    pr: PullRequestRef,
    host: Option<HostDeploymentId>,
}

impl ActiveDeployment {
    pub fn id(&self) -> DeploymentId {
        self.deployment.id
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn is_terminal(&self) -> bool {
        self.deployment.is_terminal()
    }

    /// Replaces the recorded links. Only meaningful before [`DeploymentTracker::begin`].
    pub fn set_urls(&mut self, urls: DeploymentUrls) {
        self.deployment.flynn_app_url = urls.flynn_app_url;
        self.deployment.deployed_app_url = urls.deployed_app_url;
    }
}

/// Records deployments and reports their status.
#[derive(Clone)]
pub struct DeploymentTracker {
    store: Arc<dyn DeploymentStore>,
    reporter: Arc<dyn StatusReporter>,
    /// `https://<pr-apps domain>`; log pages hang off it.
    public_url: String,
}

impl DeploymentTracker {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        reporter: Arc<dyn StatusReporter>,
        domain: &str,
    ) -> Self {
        DeploymentTracker {
            store,
            reporter,
            public_url: format!("https://{domain}"),
        }
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    /// Where the log of a deployment is served.
    pub fn log_url(&self, id: DeploymentId) -> String {
        format!("{}/deployments/{}", self.public_url, id)
    }

    /// Creates the in-memory record for a deployment that is about to start.
    ///
    /// Nothing is stored or reported until the record is passed to
    /// [`begin`](Self::begin), [`record_failure`](Self::record_failure) or
    /// [`fail`](Self::fail).
    pub fn prepare(&self, pr: &PullRequestRef, urls: DeploymentUrls) -> ActiveDeployment {
        ActiveDeployment {
            deployment: Deployment::pending(pr.number, urls.flynn_app_url, urls.deployed_app_url),
            pr: pr.clone(),
            host: None,
        }
    }

    /// Stores the deployment as pending and reports it.
    #[instrument(skip(self, active), fields(pr = %active.pr.number, deployment = %active.id()))]
    pub async fn begin(&self, active: &mut ActiveDeployment) -> Result<(), TrackerError> {
        if active.is_terminal() {
            return Err(AlreadyResolved {
                id: active.id(),
                status: active.deployment.status,
            }
            .into());
        }
        self.store.save(&active.deployment).await?;
        tracing::info!("deployment pending");

        self.announce(active).await;
        Ok(())
    }

    /// Appends build output to a pending deployment.
    pub async fn append_log(
        &self,
        active: &mut ActiveDeployment,
        text: &str,
    ) -> Result<(), TrackerError> {
        active.deployment.append_log(text)?;
        self.store.save(&active.deployment).await?;
        Ok(())
    }

    /// Resolves a deployment as successful.
    #[instrument(skip(self, active), fields(deployment = %active.id()))]
    pub async fn succeed(&self, active: &mut ActiveDeployment) -> Result<Deployment, TrackerError> {
        self.resolve(active, DeploymentStatus::Success, None).await
    }

    /// Resolves a deployment as failed, appending `reason` to its log.
    #[instrument(skip(self, active, reason), fields(deployment = %active.id()))]
    pub async fn fail(
        &self,
        active: &mut ActiveDeployment,
        reason: &str,
    ) -> Result<Deployment, TrackerError> {
        self.resolve(active, DeploymentStatus::Failure, Some(reason))
            .await
    }

    /// Records a deployment that failed before any build was triggered.
    ///
    /// The record is stored already failed with `log` as its content, and a
    /// single `failure` status is reported (no `pending` precedes it).
    #[instrument(skip(self, active, log), fields(pr = %active.pr.number))]
    pub async fn record_failure(
        &self,
        active: &mut ActiveDeployment,
        log: &str,
    ) -> Result<Deployment, TrackerError> {
        tracing::warn!(deployment = %active.id(), "deployment failed before build");
        self.resolve(active, DeploymentStatus::Failure, Some(log))
            .await
    }

    /// The in-memory record only turns terminal once the terminal state is
    /// stored, so a resolution cut short can be retried.
    async fn resolve(
        &self,
        active: &mut ActiveDeployment,
        status: DeploymentStatus,
        reason: Option<&str>,
    ) -> Result<Deployment, TrackerError> {
        let mut resolved = active.deployment.clone();
        if let Some(reason) = reason {
            resolved.append_log(reason)?;
        }
        resolved.resolve(status)?;
        self.store.save(&resolved).await?;
        active.deployment = resolved;
        tracing::info!(status = %status, "deployment resolved");

        self.announce(active).await;
        Ok(active.deployment.clone())
    }

    /// Reports the current state, registering the deployment with the source
    /// host first if that has not happened yet.
    async fn announce(&self, active: &mut ActiveDeployment) {
        if active.host.is_none() {
            active.host = self.register(&active.pr, &active.deployment).await;
        }
        self.report(&active.pr, active.host, &active.deployment)
            .await;
    }

    async fn register(
        &self,
        pr: &PullRequestRef,
        deployment: &Deployment,
    ) -> Option<HostDeploymentId> {
        match self
            .reporter
            .create_deployment(pr, deployment.pr_app_name.as_str())
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(deployment = %deployment.id, error = %e, "could not register deployment with source host");
                None
            }
        }
    }

    async fn report(
        &self,
        pr: &PullRequestRef,
        host: Option<HostDeploymentId>,
        deployment: &Deployment,
    ) {
        let Some(host) = host else {
            return;
        };
        let update = StatusUpdate {
            state: deployment.status,
            environment_url: deployment.deployed_app_url.clone(),
            log_url: self.log_url(deployment.id),
            description: Some(describe(deployment)),
        };
        if let Err(e) = self.reporter.report_status(host, &update).await {
            tracing::warn!(
                pr = %pr.number,
                deployment = %deployment.id,
                state = %deployment.status,
                error = %e,
                "could not report deployment status"
            );
        }
    }
}

fn describe(deployment: &Deployment) -> String {
    let app = &deployment.pr_app_name;
    match deployment.status {
        DeploymentStatus::Pending => format!("Deploying {app}"),
        DeploymentStatus::Success => format!("Deployed {app}"),
        DeploymentStatus::Failure => format!("Deploy of {app} failed"),
    }
}
