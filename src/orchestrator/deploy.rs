//! The queued operations: deploying a PR's branch and tearing its app down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use crate::git::BranchPusher;
use crate::platform::{AppIdentity, AppManager, DeployState, WaitConfig, await_deploy};
use crate::preview::{ConfigResolver, ConfigSource, PreviewConfig};
use crate::queue::{Operation, OperationError};
use crate::tracker::{ActiveDeployment, DeploymentTracker, DeploymentUrls, TrackerError};
use crate::types::PullRequestRef;

/// Everything a queued operation talks to.
pub struct DeployPipeline {
    pub resolver: ConfigResolver<Arc<dyn ConfigSource>>,
    pub apps: AppManager,
    pub pusher: Arc<dyn BranchPusher>,
    pub tracker: DeploymentTracker,
    pub wait: WaitConfig,
}

impl DeployPipeline {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        apps: AppManager,
        pusher: Arc<dyn BranchPusher>,
        tracker: DeploymentTracker,
    ) -> Self {
        DeployPipeline {
            resolver: ConfigResolver::new(source),
            apps,
            pusher,
            tracker,
            wait: WaitConfig::default(),
        }
    }

    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_resolver(mut self, resolver: ConfigResolver<Arc<dyn ConfigSource>>) -> Self {
        self.resolver = resolver;
        self
    }

    fn urls_before_app(&self, pr: &PullRequestRef) -> DeploymentUrls {
        DeploymentUrls {
            flynn_app_url: None,
            deployed_app_url: self.apps.target().app_url(&pr.app_name()),
        }
    }
}

fn tracker_error(e: TrackerError) -> OperationError {
    error!(error = %e, "could not record deployment");
    OperationError::new(format!("could not record deployment: {e}"))
}

/// Deploys the PR's head branch to its preview app.
///
/// The deployment record is prepared before the first await, so whenever the
/// operation stops (finished, failed or timed out) there is exactly one record
/// to resolve. Failures before the build is triggered resolve it without a
/// `pending` report. Once the build is triggered the deployment is pending
/// until the platform reports an outcome, the wait deadline passes, or the
/// queue times the operation out.
pub struct DeployOperation {
    pipeline: Arc<DeployPipeline>,
    pr: PullRequestRef,
    active: Option<ActiveDeployment>,
}

impl DeployOperation {
    pub fn new(pipeline: Arc<DeployPipeline>, pr: PullRequestRef) -> Self {
        DeployOperation {
            pipeline,
            pr,
            active: None,
        }
    }

    fn active(&mut self) -> Result<&mut ActiveDeployment, OperationError> {
        self.active
            .as_mut()
            .ok_or_else(|| OperationError::new("deployment record went missing"))
    }

    /// Records a failure that happened before any build was triggered.
    async fn fail_early(&mut self, reason: String) -> Result<(), OperationError> {
        warn!(pr = %self.pr.number, reason = %reason, "deploy failed before build");
        let pipeline = self.pipeline.clone();
        pipeline
            .tracker
            .record_failure(self.active()?, &reason)
            .await
            .map_err(tracker_error)?;
        Err(OperationError::new(reason))
    }

    async fn log(&mut self, text: &str) -> Result<(), OperationError> {
        let pipeline = self.pipeline.clone();
        pipeline
            .tracker
            .append_log(self.active()?, text)
            .await
            .map_err(tracker_error)
    }

    /// Push, wait for the platform, scale. Returns the failure reason.
    async fn build(&mut self, app: &AppIdentity, config: &PreviewConfig) -> Result<(), String> {
        let pipeline = self.pipeline.clone();
        let target = pipeline.apps.target();

        let remote = target.git_remote_url(&app.name);
        let pushed = pipeline
            .pusher
            .push_branch(&self.pr.branch, &remote)
            .await
            .map_err(|e| format!("push failed: {e}"))?;
        self.log(&pushed.log).await.map_err(|e| e.to_string())?;

        match await_deploy(target.as_ref(), app, pipeline.wait).await {
            Ok(DeployState::Succeeded) => {}
            Ok(DeployState::Failed(reason)) => return Err(format!("deploy failed: {reason}")),
            Ok(DeployState::Pending) => return Err("deploy did not finish".to_string()),
            Err(e) => return Err(format!("could not determine deploy outcome: {e}")),
        }

        pipeline
            .apps
            .scale(app, config)
            .await
            .map_err(|e| format!("scaling failed: {e}"))
    }
}

#[async_trait]
impl Operation for DeployOperation {
    fn name(&self) -> &'static str {
        "deploy"
    }

    #[instrument(skip(self), fields(pr = %self.pr.number, branch = %self.pr.branch))]
    async fn run(&mut self) -> Result<(), OperationError> {
        let pipeline = self.pipeline.clone();
        self.active = Some(
            pipeline
                .tracker
                .prepare(&self.pr, pipeline.urls_before_app(&self.pr)),
        );

        let config = match pipeline.resolver.resolve(&self.pr).await {
            Ok(config) => config,
            Err(e) => return self.fail_early(e.to_string()).await,
        };

        let app = match pipeline.apps.ensure_app(self.pr.number).await {
            Ok(app) => app,
            Err(e) => return self.fail_early(format!("could not create app: {e}")).await,
        };

        let target = pipeline.apps.target();
        self.active()?.set_urls(DeploymentUrls {
            flynn_app_url: Some(target.dashboard_url(&app)),
            deployed_app_url: target.app_url(&app.name),
        });

        let applied = match pipeline.apps.apply_config(&app, &config).await {
            Ok(applied) => applied,
            Err(e) => return self.fail_early(e.to_string()).await,
        };

        pipeline
            .tracker
            .begin(self.active()?)
            .await
            .map_err(tracker_error)?;
        self.log(&format!("releasing {} with VERSION={}", app.name, applied.version))
            .await?;

        let result = self.build(&app, &config).await;
        let active = self.active()?;
        match result {
            Ok(()) => {
                pipeline
                    .tracker
                    .succeed(active)
                    .await
                    .map_err(tracker_error)?;
                info!(app = %app.name, version = applied.version, "deploy succeeded");
                Ok(())
            }
            Err(reason) => {
                pipeline
                    .tracker
                    .fail(active, &reason)
                    .await
                    .map_err(tracker_error)?;
                Err(OperationError::new(reason))
            }
        }
    }

    async fn timed_out(&mut self, after: Duration) {
        let reason = format!("deploy timed out after {after:?}");
        let Some(active) = self.active.as_mut() else {
            warn!(pr = %self.pr.number, "deploy timed out before it started");
            return;
        };
        if active.is_terminal() {
            warn!(pr = %self.pr.number, deployment = %active.id(), "deploy timed out after its deployment resolved");
            return;
        }
        if let Err(e) = self.pipeline.tracker.fail(active, &reason).await {
            error!(pr = %self.pr.number, error = %e, "could not record timed out deploy");
        }
    }
}

/// Deletes the PR's preview app. Deleting an app that is already gone
/// succeeds.
pub struct TeardownOperation {
    pipeline: Arc<DeployPipeline>,
    pr: PullRequestRef,
}

impl TeardownOperation {
    pub fn new(pipeline: Arc<DeployPipeline>, pr: PullRequestRef) -> Self {
        TeardownOperation { pipeline, pr }
    }
}

#[async_trait]
impl Operation for TeardownOperation {
    fn name(&self) -> &'static str {
        "teardown"
    }

    #[instrument(skip(self), fields(pr = %self.pr.number))]
    async fn run(&mut self) -> Result<(), OperationError> {
        match self.pipeline.apps.delete_app(self.pr.number).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                info!("app already gone");
                Ok(())
            }
            Err(e) => Err(OperationError::new(format!(
                "could not delete {}: {e}",
                self.pr.app_name()
            ))),
        }
    }
}
