//! Preview app lifecycle on top of a [`DeployTarget`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::preview::{PreviewConfig, Route};
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::types::{AppName, PrNumber};

use super::{AppIdentity, DeployTarget, Formation, PlatformError, PlatformResult, WEB_PROCESS};

/// Env var carrying the per-app deploy counter.
pub const VERSION_VAR: &str = "VERSION";

/// One step of [`AppManager::apply_config`], in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStep {
    SetEnv,
    AttachResources,
    AddRoutes,
}

impl fmt::Display for ConfigStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigStep::SetEnv => "set env",
            ConfigStep::AttachResources => "attach resources",
            ConfigStep::AddRoutes => "add routes",
        })
    }
}

/// Applying preview config stopped partway.
///
/// The app is left as it is: steps in `completed` took effect, `failed` and
/// anything after it did not.
#[derive(Debug, Error)]
#[error("applying config to {app} failed at {failed} (completed: {}): {source}", list_steps(.completed))]
pub struct ApplyConfigError {
    pub app: AppName,
    pub completed: Vec<ConfigStep>,
    pub failed: ConfigStep,
    #[source]
    pub source: PlatformError,
}

fn list_steps(steps: &[ConfigStep]) -> String {
    if steps.is_empty() {
        return "none".to_string();
    }
    steps
        .iter()
        .map(ConfigStep::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// What [`AppManager::apply_config`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedConfig {
    /// The `VERSION` the app's env now carries.
    pub version: u64,
    pub attached: Vec<String>,
    pub added_routes: Vec<Route>,
}

/// Creates, configures and deletes preview apps.
///
/// Every platform call is retried on transient failure. Calls for one PR are
/// serialized by the work queue, so `ensure_app` does not guard against
/// concurrent creation itself.
#[derive(Clone)]
pub struct AppManager {
    target: Arc<dyn DeployTarget>,
    retry: RetryConfig,
}

impl AppManager {
    pub fn new(target: Arc<dyn DeployTarget>) -> Self {
        AppManager {
            target,
            retry: RetryConfig::DEFAULT,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn target(&self) -> &Arc<dyn DeployTarget> {
        &self.target
    }

    /// Returns the PR's app, creating it if it does not exist.
    #[instrument(skip(self), fields(pr = %pr))]
    pub async fn ensure_app(&self, pr: PrNumber) -> PlatformResult<AppIdentity> {
        let name = pr.app_name();
        let existing = retry_with_backoff(self.retry, "find app", || self.target.find_app(&name))
            .await?;
        if let Some(app) = existing {
            tracing::debug!(app = %app, "reusing existing app");
            return Ok(app);
        }

        let app =
            retry_with_backoff(self.retry, "create app", || self.target.create_app(&name)).await?;
        tracing::info!(app = %app, "created app");
        Ok(app)
    }

    /// Applies a preview config: sets the env (with `VERSION` bumped), then
    /// attaches missing resources, then adds missing routes.
    #[instrument(skip(self, config), fields(app = %app.name))]
    pub async fn apply_config(
        &self,
        app: &AppIdentity,
        config: &PreviewConfig,
    ) -> Result<AppliedConfig, ApplyConfigError> {
        let mut completed = Vec::new();
        let fail = |completed: &Vec<ConfigStep>, failed, source| ApplyConfigError {
            app: app.name.clone(),
            completed: completed.clone(),
            failed,
            source,
        };

        // Env
        let current = retry_with_backoff(self.retry, "read env", || self.target.env(app))
            .await
            .map_err(|e| fail(&completed, ConfigStep::SetEnv, e))?;
        let version = next_version(&current);
        let env = release_env(&config.env, version);
        retry_with_backoff(self.retry, "set env", || self.target.set_env(app, &env))
            .await
            .map_err(|e| fail(&completed, ConfigStep::SetEnv, e))?;
        completed.push(ConfigStep::SetEnv);

        // Resources
        let present = retry_with_backoff(self.retry, "list resources", || {
            self.target.resources(app)
        })
        .await
        .map_err(|e| fail(&completed, ConfigStep::AttachResources, e))?;
        let attached = missing_resources(&config.resources, &present);
        for provider in &attached {
            retry_with_backoff(self.retry, "attach resource", || {
                self.target.attach_resource(app, provider)
            })
            .await
            .map_err(|e| fail(&completed, ConfigStep::AttachResources, e))?;
        }
        completed.push(ConfigStep::AttachResources);

        // Routes
        let existing = retry_with_backoff(self.retry, "list routes", || self.target.routes(app))
            .await
            .map_err(|e| fail(&completed, ConfigStep::AddRoutes, e))?;
        let added_routes = missing_routes(&config.routes, &existing);
        for route in &added_routes {
            retry_with_backoff(self.retry, "add route", || self.target.add_route(app, route))
                .await
                .map_err(|e| fail(&completed, ConfigStep::AddRoutes, e))?;
        }

        tracing::info!(
            version,
            attached = attached.len(),
            routes = added_routes.len(),
            "applied preview config"
        );
        Ok(AppliedConfig {
            version,
            attached,
            added_routes,
        })
    }

    /// Scales the app's processes after a successful deploy.
    #[instrument(skip(self, config), fields(app = %app.name))]
    pub async fn scale(&self, app: &AppIdentity, config: &PreviewConfig) -> PlatformResult<()> {
        let formation = formation_for(&app.name, config);
        retry_with_backoff(self.retry, "scale", || self.target.set_scale(app, &formation)).await
    }

    /// Deletes the PR's app. Returns `false` if there was nothing to delete.
    #[instrument(skip(self), fields(pr = %pr))]
    pub async fn delete_app(&self, pr: PrNumber) -> PlatformResult<bool> {
        let name = pr.app_name();
        let Some(app) =
            retry_with_backoff(self.retry, "find app", || self.target.find_app(&name)).await?
        else {
            tracing::debug!(app = %name, "no app to delete");
            return Ok(false);
        };

        match retry_with_backoff(self.retry, "delete app", || self.target.delete_app(&app)).await
        {
            Ok(()) => {
                tracing::info!(app = %app, "deleted app");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// `VERSION` for the next release: one more than the current, or 1 when the
/// current value is absent or not a number.
pub fn next_version(env: &BTreeMap<String, String>) -> u64 {
    env.get(VERSION_VAR)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(1, |v| v.saturating_add(1))
}

/// The env a release is created with: the config's vars plus `VERSION`.
pub fn release_env(config_env: &BTreeMap<String, String>, version: u64) -> BTreeMap<String, String> {
    let mut env = config_env.clone();
    env.insert(VERSION_VAR.to_string(), version.to_string());
    env
}

/// Providers in `wanted` that are not yet attached, in config order, once each.
pub fn missing_resources(wanted: &[String], present: &[String]) -> Vec<String> {
    let mut seen: BTreeSet<&str> = present.iter().map(String::as_str).collect();
    wanted
        .iter()
        .filter(|p| seen.insert(p.as_str()))
        .cloned()
        .collect()
}

/// Routes in `wanted` that the app does not have yet, once each.
pub fn missing_routes(wanted: &[Route], existing: &[Route]) -> Vec<Route> {
    let mut seen: BTreeSet<&Route> = existing.iter().collect();
    wanted.iter().filter(|r| seen.insert(r)).cloned().collect()
}

/// `web: 1` plus one instance of every process a route points at.
///
/// Route services are named `<app>-<process>`; services that do not follow
/// that pattern belong to something else and are not scaled.
pub fn formation_for(app: &AppName, config: &PreviewConfig) -> Formation {
    let prefix = format!("{}-", app);
    let mut formation = Formation::new();
    formation.insert(WEB_PROCESS.to_string(), 1);
    for route in &config.routes {
        if let Some(process) = route.service.strip_prefix(&prefix)
            && !process.is_empty()
        {
            formation.insert(process.to_string(), 1);
        }
    }
    formation
}
