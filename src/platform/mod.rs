//! The deployment platform: ephemeral apps, their configuration and their
//! build/deploy status.
//!
//! [`DeployTarget`] is the capability the rest of the crate programs against.
//! [`FlynnClient`] implements it over the Flynn controller API; tests use an
//! in-memory fake. [`AppManager`] layers the preview semantics (idempotent
//! ensure/delete, `VERSION` bumping, partial-failure reporting) on top.

pub mod flynn;
pub mod manager;
pub mod wait;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::preview::Route;
use crate::retry::Classify;
use crate::types::AppName;

pub use flynn::FlynnClient;
pub use manager::{AppManager, ApplyConfigError, ConfigStep};
pub use wait::{WaitConfig, await_deploy};

/// Process name of the app's main HTTP process.
pub const WEB_PROCESS: &str = "web";

/// A preview app as known to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppIdentity {
    /// Derived deterministically from the PR number.
    pub name: AppName,

    /// Platform-assigned id. A recreated app gets a fresh one.
    pub id: String,
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Outcome of the most recent deploy of an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployState {
    /// Still building or rolling out.
    Pending,
    Succeeded,
    /// Failed, with the platform's reason.
    Failed(String),
}

impl DeployState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeployState::Pending)
    }
}

/// The kind of platform error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    /// The app (or another keyed object) does not exist.
    NotFound,

    /// 5xx, 429 or a dropped connection. Safe to retry.
    Transient,

    /// Anything else. Retrying will not help.
    Permanent,
}

/// A platform API error.
#[derive(Debug, Clone, Error)]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "platform API error (HTTP {}): {}", code, self.message),
            None => write!(f, "platform API error: {}", self.message),
        }
    }
}

impl PlatformError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_kind(PlatformErrorKind::NotFound, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::with_kind(PlatformErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::with_kind(PlatformErrorKind::Permanent, message)
    }

    fn with_kind(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        PlatformError {
            kind,
            status_code: None,
            message: message.into(),
        }
    }

    /// Classifies an HTTP error response.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            404 => PlatformErrorKind::NotFound,
            429 => PlatformErrorKind::Transient,
            code if (500..600).contains(&code) => PlatformErrorKind::Transient,
            _ => PlatformErrorKind::Permanent,
        };
        PlatformError {
            kind,
            status_code: Some(status),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == PlatformErrorKind::NotFound
    }
}

impl Classify for PlatformError {
    fn is_transient(&self) -> bool {
        self.kind == PlatformErrorKind::Transient
    }
}

/// Result type for platform calls.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Process counts, keyed by process type.
pub type Formation = BTreeMap<String, u32>;

/// The operations the orchestrator needs from the deployment platform.
#[async_trait]
pub trait DeployTarget: Send + Sync {
    /// Looks up an app by name.
    async fn find_app(&self, name: &AppName) -> PlatformResult<Option<AppIdentity>>;

    async fn create_app(&self, name: &AppName) -> PlatformResult<AppIdentity>;

    /// Deletes the app with its resources and routes. Fails with `NotFound`
    /// when the app does not exist.
    async fn delete_app(&self, app: &AppIdentity) -> PlatformResult<()>;

    /// Environment of the app's current release (empty before the first).
    async fn env(&self, app: &AppIdentity) -> PlatformResult<BTreeMap<String, String>>;

    /// Replaces the environment, creating a new release.
    async fn set_env(&self, app: &AppIdentity, env: &BTreeMap<String, String>)
    -> PlatformResult<()>;

    /// Provider names of the resources attached to the app.
    async fn resources(&self, app: &AppIdentity) -> PlatformResult<Vec<String>>;

    async fn attach_resource(&self, app: &AppIdentity, provider: &str) -> PlatformResult<()>;

    /// Extra HTTP routes of the app (the default route is not listed).
    async fn routes(&self, app: &AppIdentity) -> PlatformResult<Vec<Route>>;

    async fn add_route(&self, app: &AppIdentity, route: &Route) -> PlatformResult<()>;

    async fn set_scale(&self, app: &AppIdentity, formation: &Formation) -> PlatformResult<()>;

    /// State of the most recent deploy.
    async fn deploy_state(&self, app: &AppIdentity) -> PlatformResult<DeployState>;

    /// Git remote a snapshot is pushed to in order to deploy.
    fn git_remote_url(&self, name: &AppName) -> String;

    /// Link to the app in the platform dashboard.
    fn dashboard_url(&self, app: &AppIdentity) -> String;

    /// Public URL of the running app.
    fn app_url(&self, name: &AppName) -> String;
}
