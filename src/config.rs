//! Process settings, read from `PR_APPS_*` environment variables.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::types::RepoId;

const ENV_WEBHOOK_SECRET: &str = "PR_APPS_WEBHOOK_SECRET";
const ENV_GITHUB_TOKEN: &str = "PR_APPS_GITHUB_TOKEN";
const ENV_GITHUB_REPO: &str = "PR_APPS_GITHUB_REPO";
const ENV_CLUSTER_DOMAIN: &str = "PR_APPS_CLUSTER_DOMAIN";
const ENV_FLYNN_AUTH_KEY: &str = "PR_APPS_FLYNN_AUTH_KEY";
const ENV_DOMAIN: &str = "PR_APPS_DOMAIN";
const ENV_LISTEN_ADDR: &str = "PR_APPS_LISTEN_ADDR";
const ENV_OPERATION_TIMEOUT_SECS: &str = "PR_APPS_OPERATION_TIMEOUT_SECS";
const ENV_DEPLOY_WAIT_SECS: &str = "PR_APPS_DEPLOY_WAIT_SECS";
const ENV_GIT_SSL_VERIFY: &str = "PR_APPS_GIT_SSL_VERIFY";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 600;
const DEFAULT_DEPLOY_WAIT_SECS: u64 = 300;

/// A setting is missing or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

/// Everything the binary needs to wire up the service.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub webhook_secret: String,
    pub github_token: String,
    pub github_repo: RepoId,
    /// Domain the platform cluster serves apps under.
    pub cluster_domain: String,
    pub flynn_auth_key: String,
    /// Public domain of this service; log URLs hang off it.
    pub domain: String,
    pub listen_addr: SocketAddr,
    pub operation_timeout: Duration,
    pub deploy_wait: Duration,
    pub git_ssl_verify: bool,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("github_repo", &self.github_repo)
            .field("cluster_domain", &self.cluster_domain)
            .field("domain", &self.domain)
            .field("listen_addr", &self.listen_addr)
            .field("operation_timeout", &self.operation_timeout)
            .field("deploy_wait", &self.deploy_wait)
            .field("git_ssl_verify", &self.git_ssl_verify)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads settings with a custom environment source.
    pub fn from_env_with<F>(get_env: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            get_env(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(SettingsError::Missing(key))
        };

        let repo = required(ENV_GITHUB_REPO)?;
        let github_repo = RepoId::parse(&repo).ok_or_else(|| SettingsError::Invalid {
            var: ENV_GITHUB_REPO,
            message: format!("expected owner/repo, got '{repo}'"),
        })?;
        let cluster_domain = required(ENV_CLUSTER_DOMAIN)?;
        let domain = get_env(ENV_DOMAIN).unwrap_or_else(|| format!("pr-apps.{cluster_domain}"));

        let listen = get_env(ENV_LISTEN_ADDR).unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen.parse::<SocketAddr>().map_err(|e| SettingsError::Invalid {
            var: ENV_LISTEN_ADDR,
            message: format!("'{listen}': {e}"),
        })?;

        Ok(Settings {
            webhook_secret: required(ENV_WEBHOOK_SECRET)?,
            github_token: required(ENV_GITHUB_TOKEN)?,
            github_repo,
            cluster_domain,
            flynn_auth_key: required(ENV_FLYNN_AUTH_KEY)?,
            domain,
            listen_addr,
            operation_timeout: Duration::from_secs(parse_positive_secs(
                &get_env,
                ENV_OPERATION_TIMEOUT_SECS,
                DEFAULT_OPERATION_TIMEOUT_SECS,
            )?),
            deploy_wait: Duration::from_secs(parse_positive_secs(
                &get_env,
                ENV_DEPLOY_WAIT_SECS,
                DEFAULT_DEPLOY_WAIT_SECS,
            )?),
            git_ssl_verify: parse_bool(&get_env, ENV_GIT_SSL_VERIFY, true)?,
        })
    }

    /// The repository URL snapshots are cloned from, with the token embedded.
    pub fn source_url(&self) -> String {
        format!(
            "https://x-access-token:{}@github.com/{}/{}.git",
            self.github_token, self.github_repo.owner, self.github_repo.repo
        )
    }
}

fn parse_positive_secs<F>(get_env: &F, key: &'static str, default: u64) -> Result<u64, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(SettingsError::Invalid {
            var: key,
            message: format!("must be a positive integer, got '{raw}'"),
        }),
    }
}

fn parse_bool<F>(get_env: &F, key: &'static str, default: bool) -> Result<bool, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(SettingsError::Invalid {
            var: key,
            message: format!("expected true or false, got '{raw}'"),
        }),
    }
}
