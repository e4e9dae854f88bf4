//! Resolves a PR's preview config from the source host.

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::{Classify, RetryConfig, retry_with_backoff};
use crate::types::PullRequestRef;

use super::{ConfigError, PREVIEW_CONFIG_PATH, PreviewConfig, parse_preview_config};

/// Failure reading a file from the source host.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SourceError {
    pub message: String,
    pub transient: bool,
}

impl SourceError {
    pub fn transient(message: impl Into<String>) -> Self {
        SourceError {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        SourceError {
            message: message.into(),
            transient: false,
        }
    }
}

impl Classify for SourceError {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

/// Read access to repository files at a given ref.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Returns the file's contents, or `None` if it does not exist at `git_ref`.
    async fn fetch_file(&self, path: &str, git_ref: &str) -> Result<Option<String>, SourceError>;
}

#[async_trait]
impl<T: ConfigSource + ?Sized> ConfigSource for std::sync::Arc<T> {
    async fn fetch_file(&self, path: &str, git_ref: &str) -> Result<Option<String>, SourceError> {
        (**self).fetch_file(path, git_ref).await
    }
}

/// Fetches and parses `pr-app.yaml` for a pull request.
pub struct ConfigResolver<S> {
    source: S,
    retry: RetryConfig,
}

impl<S: ConfigSource> ConfigResolver<S> {
    pub fn new(source: S) -> Self {
        ConfigResolver {
            source,
            retry: RetryConfig::DEFAULT,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Resolves the preview config at the PR's head commit (or branch tip).
    ///
    /// A missing file yields the default config.
    pub async fn resolve(&self, pr: &PullRequestRef) -> Result<PreviewConfig, ConfigError> {
        let git_ref = pr.git_ref();
        let contents = retry_with_backoff(self.retry, "fetch preview config", || {
            self.source.fetch_file(PREVIEW_CONFIG_PATH, git_ref)
        })
        .await
        .map_err(|source| ConfigError::Source {
            path: PREVIEW_CONFIG_PATH,
            source,
        })?;

        match contents {
            Some(text) => {
                let config = parse_preview_config(&text)?;
                tracing::debug!(
                    pr = %pr.number,
                    git_ref,
                    env = config.env.len(),
                    resources = config.resources.len(),
                    routes = config.routes.len(),
                    "resolved preview config"
                );
                Ok(config)
            }
            None => {
                tracing::debug!(pr = %pr.number, git_ref, "no preview config, using defaults");
                Ok(PreviewConfig::default())
            }
        }
    }
}
