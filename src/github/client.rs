//! Octocrab client wrapper scoped to a specific repository.
//!
//! `OctocrabClient` is the source-host adapter: it reads preview config
//! through the contents API and reports deployments through the deployments
//! API, always against the one repository it was built for.

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};

use crate::preview::{ConfigSource, SourceError};
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::tracker::{HostDeploymentId, ReportError, StatusReporter, StatusUpdate};
use crate::types::{PullRequestRef, RepoId};

use super::error::GitHubApiError;

/// Longest description the deployment status API accepts.
const MAX_DESCRIPTION_LEN: usize = 140;

/// A source-host API client scoped to a specific repository.
#[derive(Clone)]
pub struct OctocrabClient {
    client: Octocrab,
    repo: RepoId,
    retry: RetryConfig,
}

impl OctocrabClient {
    /// Creates a new client scoped to the given repository.
    pub fn new(client: Octocrab, repo: RepoId) -> Self {
        Self {
            client,
            repo,
            retry: RetryConfig::DEFAULT,
        }
    }

    /// Creates a client from a personal access or installation token.
    pub fn from_token(token: impl Into<String>, repo: RepoId) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self::new(client, repo))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the repository this client is scoped to.
    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    async fn file_at(&self, path: &str, git_ref: &str) -> Result<Option<String>, GitHubApiError> {
        let result = self
            .client
            .repos(&self.repo.owner, &self.repo.repo)
            .get_content()
            .path(path)
            .r#ref(git_ref)
            .send()
            .await;

        match result {
            Ok(mut contents) => {
                if contents.items.is_empty() {
                    return Ok(None);
                }
                let item = contents.items.swap_remove(0);
                item.decoded_content().map(Some).ok_or_else(|| {
                    GitHubApiError::permanent_without_source(format!(
                        "{path} at {git_ref} is not a file"
                    ))
                })
            }
            Err(e) => {
                let err = GitHubApiError::from_octocrab(e);
                if err.is_not_found() { Ok(None) } else { Err(err) }
            }
        }
    }

    async fn post_deployment(
        &self,
        request: &DeploymentRequest<'_>,
    ) -> Result<HostDeploymentId, GitHubApiError> {
        let url = format!("/repos/{}/{}/deployments", self.repo.owner, self.repo.repo);
        let created: DeploymentResponse = self
            .client
            .post(&url, Some(request))
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        Ok(HostDeploymentId(created.id))
    }

    async fn post_status(
        &self,
        deployment: HostDeploymentId,
        request: &StatusRequest<'_>,
    ) -> Result<(), GitHubApiError> {
        let url = format!(
            "/repos/{}/{}/deployments/{}/statuses",
            self.repo.owner, self.repo.repo, deployment.0
        );
        let _: serde_json::Value = self
            .client
            .post(&url, Some(request))
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        Ok(())
    }
}

impl std::fmt::Debug for OctocrabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabClient")
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct DeploymentRequest<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    environment: &'a str,
    description: String,
    auto_merge: bool,
    required_contexts: [&'a str; 0],
    transient_environment: bool,
}

#[derive(Debug, Deserialize)]
struct DeploymentResponse {
    id: u64,
}

#[derive(Debug, Serialize)]
struct StatusRequest<'a> {
    state: &'static str,
    environment_url: &'a str,
    log_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    auto_inactive: bool,
}

fn truncate_description(text: &str) -> &str {
    match text.char_indices().nth(MAX_DESCRIPTION_LEN) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl ConfigSource for OctocrabClient {
    async fn fetch_file(&self, path: &str, git_ref: &str) -> Result<Option<String>, SourceError> {
        self.file_at(path, git_ref).await.map_err(SourceError::from)
    }
}

#[async_trait]
impl StatusReporter for OctocrabClient {
    async fn create_deployment(
        &self,
        pr: &PullRequestRef,
        environment: &str,
    ) -> Result<HostDeploymentId, ReportError> {
        let request = DeploymentRequest {
            git_ref: pr.git_ref(),
            environment,
            description: format!("Preview of PR {}", pr.number),
            auto_merge: false,
            required_contexts: [],
            transient_environment: true,
        };
        retry_with_backoff(self.retry, "create deployment", || {
            self.post_deployment(&request)
        })
        .await
        .map_err(ReportError::from)
    }

    async fn report_status(
        &self,
        deployment: HostDeploymentId,
        update: &StatusUpdate,
    ) -> Result<(), ReportError> {
        let request = StatusRequest {
            state: update.state.as_str(),
            environment_url: &update.environment_url,
            log_url: &update.log_url,
            description: update.description.as_deref().map(truncate_description),
            auto_inactive: true,
        };
        retry_with_backoff(self.retry, "report deployment status", || {
            self.post_status(deployment, &request)
        })
        .await
        .map_err(ReportError::from)
    }
}
