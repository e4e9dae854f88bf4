//! Pushing snapshots to the platform's git remote.
//!
//! The platform builds on receipt of a push to `master` and streams the build
//! output back over the push connection, so the combined output of
//! `git push` is the build log.

use std::path::Path;

use async_trait::async_trait;

use super::snapshot::SourceSnapshot;
use super::{
    CommitIdentity, GitError, GitResult, describe_command, git_command, output_or_kill,
    redact_credentials_in, run_git,
};

/// Name given to the platform remote inside a snapshot.
pub const PLATFORM_REMOTE: &str = "flynn";

/// Refspec every snapshot is pushed with.
pub const DEPLOY_REFSPEC: &str = "HEAD:refs/heads/master";

/// Output of a successful push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutput {
    /// Combined stdout and stderr of `git push`.
    pub log: String,
}

/// Force-pushes the snapshot's single commit to `remote_url`.
///
/// Pushing replaces whatever the remote held; previous snapshots share no
/// history with the new one.
pub async fn push_snapshot(
    snapshot: &Path,
    remote_url: &str,
    ssl_verify: bool,
) -> GitResult<PushOutput> {
    run_git(snapshot, &["remote", "add", PLATFORM_REMOTE, remote_url]).await?;

    let mut args: Vec<&str> = Vec::new();
    if !ssl_verify {
        args.extend(["-c", "http.sslVerify=false"]);
    }
    args.extend(["push", "--force", PLATFORM_REMOTE, DEPLOY_REFSPEC]);

    let mut push = git_command(snapshot);
    push.args(&args);
    let output = output_or_kill(push).await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let log = redact_credentials_in(format!("{stdout}{stderr}").trim_end());

    if output.status.success() {
        return Ok(PushOutput { log });
    }

    if stderr.contains("rejected") || stderr.contains("failed to push") {
        return Err(GitError::PushRejected { details: log });
    }

    Err(GitError::CommandFailed {
        command: describe_command(&args),
        stderr: log,
    })
}

/// Ships a PR branch to a platform git remote.
#[async_trait]
pub trait BranchPusher: Send + Sync {
    async fn push_branch(&self, branch: &str, remote_url: &str) -> GitResult<PushOutput>;
}

/// [`BranchPusher`] backed by the `git` CLI.
///
/// Clones from `source_url`, which carries its own credentials when the
/// source repository is private.
#[derive(Debug, Clone)]
pub struct GitPushDeployer {
    source_url: String,
    identity: CommitIdentity,
    ssl_verify: bool,
}

impl GitPushDeployer {
    pub fn new(source_url: impl Into<String>) -> Self {
        GitPushDeployer {
            source_url: source_url.into(),
            identity: CommitIdentity::default(),
            ssl_verify: true,
        }
    }

    pub fn with_identity(mut self, identity: CommitIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Disables TLS certificate checks on the push only (self-signed
    /// cluster certificates).
    pub fn with_ssl_verify(mut self, ssl_verify: bool) -> Self {
        self.ssl_verify = ssl_verify;
        self
    }

    async fn deploy(&self, branch: &str, remote_url: &str) -> GitResult<PushOutput> {
        let snapshot = SourceSnapshot::create(&self.source_url, branch, &self.identity).await?;
        push_snapshot(snapshot.path(), remote_url, self.ssl_verify).await
    }
}

#[async_trait]
impl BranchPusher for GitPushDeployer {
    /// Dropping the returned future kills any git process still running
    /// and removes the scratch directory.
    async fn push_branch(&self, branch: &str, remote_url: &str) -> GitResult<PushOutput> {
        tracing::info!(branch = %branch, "pushing snapshot to platform");
        let result = self.deploy(branch, remote_url).await;

        match &result {
            Ok(out) => tracing::debug!(lines = out.log.lines().count(), "push finished"),
            Err(e) => tracing::warn!(error = %e, "push failed"),
        }
        result
    }
}

#[async_trait]
impl<T: BranchPusher + ?Sized> BranchPusher for std::sync::Arc<T> {
    async fn push_branch(&self, branch: &str, remote_url: &str) -> GitResult<PushOutput> {
        (**self).push_branch(branch, remote_url).await
    }
}
