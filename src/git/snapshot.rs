//! History-free source snapshots.
//!
//! The PR branch is shallow-cloned into a scratch directory, its `.git` is
//! discarded and the tree is committed into a brand new repository as a single
//! root commit. The scratch directory belongs to the [`SourceSnapshot`] and is
//! removed when the value is dropped, whichever way the deploy ends.

use std::path::Path;

use tempfile::TempDir;

use super::{CommitIdentity, GitResult, check_output, git_commit_command, output_or_kill, run_git};

/// Commit message of every snapshot commit.
pub const SNAPSHOT_MESSAGE: &str = "pr deploy";

/// A working tree holding exactly one commit: the PR's source at clone time.
#[derive(Debug)]
pub struct SourceSnapshot {
    dir: TempDir,
}

impl SourceSnapshot {
    /// Clones `branch` of `source_url` and re-commits it as a single commit.
    pub async fn create(
        source_url: &str,
        branch: &str,
        identity: &CommitIdentity,
    ) -> GitResult<SourceSnapshot> {
        let dir = tempfile::Builder::new().prefix("pr-apps-").tempdir()?;
        let path = dir.path();

        run_git(
            path,
            &["clone", "--quiet", "--depth", "1", "--branch", branch, source_url, "."],
        )
        .await?;
        tokio::fs::remove_dir_all(path.join(".git")).await?;

        run_git(path, &["init", "--quiet"]).await?;
        run_git(path, &["add", "--all", "."]).await?;

        let args = [
            "commit",
            "--quiet",
            "--no-verify",
            "--allow-empty",
            "-m",
            SNAPSHOT_MESSAGE,
        ];
        let mut commit = git_commit_command(path, identity);
        commit.args(args);
        check_output(&args, output_or_kill(commit).await?)?;

        tracing::debug!(branch, dir = %path.display(), "created source snapshot");
        Ok(SourceSnapshot { dir })
    }

    /// The snapshot's working tree.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
