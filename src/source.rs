//! Source-control collaborator: materializes a pull request commit locally.

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, error, info};

use crate::error::{RelayError, Result};
use crate::utils::{command_in, display_command, failure_output, run_captured};

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Clones repository `slug` into `dest`, which must not exist yet.
    async fn clone_repo(&self, slug: &str, dest: &Path) -> Result<()>;

    /// Checks out `commit` inside the working copy at `workdir`.
    async fn checkout(&self, workdir: &Path, commit: &str) -> Result<()>;
}

/// Drives the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    clone_base: String,
}

impl GitCli {
    /// `clone_base` is prefixed to the slug, e.g. `https://github.com`.
    pub fn new(clone_base: impl Into<String>) -> Self {
        Self {
            clone_base: clone_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn clone_url(&self, slug: &str) -> String {
        format!("{}/{}", self.clone_base, slug)
    }

    async fn run_git(&self, operation: &str, args: &[&str], cwd: &Path) -> Result<String> {
        let line = display_command("git", args);
        info!("Running (cwd = '{}'): {}", cwd.display(), line);

        let mut cmd = command_in("git", cwd);
        cmd.args(args)
            // never block on a credential prompt for a missing repository
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = run_captured(&mut cmd).await.map_err(|e| {
            error!("{} failed to start: {}", operation, e);
            RelayError::GitOperationFailed {
                operation: operation.to_string(),
                message: format!("failed to start git: {}", e),
            }
        })?;

        if !output.status.success() {
            let message = failure_output(&output);
            error!("{} failed: {}", operation, message);
            return Err(RelayError::GitOperationFailed {
                operation: operation.to_string(),
                message,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("{} output:\n{}", operation, stdout);
        Ok(stdout)
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn clone_repo(&self, slug: &str, dest: &Path) -> Result<()> {
        let parent = dest.parent().ok_or_else(|| RelayError::GitOperationFailed {
            operation: "git clone".to_string(),
            message: format!("'{}' has no parent directory", dest.display()),
        })?;
        tokio::fs::create_dir_all(parent).await?;

        let url = self.clone_url(slug);
        let dest = dest.to_string_lossy();
        self.run_git(
            "git clone",
            &["clone", "--quiet", url.as_str(), &*dest],
            parent,
        )
        .await
        .map(|_| ())
    }

    async fn checkout(&self, workdir: &Path, commit: &str) -> Result<()> {
        self.run_git(
            "git checkout",
            &["checkout", "--quiet", "--detach", commit],
            workdir,
        )
        .await
        .map(|_| ())
    }
}
