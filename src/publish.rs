//! Request-to-publish orchestration.
//!
//! One run resets the scratch and host directories of a commit, fetches the
//! commit, builds it into the host directory and comments the preview link on
//! the pull request. Every failure is returned to the caller; nothing here
//! terminates the process.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::builder::{BuildTool, CommandBuildTool};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::notify::{CommentBody, CommentTarget, GitHubNotifier, Notifier};
use crate::request::BuildRequest;
use crate::source::{GitCli, SourceControl};

/// Directories owned by one commit. A pure function of the configured roots
/// and the commit, so different commits never share a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPaths {
    pub scratch_dir: PathBuf,
    pub host_dir: PathBuf,
}

impl PublishPaths {
    pub fn for_commit(config: &RelayConfig, commit: &str) -> Self {
        Self {
            scratch_dir: config.scratch_root.join(commit),
            host_dir: config.webroot.join(commit),
        }
    }
}

/// What happened to the preview comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Delivered { http_status: u16 },
    Rejected { http_status: u16 },
    Failed { reason: String },
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub run_id: String,
    pub commit: String,
    pub preview_url: String,
    pub host_dir: PathBuf,
    pub notification: NotificationOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Publisher {
    config: Arc<RelayConfig>,
    source: Arc<dyn SourceControl>,
    builder: Arc<dyn BuildTool>,
    notifier: Arc<dyn Notifier>,
}

impl Publisher {
    pub fn new(
        config: Arc<RelayConfig>,
        source: Arc<dyn SourceControl>,
        builder: Arc<dyn BuildTool>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            source,
            builder,
            notifier,
        }
    }

    /// Wires git, the configured build command and the GitHub API.
    pub fn from_config(config: Arc<RelayConfig>) -> Self {
        let source = Arc::new(GitCli::new(config.clone_base.clone()));
        let builder = Arc::new(CommandBuildTool::new(config.build_command.clone()));
        let notifier = Arc::new(GitHubNotifier::new(
            config.api_base.clone(),
            config.github_token.clone(),
        ));
        Self::new(config, source, builder, notifier)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn preview_url(&self, commit: &str) -> String {
        format!("https://{}.{}", commit, self.config.host_domain)
    }

    /// Runs the whole sequence for one request.
    pub async fn publish(&self, request: &BuildRequest) -> Result<PublishReport> {
        let run_id = Uuid::now_v7().to_string();
        let span = info_span!("publish", run_id = %run_id, commit = %request.commit);
        self.run(request, run_id).instrument(span).await
    }

    async fn run(&self, request: &BuildRequest, run_id: String) -> Result<PublishReport> {
        let started_at = Utc::now();
        info!(
            "Building PR #{} from {} at commit {} for merge into {}",
            request.pr_number, request.pr_slug, request.commit, request.target_slug
        );

        let paths = PublishPaths::for_commit(&self.config, &request.commit);
        remove_dir_logged("scratch", &paths.scratch_dir).await;
        remove_dir_logged("host", &paths.host_dir).await;

        let mut pending = PendingCleanup::new(&paths, self.config.keep_scratch);
        let built = self.fetch_and_build(request, &paths).await;
        // fetch_and_build already removed the host dir if the build failed
        pending.release(&paths.host_dir);

        if self.config.keep_scratch {
            debug!("Keeping scratch dir \"{}\"", paths.scratch_dir.display());
        } else {
            remove_dir_logged("scratch", &paths.scratch_dir).await;
        }
        pending.release(&paths.scratch_dir);
        built?;

        let preview_url = self.preview_url(&request.commit);
        let notification = self.notify(request, &preview_url).await;

        info!("Published {} to \"{}\"", preview_url, paths.host_dir.display());
        Ok(PublishReport {
            run_id,
            commit: request.commit.clone(),
            preview_url,
            host_dir: paths.host_dir,
            notification,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn fetch_and_build(&self, request: &BuildRequest, paths: &PublishPaths) -> Result<()> {
        with_timeout("fetch", self.config.fetch_timeout(), async {
            info!("Cloning {}", request.pr_slug);
            self.source
                .clone_repo(&request.pr_slug, &paths.scratch_dir)
                .await?;
            info!("Checking out {}", request.commit);
            self.source
                .checkout(&paths.scratch_dir, &request.commit)
                .await
        })
        .await?;

        tokio::fs::create_dir_all(&self.config.webroot).await?;

        info!("Executing build");
        let built = with_timeout(
            "build",
            self.config.build_timeout(),
            self.builder.build(&paths.scratch_dir, &paths.host_dir),
        )
        .await;

        if built.is_err() {
            // never publish a half-built preview
            remove_dir_logged("host", &paths.host_dir).await;
        }
        built
    }

    async fn notify(&self, request: &BuildRequest, preview_url: &str) -> NotificationOutcome {
        let target = CommentTarget {
            repo_slug: request.target_slug.clone(),
            pr_number: request.pr_number,
        };
        let comment = CommentBody::preview_link(preview_url);

        info!("Posting comment");
        let sent = with_timeout(
            "notify",
            self.config.notify_timeout(),
            self.notifier.post_comment(&target, &comment),
        )
        .await;

        match sent {
            Ok(response) if response.is_success() => {
                info!("Comment posted ({})", response.status);
                NotificationOutcome::Delivered {
                    http_status: response.status,
                }
            }
            Ok(response) => {
                warn!(
                    "Comment was not accepted ({}): {}",
                    response.status, response.body
                );
                NotificationOutcome::Rejected {
                    http_status: response.status,
                }
            }
            Err(e) => {
                error!("Could not post comment: {}", e);
                NotificationOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

async fn with_timeout<T, F>(step: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} timed out after {}s", step, limit.as_secs());
            Err(RelayError::Timeout {
                step,
                secs: limit.as_secs(),
            })
        }
    }
}

/// Directories a run still has to clean up if it is dropped mid-way, e.g.
/// when the client disconnects and axum drops the handler future.
struct PendingCleanup {
    dirs: Vec<PathBuf>,
}

impl PendingCleanup {
    fn new(paths: &PublishPaths, keep_scratch: bool) -> Self {
        let mut dirs = vec![paths.host_dir.clone()];
        if !keep_scratch {
            dirs.push(paths.scratch_dir.clone());
        }
        Self { dirs }
    }

    fn release(&mut self, dir: &Path) {
        self.dirs.retain(|d| d != dir);
    }
}

impl Drop for PendingCleanup {
    fn drop(&mut self) {
        if self.dirs.is_empty() {
            return;
        }
        warn!("Run cancelled, removing {} unfinished dir(s)", self.dirs.len());
        let dirs = std::mem::take(&mut self.dirs);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || dirs.iter().for_each(|d| remove_dir_blocking(d)));
            }
            Err(_) => dirs.iter().for_each(|d| remove_dir_blocking(d)),
        }
    }
}

fn remove_dir_blocking(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => info!("Deleted \"{}\"", dir.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete \"{}\": {}", dir.display(), e),
    }
}

/// Recursive delete that only logs failures. A missing directory is fine.
async fn remove_dir_logged(kind: &str, dir: &Path) {
    info!("Deleting {} dir \"{}\"", kind, dir.display());
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} dir \"{}\" did not exist", kind, dir.display());
        }
        Err(e) => warn!("Failed to delete {} dir \"{}\": {}", kind, dir.display(), e),
    }
}
