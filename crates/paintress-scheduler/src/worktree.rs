//! A fixed pool of disposable git worktrees for parallel workers.
//!
//! Acquire/release is a counting semaphore over a set of paths; each path
//! is exclusively owned by one worker between acquire and release.

use anyhow::{bail, Context, Result};
use paintress_process::GitRunner;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct WorktreePool {
    continent: PathBuf,
    worktrees_dir: PathBuf,
    base_branch: String,
    setup_cmd: String,
    git: Arc<dyn GitRunner>,
    available: Mutex<Vec<PathBuf>>,
    semaphore: Semaphore,
    size: u32,
}

impl WorktreePool {
    pub fn new(
        continent: PathBuf,
        worktrees_dir: PathBuf,
        base_branch: String,
        setup_cmd: String,
        git: Arc<dyn GitRunner>,
        size: u32,
    ) -> Self {
        Self {
            continent,
            worktrees_dir,
            base_branch,
            setup_cmd,
            git,
            available: Mutex::new(Vec::new()),
            semaphore: Semaphore::new(0),
            size,
        }
    }

    /// Create the pool's worktrees. Leftovers from a crashed prior run are
    /// force-removed first, so init is self-healing. A failing setup
    /// command aborts the whole init.
    pub async fn init(&self) -> Result<()> {
        self.git
            .run(&self.continent, &["worktree", "prune"])
            .await
            .context("git worktree prune failed")?;

        for index in 0..self.size {
            let path = self.worktrees_dir.join(format!("wt-{index:02}"));
            let path_str = path
                .to_str()
                .context("worktree path is not valid UTF-8")?
                .to_string();

            // Self-healing: a stale registration or directory from a crash
            // must not block this run.
            if path.exists() {
                if let Err(e) = self
                    .git
                    .run(&self.continent, &["worktree", "remove", "-f", &path_str])
                    .await
                {
                    debug!(path = %path.display(), error = %e, "stale worktree remove failed");
                }
                let _ = std::fs::remove_dir_all(&path);
            }

            self.git
                .run(
                    &self.continent,
                    &["worktree", "add", "--detach", &path_str, &self.base_branch],
                )
                .await
                .with_context(|| format!("Failed to add worktree {}", path.display()))?;

            if !self.setup_cmd.is_empty() {
                self.run_setup(&path).await?;
            }

            info!(path = %path.display(), "worktree ready");
            self.available.lock().await.push(path);
            self.semaphore.add_permits(1);
        }
        Ok(())
    }

    async fn run_setup(&self, path: &PathBuf) -> Result<()> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.setup_cmd)
            .current_dir(path)
            .output()
            .await
            .context("Failed to run worktree setup command")?;
        if !output.status.success() {
            bail!(
                "worktree setup command failed in {} (exit {}): {}",
                path.display(),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Take an available worktree, blocking until one frees up. Returns
    /// `None` when the token is cancelled first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<PathBuf> {
        tokio::select! {
            permit = self.semaphore.acquire() => {
                permit.ok()?.forget();
                self.available.lock().await.pop()
            }
            _ = cancel.cancelled() => None,
        }
    }

    /// Reset a worktree to a clean base-branch state and return it to the
    /// pool. Reset failures are logged; the slot goes back either way.
    pub async fn release(&self, path: PathBuf) {
        for args in [
            vec!["checkout", "--detach", self.base_branch.as_str()],
            vec!["reset", "--hard", self.base_branch.as_str()],
            vec!["clean", "-fd"],
        ] {
            if let Err(e) = self.git.run(&path, &args).await {
                warn!(path = %path.display(), error = %e, "worktree reset step failed");
            }
        }
        self.available.lock().await.push(path);
        self.semaphore.add_permits(1);
    }

    /// Remove every pooled worktree and prune the registrations.
    pub async fn shutdown(&self) {
        let paths: Vec<PathBuf> = self.available.lock().await.drain(..).collect();
        for path in paths {
            let Some(path_str) = path.to_str() else {
                continue;
            };
            if let Err(e) = self
                .git
                .run(&self.continent, &["worktree", "remove", "-f", path_str])
                .await
            {
                warn!(path = %path.display(), error = %e, "worktree remove failed");
            }
        }
        if let Err(e) = self.git.run(&self.continent, &["worktree", "prune"]).await {
            warn!(error = %e, "final worktree prune failed");
        }
    }
}
