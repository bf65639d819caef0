//! Bounded git subprocess execution behind a capability trait.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs git subcommands. Swapped for a fake in tests.
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run `git <args>` in `dir`, returning trimmed stdout. Non-zero exit
    /// is an error carrying stderr.
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String>;
}

/// The real thing: `git` on PATH, every invocation bounded by a timeout
/// so a wedged remote or lock never hangs a worker.
#[derive(Debug, Clone)]
pub struct SystemGit {
    timeout: Duration,
}

impl SystemGit {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemGit {
    fn default() -> Self {
        Self::new(DEFAULT_GIT_TIMEOUT)
    }
}

#[async_trait]
impl GitRunner for SystemGit {
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(dir).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "git {} timed out after {}s",
                    args.join(" "),
                    self.timeout.as_secs()
                )
            })?
            .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

        if !output.status.success() {
            bail!(
                "git {} failed (exit {}): {}",
                args.join(" "),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
