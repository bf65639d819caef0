//! Human-approval capability used by the pre-flight gate.

use anyhow::{Context, Result};
use async_trait::async_trait;
use paintress_core::AppError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Asks a human (or a stand-in) whether the run may proceed.
#[async_trait]
pub trait Approver: Send + Sync {
    /// `Ok(true)` approves, `Ok(false)` denies. Implementations must honor
    /// `cancel` instead of blocking forever.
    async fn request_approval(&self, cancel: &CancellationToken, message: &str) -> Result<bool>;
}

/// Reads one line from stdin. Anything other than `y`/`yes`
/// (case-insensitive) denies, including an empty line or EOF.
#[derive(Debug, Default)]
pub struct StdinApprover;

#[async_trait]
impl Approver for StdinApprover {
    async fn request_approval(&self, cancel: &CancellationToken, message: &str) -> Result<bool> {
        eprintln!("{message}");
        eprint!("Proceed? [y/N] ");

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        tokio::select! {
            read = reader.read_line(&mut line) => {
                read.context("Failed to read approval from stdin")?;
                let answer = line.trim().to_lowercase();
                Ok(answer == "y" || answer == "yes")
            }
            _ = cancel.cancelled() => Err(AppError::Interrupted.into()),
        }
    }
}

/// Runs an external command with `{message}` substituted; exit 0 approves.
#[derive(Debug, Clone)]
pub struct CommandApprover {
    template: String,
}

impl CommandApprover {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl Approver for CommandApprover {
    async fn request_approval(&self, cancel: &CancellationToken, message: &str) -> Result<bool> {
        let command = self.template.replace("{message}", message);
        debug!(%command, "running approval command");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&command).kill_on_drop(true);
        let mut child = cmd.spawn().context("Failed to spawn approval command")?;

        tokio::select! {
            status = child.wait() => {
                let status = status.context("Failed to wait for approval command")?;
                Ok(status.success())
            }
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                Err(AppError::Interrupted.into())
            }
        }
    }
}

/// Always approves. Selected by `--auto-approve`.
#[derive(Debug, Default)]
pub struct AutoApprover;

#[async_trait]
impl Approver for AutoApprover {
    async fn request_approval(&self, _cancel: &CancellationToken, _message: &str) -> Result<bool> {
        Ok(true)
    }
}
