//! Agent process supervision with streaming capture.
//!
//! stdout and stderr are merged chunk-by-chunk into one captured stream;
//! every chunk is also fanned out to the caller's sinks (log file, data
//! writer, rate-limit scanner) before the next read.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const READ_BUF_SIZE: usize = 4096;

/// Receives each output chunk as it arrives. Implementations must not
/// block; they run on the pump task between reads.
pub trait ChunkSink: Send {
    fn on_chunk(&mut self, chunk: &str);
}

/// How the supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    Exited(i32),
    /// The wall-clock deadline fired; the process group was killed.
    TimedOut,
    /// The parent run was cancelled; the process group was killed.
    Cancelled,
}

/// Captured result of one supervised process.
#[derive(Debug, Clone)]
pub struct StreamedOutput {
    /// stdout and stderr merged in arrival order.
    pub output: String,
    pub exit: AgentExit,
}

impl StreamedOutput {
    /// Last non-empty output line, truncated, for error messages.
    pub fn summary(&self) -> String {
        let line = self
            .output
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("");
        truncate_line(line, 200)
    }
}

fn truncate_line(line: &str, max_chars: usize) -> String {
    if line.chars().nth(max_chars).is_none() {
        line.to_string()
    } else {
        let truncated: String = line.chars().take(max_chars - 3).collect();
        format!("{truncated}...")
    }
}

/// Verify the agent binary resolves on PATH before the first expedition.
pub fn check_agent_installed(binary: &str) -> Result<()> {
    which::which(binary)
        .map(|_| ())
        .map_err(|_| anyhow::anyhow!("Agent binary '{binary}' is not installed or not in PATH"))
}

/// Spawn the agent with piped output, no stdin, its own process group,
/// and kill-on-drop as a safety net.
pub fn spawn_agent(mut cmd: Command) -> Result<Child> {
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.stdin(std::process::Stdio::null());
    cmd.kill_on_drop(true);

    // Isolate the child in its own process group so a kill reaches any
    // grandchildren it spawned.
    // SAFETY: setsid() is async-signal-safe and runs before exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    cmd.spawn().context("Failed to spawn agent process")
}

/// Pump the child's output until exit, deadline, or cancellation.
///
/// Byte-level reads keep partial lines (progress output without newlines)
/// flowing to the sinks. On deadline or cancellation the whole process
/// group is killed and the output captured so far is returned with the
/// matching exit kind.
pub async fn stream_to_sinks(
    mut child: Child,
    sinks: &mut [&mut dyn ChunkSink],
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<StreamedOutput> {
    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;
    let mut stdout_reader = BufReader::new(stdout);
    let mut stderr_reader = BufReader::new(stderr);

    let deadline = timeout.map(|t| Instant::now() + t);
    let mut output = String::new();
    let mut stdout_buf = [0u8; READ_BUF_SIZE];
    let mut stderr_buf = [0u8; READ_BUF_SIZE];
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut ended: Option<AgentExit> = None;

    while !stdout_done || !stderr_done {
        tokio::select! {
            result = stdout_reader.read(&mut stdout_buf), if !stdout_done => {
                match result {
                    Ok(0) | Err(_) => stdout_done = true,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&stdout_buf[..n]).into_owned();
                        deliver(&chunk, &mut output, sinks);
                    }
                }
            }
            result = stderr_reader.read(&mut stderr_buf), if !stderr_done => {
                match result {
                    Ok(0) | Err(_) => stderr_done = true,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&stderr_buf[..n]).into_owned();
                        deliver(&chunk, &mut output, sinks);
                    }
                }
            }
            _ = sleep_until_deadline(deadline), if ended.is_none() => {
                warn!("expedition deadline fired; killing agent process group");
                kill_child_process_group(&mut child);
                ended = Some(AgentExit::TimedOut);
            }
            _ = cancel.cancelled(), if ended.is_none() => {
                warn!("run cancelled; killing agent process group");
                kill_child_process_group(&mut child);
                ended = Some(AgentExit::Cancelled);
            }
        }
    }

    let status = child.wait().await.context("Failed to wait for agent")?;
    let exit = ended.unwrap_or_else(|| {
        AgentExit::Exited(status.code().unwrap_or_else(|| {
            warn!("agent terminated by signal; using exit code 1");
            1
        }))
    });

    Ok(StreamedOutput { output, exit })
}

fn deliver(chunk: &str, output: &mut String, sinks: &mut [&mut dyn ChunkSink]) {
    output.push_str(chunk);
    for sink in sinks.iter_mut() {
        sink.on_chunk(chunk);
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn kill_child_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: kill() is async-signal-safe; negative PID targets the
            // process group created by setsid.
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
            return;
        }
    }

    let _ = child.start_kill();
}
