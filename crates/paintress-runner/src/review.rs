//! Budgeted review-and-fix cycle after a successful expedition.
//!
//! The external review command runs on its own per-cycle timeout and never
//! consumes the fix budget; only fix-agent invocations do.

use anyhow::Result;
use paintress_config::Config;
use paintress_core::{AppError, ExpeditionReport};
use paintress_process::{spawn_agent, stream_to_sinks, AgentExit, GitRunner};
use paintress_reserve::{detect_rate_limit, ReserveParty};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const MAX_REVIEW_CYCLES: u32 = 3;
const MIN_REVIEW_TIMEOUT: Duration = Duration::from_secs(1);
const PRIORITY_TAGS: [&str; 5] = ["[P0]", "[P1]", "[P2]", "[P3]", "[P4]"];
const SUMMARY_MAX_CHARS: usize = 500;

/// Everything the loop borrows from the expedition.
pub struct ReviewContext<'a> {
    pub config: &'a Config,
    pub reserve: &'a ReserveParty,
    pub git: &'a dyn GitRunner,
    pub workdir: &'a Path,
}

/// Per-cycle timeout for the review command. The floor keeps tiny
/// expedition timeouts from cancelling the review before it starts.
fn review_timeout(timeout_secs: u64) -> Duration {
    Duration::from_secs(timeout_secs / u64::from(MAX_REVIEW_CYCLES)).max(MIN_REVIEW_TIMEOUT)
}

/// Run up to [`MAX_REVIEW_CYCLES`] review-then-fix rounds against the
/// report's branch. Outcomes land in `report.insight`; only a rate-limited
/// review service is an error (the caller logs it, it never aborts the
/// expedition).
pub async fn run_review_loop(
    ctx: &ReviewContext<'_>,
    report: &mut ExpeditionReport,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut consumed = Duration::ZERO;
    let mut last_comments = String::new();

    for cycle in 0..MAX_REVIEW_CYCLES {
        if cancel.is_cancelled() {
            if !last_comments.is_empty() {
                append_insight(
                    report,
                    &format!("Review interrupted: {}", summarize_review(&last_comments)),
                );
            }
            return Ok(());
        }

        let output = match run_review_command(ctx).await {
            Ok(Some(output)) => output,
            Ok(None) => {
                // Command timed out or could not run; skip the loop.
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if detect_rate_limit(&output.text).is_some() {
            return Err(AppError::ReviewRateLimited.into());
        }

        let Some(comments) = review_comments(&output.text) else {
            if !output.success {
                warn!(cycle, "review command failed with no comments; skipping review");
            } else {
                info!(cycle, "review passed");
            }
            return Ok(());
        };
        last_comments = comments;

        if !report.has_branch() {
            append_insight(report, "skipped: no valid branch");
            return Ok(());
        }
        if let Err(e) = ctx.git.run(ctx.workdir, &["checkout", &report.branch]).await {
            append_insight(report, &format!("skipped: checkout failed: {e}"));
            return Ok(());
        }

        let remaining = budget.saturating_sub(consumed);
        if remaining.is_zero() {
            append_insight(
                report,
                &format!(
                    "Review not fully resolved: {}",
                    summarize_review(&last_comments)
                ),
            );
            return Ok(());
        }

        let fix_started = Instant::now();
        let fix_result = run_fix_agent(ctx, &last_comments, remaining, cancel).await;
        consumed += fix_started.elapsed();
        if let Err(e) = fix_result {
            append_insight(
                report,
                &format!("Reviewfix failed: {}", summarize_review(&e.to_string())),
            );
            return Ok(());
        }
    }

    append_insight(
        report,
        &format!(
            "Review not fully resolved: {}",
            summarize_review(&last_comments)
        ),
    );
    Ok(())
}

struct ReviewOutput {
    text: String,
    success: bool,
}

/// Run the configured review command once. `Ok(None)` means the command
/// could not run (spawn failure or timeout) and the loop should be
/// skipped.
async fn run_review_command(ctx: &ReviewContext<'_>) -> Result<Option<ReviewOutput>> {
    let timeout = review_timeout(ctx.config.timeout_secs);
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(&ctx.config.review_cmd)
        .current_dir(ctx.workdir)
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "review command timed out"
            );
            Ok(None)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "failed to run review command");
            Ok(None)
        }
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(Some(ReviewOutput {
                text,
                success: output.status.success(),
            }))
        }
    }
}

/// A priority tag or the literal "Review comment" means the review did not
/// pass; the whole output becomes the comments.
fn review_comments(output: &str) -> Option<String> {
    let flagged = PRIORITY_TAGS.iter().any(|tag| output.contains(tag))
        || output.contains("Review comment");
    flagged.then(|| output.to_string())
}

/// Continue the agent's prior session to address the comments. No new
/// branch, no new PR, no issue-status change.
async fn run_fix_agent(
    ctx: &ReviewContext<'_>,
    comments: &str,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let prompt = format!(
        "Address the following review comments on the current branch. \
         Do not create a new branch or pull request, and do not change the \
         issue status.\n\n{comments}"
    );

    let mut cmd = tokio::process::Command::new(&ctx.config.agent_cmd);
    cmd.arg("--model")
        .arg(ctx.reserve.active_model())
        .arg("--dangerously-skip-permissions")
        .arg("--print")
        .arg("--continue")
        .arg("-p")
        .arg(&prompt)
        .current_dir(ctx.workdir);

    let child = spawn_agent(cmd)?;
    let result = stream_to_sinks(child, &mut [], Some(budget), cancel).await?;
    match result.exit {
        AgentExit::Exited(0) => Ok(()),
        AgentExit::Exited(code) => Err(AppError::AgentFailed {
            code,
            summary: result.summary(),
        }
        .into()),
        AgentExit::TimedOut => Err(AppError::ExpeditionTimeout(budget.as_secs()).into()),
        AgentExit::Cancelled => Err(AppError::Interrupted.into()),
    }
}

fn append_insight(report: &mut ExpeditionReport, text: &str) {
    if report.insight.is_empty() {
        report.insight = text.to_string();
    } else {
        report.insight.push_str("; ");
        report.insight.push_str(text);
    }
}

/// Collapse whitespace to one line and truncate at 500 characters.
pub fn summarize_review(comments: &str) -> String {
    let single_line = comments.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().nth(SUMMARY_MAX_CHARS).is_none() {
        single_line
    } else {
        let truncated: String = single_line.chars().take(SUMMARY_MAX_CHARS).collect();
        format!("{truncated}...(truncated)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeGit {
        fail_checkout: bool,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeGit {
        fn new(fail_checkout: bool) -> Self {
            Self {
                fail_checkout,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GitRunner for FakeGit {
        async fn run(&self, _dir: &Path, args: &[&str]) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|s| s.to_string()).collect());
            if self.fail_checkout && args.first() == Some(&"checkout") {
                anyhow::bail!("pathspec did not match");
            }
            Ok(String::new())
        }
    }

    fn config(review_cmd: &str, timeout_secs: u64) -> Config {
        let mut config = Config::new("/tmp/continent");
        config.review_cmd = review_cmd.to_string();
        config.timeout_secs = timeout_secs;
        // The fix agent in these tests is a stub that always succeeds.
        config.agent_cmd = "true".to_string();
        config
    }

    fn report_with_branch() -> ExpeditionReport {
        let mut report = ExpeditionReport::empty(1);
        report.branch = "feat/x".to_string();
        report.pr_url = "https://example.com/pr/1".to_string();
        report
    }

    #[test]
    fn test_review_timeout_division_and_floor() {
        assert_eq!(review_timeout(6), Duration::from_secs(2));
        assert_eq!(review_timeout(900), Duration::from_secs(300));
        assert_eq!(review_timeout(0), MIN_REVIEW_TIMEOUT);
        assert_eq!(review_timeout(1), MIN_REVIEW_TIMEOUT);
    }

    #[test]
    fn test_review_comments_detection() {
        assert!(review_comments("all good").is_none());
        assert!(review_comments("[P2] missing null check").is_some());
        assert!(review_comments("Review comment: rename this").is_some());
    }

    #[test]
    fn test_summarize_review() {
        assert_eq!(summarize_review("  a\n b\t\tc  "), "a b c");

        let long = "word ".repeat(200);
        let summary = summarize_review(&long);
        assert!(summary.ends_with("...(truncated)"));
        assert_eq!(
            summary.chars().count(),
            SUMMARY_MAX_CHARS + "...(truncated)".len()
        );
    }

    #[test]
    fn test_summarize_review_rune_safe() {
        let long = "é".repeat(600);
        let summary = summarize_review(&long);
        assert!(summary.ends_with("...(truncated)"));
        assert_eq!(summary.chars().filter(|c| *c == 'é').count(), 500);
    }

    #[tokio::test]
    async fn test_review_pass_leaves_report_alone() {
        let config = config("echo all clear", 60);
        let reserve = ReserveParty::new("opus", vec![]);
        let git = FakeGit::new(false);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ReviewContext {
            config: &config,
            reserve: &reserve,
            git: &git,
            workdir: dir.path(),
        };
        let mut report = report_with_branch();
        run_review_loop(&ctx, &mut report, Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.insight.is_empty());
        assert!(git.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_review_comments_without_branch() {
        let config = config("echo '[P1] broken'", 60);
        let reserve = ReserveParty::new("opus", vec![]);
        let git = FakeGit::new(false);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ReviewContext {
            config: &config,
            reserve: &reserve,
            git: &git,
            workdir: dir.path(),
        };
        let mut report = report_with_branch();
        report.branch = "none".to_string();
        run_review_loop(&ctx, &mut report, Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.insight, "skipped: no valid branch");
    }

    #[tokio::test]
    async fn test_review_checkout_failure_recorded() {
        let config = config("echo '[P0] crash'", 60);
        let reserve = ReserveParty::new("opus", vec![]);
        let git = FakeGit::new(true);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ReviewContext {
            config: &config,
            reserve: &reserve,
            git: &git,
            workdir: dir.path(),
        };
        let mut report = report_with_branch();
        run_review_loop(&ctx, &mut report, Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.insight.starts_with("skipped: checkout failed:"));
    }

    #[tokio::test]
    async fn test_review_rate_limit_is_error() {
        let config = config("echo '429 too many requests'", 60);
        let reserve = ReserveParty::new("opus", vec![]);
        let git = FakeGit::new(false);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ReviewContext {
            config: &config,
            reserve: &reserve,
            git: &git,
            workdir: dir.path(),
        };
        let mut report = report_with_branch();
        let err = run_review_loop(
            &ctx,
            &mut report,
            Duration::from_secs(60),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AppError>().unwrap(),
            AppError::ReviewRateLimited
        ));
        // The agent model must not have been swapped by review detection.
        assert_eq!(reserve.active_model(), "opus");
    }

    #[tokio::test]
    async fn test_review_command_failure_without_comments_skipped() {
        let config = config("echo oops; exit 2", 60);
        let reserve = ReserveParty::new("opus", vec![]);
        let git = FakeGit::new(false);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ReviewContext {
            config: &config,
            reserve: &reserve,
            git: &git,
            workdir: dir.path(),
        };
        let mut report = report_with_branch();
        run_review_loop(&ctx, &mut report, Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.insight.is_empty());
    }

    #[tokio::test]
    async fn test_review_hanging_command_bounded() {
        // TimeoutSec=6 gives each review cycle a 2s budget; a hanging
        // command must not wedge the loop.
        let config = config("sleep 60", 6);
        let reserve = ReserveParty::new("opus", vec![]);
        let git = FakeGit::new(false);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ReviewContext {
            config: &config,
            reserve: &reserve,
            git: &git,
            workdir: dir.path(),
        };
        let mut report = report_with_branch();
        let started = Instant::now();
        run_review_loop(&ctx, &mut report, Duration::from_secs(6), &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_review_unresolved_after_cycles() {
        let config = config("echo '[P3] nit forever'", 60);
        let reserve = ReserveParty::new("opus", vec![]);
        let git = FakeGit::new(false);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ReviewContext {
            config: &config,
            reserve: &reserve,
            git: &git,
            workdir: dir.path(),
        };
        let mut report = report_with_branch();
        run_review_loop(&ctx, &mut report, Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.insight.starts_with("Review not fully resolved:"));
        assert!(report.insight.contains("[P3] nit forever"));
        // One checkout per cycle.
        assert_eq!(git.calls.lock().unwrap().len(), MAX_REVIEW_CYCLES as usize);
    }

    #[tokio::test]
    async fn test_review_zero_timeout_still_reviews_once() {
        let config = config("echo fine", 0);
        let reserve = ReserveParty::new("opus", vec![]);
        let git = FakeGit::new(false);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ReviewContext {
            config: &config,
            reserve: &reserve,
            git: &git,
            workdir: dir.path(),
        };
        let mut report = report_with_branch();
        run_review_loop(&ctx, &mut report, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.insight.is_empty());
    }
}
