//! One expedition end-to-end: prompt, supervised agent run, watchers, and
//! the state updates its report drives.

use anyhow::Result;
use chrono::Utc;
use paintress_config::{Config, ContinentLayout, ProjectConfig};
use paintress_core::{ExpeditionReport, ExpeditionStatus, Lumina};
use paintress_dmail::{archive_inbox_dmail, send_dmail, DMail};
use paintress_journal::{parse_report, write_flag, write_journal};
use paintress_process::{spawn_agent, stream_to_sinks, AgentExit, ChunkSink, GitRunner};
use paintress_reserve::{GradientGauge, ReserveParty};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::notify::Notifier;
use crate::prompt::{build_prompt, prompt_file_name, PromptData};
use crate::review::{run_review_loop, ReviewContext};
use crate::sinks::{DataSink, FileSink, ReserveScanSink};
use crate::watchers::{spawn_flag_watcher, spawn_inbox_watcher};

/// Shared, immutable surroundings every expedition borrows.
pub struct ExpeditionEnv {
    pub config: Config,
    pub layout: ContinentLayout,
    pub project: ProjectConfig,
    pub reserve: Arc<ReserveParty>,
    pub gauge: Arc<GradientGauge>,
    pub notifier: Arc<dyn Notifier>,
    pub git: Arc<dyn GitRunner>,
    pub luminas: Vec<Lumina>,
}

/// How one expedition ended, as the scheduler sees it.
#[derive(Debug)]
pub enum ExpeditionOutcome {
    Success(ExpeditionReport),
    Skipped(ExpeditionReport),
    Failed(ExpeditionReport),
    /// The agent signalled that no work remains anywhere.
    Complete,
    /// Dry run: the prompt was rendered, nothing was spawned.
    DryRun,
    /// The parent run was cancelled mid-expedition. No state was touched.
    Interrupted,
}

pub struct Expedition {
    env: Arc<ExpeditionEnv>,
    number: u64,
    worktree: Option<PathBuf>,
}

impl Expedition {
    pub fn new(env: Arc<ExpeditionEnv>, number: u64, worktree: Option<PathBuf>) -> Self {
        Self {
            env,
            number,
            worktree,
        }
    }

    /// Directory the agent works in.
    fn workdir(&self) -> &Path {
        self.worktree
            .as_deref()
            .unwrap_or_else(|| self.env.layout.continent())
    }

    /// Run the whole expedition. Failures are folded into
    /// [`ExpeditionOutcome::Failed`] after their state updates; only
    /// cancellation escapes without touching any state.
    pub async fn run(&self, cancel: &CancellationToken) -> ExpeditionOutcome {
        let started = Instant::now();
        let env = &self.env;

        env.reserve.try_recover_primary();

        let inbox_dmails = scan_inbox_lenient(&env.layout);
        let prompt = self.render_prompt(&inbox_dmails);

        let prompt_path = env.layout.logs_dir().join(prompt_file_name(self.number));
        if let Err(e) = std::fs::write(&prompt_path, &prompt) {
            return self.fail(format!(
                "failed to persist prompt to {}: {e}",
                prompt_path.display()
            ));
        }

        if env.config.dry_run {
            info!(expedition = self.number, "dry run: prompt rendered, agent not spawned");
            return ExpeditionOutcome::DryRun;
        }

        let mut cmd = tokio::process::Command::new(&env.config.agent_cmd);
        cmd.arg("--model")
            .arg(env.reserve.active_model())
            .arg("--dangerously-skip-permissions")
            .arg("--print")
            .arg("-p")
            .arg(&prompt)
            .current_dir(self.workdir());

        let child = match spawn_agent(cmd) {
            Ok(child) => child,
            Err(e) => return self.fail(format!("failed to spawn agent: {e:#}")),
        };

        // Watchers live under their own token, cancelled once the agent has
        // exited so the arrival list stabilizes before archiving.
        let watch_token = cancel.child_token();
        let flag_handle = spawn_flag_watcher(
            env.layout.run_dir(),
            env.layout.flag_path(),
            Arc::clone(&env.notifier),
            watch_token.clone(),
        );
        let inbox_handle = spawn_inbox_watcher(
            env.layout.inbox_dir(),
            Arc::clone(&env.notifier),
            watch_token.clone(),
        );

        let mut log_sink =
            FileSink::create(&env.layout.logs_dir().join(format!("expedition-{:03}.log", self.number)));
        let mut data_sink = DataSink::new(env.config.output);
        let mut reserve_sink = ReserveScanSink::new(Arc::clone(&env.reserve));
        let mut sinks: [&mut dyn ChunkSink; 3] =
            [&mut log_sink, &mut data_sink, &mut reserve_sink];

        let timeout = Duration::from_secs(env.config.timeout_secs);
        let streamed = stream_to_sinks(child, &mut sinks, Some(timeout), cancel).await;

        watch_token.cancel();
        let high_arrivals = inbox_handle.await.unwrap_or_default();
        let _ = flag_handle.await;
        if !high_arrivals.is_empty() {
            info!(
                expedition = self.number,
                count = high_arrivals.len(),
                "HIGH-severity D-Mails arrived mid-expedition; left in inbox for the next run"
            );
        }

        let streamed = match streamed {
            Ok(s) => s,
            Err(e) => return self.fail(format!("agent supervision failed: {e:#}")),
        };

        match streamed.exit {
            AgentExit::Cancelled => ExpeditionOutcome::Interrupted,
            AgentExit::TimedOut => {
                // A silent stall is the usual shape of an unreported rate
                // limit; move to the reserve before the next attempt.
                self.env.reserve.force_reserve();
                self.fail_typed(
                    format!(
                        "expedition timed out after {}s",
                        self.env.config.timeout_secs
                    ),
                    "timeout",
                )
            }
            AgentExit::Exited(code) if code != 0 => self.fail(format!(
                "agent exited with code {code}: {}",
                streamed.summary()
            )),
            AgentExit::Exited(_) => match parse_report(&streamed.output, self.number) {
                Err(e) => self.fail(format!("report parse failed: {e:#}")),
                Ok(report) => self.settle(report, &inbox_dmails, started, cancel).await,
            },
        }
    }

    fn render_prompt(&self, inbox_dmails: &[DMail]) -> String {
        let env = &self.env;
        let context_files = env.layout.read_context_files().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read context files");
            Vec::new()
        });
        build_prompt(&PromptData {
            expedition: self.number,
            timestamp: Utc::now(),
            gradient_state: env.gauge.format_for_prompt(),
            reserve_state: env.reserve.format_for_prompt(),
            luminas: env.luminas.clone(),
            inbox_dmails: inbox_dmails.to_vec(),
            context_files,
            linear_scope: env.project.scope_line(),
            base_branch: env.config.base_branch.clone(),
            dev_url: env.config.dev_url.clone(),
            mission: env.layout.read_mission(),
        })
    }

    /// Apply the state updates a parsed report drives, then hand the
    /// outcome back to the scheduler.
    async fn settle(
        &self,
        mut report: ExpeditionReport,
        inbox_dmails: &[DMail],
        started: Instant,
        cancel: &CancellationToken,
    ) -> ExpeditionOutcome {
        let env = &self.env;
        match report.status {
            ExpeditionStatus::Complete => {
                self.record(&report);
                ExpeditionOutcome::Complete
            }
            ExpeditionStatus::Skipped => {
                env.gauge.decay();
                self.record(&report);
                ExpeditionOutcome::Skipped(report)
            }
            ExpeditionStatus::Failed => {
                env.gauge.discharge();
                self.record(&report);
                ExpeditionOutcome::Failed(report)
            }
            ExpeditionStatus::Success => {
                env.gauge.charge();
                env.reserve.try_recover_primary();

                if report.has_pr() && !env.config.review_cmd.is_empty() {
                    let budget = Duration::from_secs(env.config.timeout_secs)
                        .saturating_sub(started.elapsed());
                    let ctx = ReviewContext {
                        config: &env.config,
                        reserve: &env.reserve,
                        git: env.git.as_ref(),
                        workdir: self.workdir(),
                    };
                    if let Err(e) = run_review_loop(&ctx, &mut report, budget, cancel).await {
                        warn!(expedition = self.number, error = %e, "review loop errored");
                    }
                }

                self.record(&report);
                self.send_report_dmail(&report);
                for dm in inbox_dmails {
                    if let Err(e) = archive_inbox_dmail(&env.layout, &dm.name) {
                        warn!(name = %dm.name, error = %e, "failed to archive inbox D-Mail");
                    }
                }
                ExpeditionOutcome::Success(report)
            }
        }
    }

    /// Journal and flag writes shared by every settled outcome.
    fn record(&self, report: &ExpeditionReport) {
        if let Err(e) = write_journal(&self.env.layout.journal_dir(), report) {
            warn!(expedition = self.number, error = %e, "failed to write journal");
        }
        match write_flag(
            &self.env.layout.flag_path(),
            self.number,
            &report.issue_id,
            report.status.as_str(),
            &report.remaining_issues,
        ) {
            Ok(true) => {}
            Ok(false) => info!(
                expedition = self.number,
                "flag already past this expedition; checkpoint write skipped"
            ),
            Err(e) => warn!(expedition = self.number, error = %e, "failed to write flag"),
        }
    }

    fn send_report_dmail(&self, report: &ExpeditionReport) {
        let stem = if report.issue_id.is_empty() {
            format!("expedition-{}", self.number)
        } else {
            report.issue_id.to_lowercase()
        };
        let mut dmail = DMail::new(
            format!("report-{stem}"),
            "report",
            if report.issue_title.is_empty() {
                format!("Expedition {} report", self.number)
            } else {
                report.issue_title.clone()
            },
        );
        if !report.issue_id.is_empty() {
            dmail.issues = vec![report.issue_id.clone()];
        }
        dmail.body = format!(
            "# Expedition {} report\n\n\
             - Issue: {} — {}\n\
             - Status: {}\n\
             - PR: {}\n\
             - Insight: {}\n",
            self.number,
            report.issue_id,
            report.issue_title,
            report.status,
            report.pr_url,
            report.insight,
        );
        if let Err(e) = send_dmail(&self.env.layout, &dmail) {
            warn!(expedition = self.number, error = %e, "failed to send report D-Mail");
        }
    }

    fn fail(&self, reason: String) -> ExpeditionOutcome {
        self.fail_typed(reason, "runner-error")
    }

    fn fail_typed(&self, reason: String, failure_type: &str) -> ExpeditionOutcome {
        warn!(expedition = self.number, %reason, "expedition failed");
        self.env.gauge.discharge();
        let mut report = ExpeditionReport::synthetic_failure(self.number, reason);
        report.failure_type = failure_type.to_string();
        self.record(&report);
        ExpeditionOutcome::Failed(report)
    }
}

/// Inbox scan for prompt building. Unlike the fail-closed pre-flight scan,
/// a malformed file mid-run is skipped with a warning.
fn scan_inbox_lenient(layout: &ContinentLayout) -> Vec<DMail> {
    let inbox = layout.inbox_dir();
    let Ok(entries) = std::fs::read_dir(&inbox) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
        .collect();
    names.sort();

    let mut dmails = Vec::new();
    for name in names {
        let path = inbox.join(&name);
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        match DMail::parse(&content, &name) {
            Ok(dm) => dmails.push(dm),
            Err(e) => warn!(file = %name, error = %e, "skipping malformed inbox D-Mail"),
        }
    }
    dmails
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use paintress_journal::read_flag;
    use paintress_process::SystemGit;
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable stub agent that ignores its arguments and
    /// prints `body` on stdout.
    fn stub_agent(dir: &Path, body: &str) -> String {
        let path = dir.join("stub-agent.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn env_with_agent(dir: &Path, agent_cmd: String) -> Arc<ExpeditionEnv> {
        let layout = ContinentLayout::new(dir);
        layout.ensure().unwrap();
        layout.write_mission().unwrap();
        let mut config = Config::new(dir);
        config.agent_cmd = agent_cmd;
        config.timeout_secs = 30;
        Arc::new(ExpeditionEnv {
            config,
            layout,
            project: ProjectConfig::default(),
            reserve: Arc::new(ReserveParty::new("opus", vec!["sonnet".to_string()])),
            gauge: Arc::new(GradientGauge::new(5)),
            notifier: Arc::new(LogNotifier),
            git: Arc::new(SystemGit::default()),
            luminas: Vec::new(),
        })
    }

    fn success_report_script() -> &'static str {
        "cat <<'EOF'\n\
         __EXPEDITION_REPORT__\n\
         issue_id: ENG-5\n\
         issue_title: Do the thing\n\
         mission_type: implement\n\
         branch: none\n\
         pr_url: none\n\
         status: success\n\
         reason: done\n\
         remaining_issues: 2\n\
         bugs_found: 0\n\
         bug_issues: none\n\
         insight: small steps\n\
         failure_type: \n\
         __EXPEDITION_END__\n\
         EOF"
    }

    #[tokio::test]
    async fn test_success_expedition_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), success_report_script());
        let env = env_with_agent(dir.path(), agent);

        // Something to archive on success.
        let inbox_dm = DMail::new("note-1", "feedback", "hello");
        std::fs::write(
            env.layout.inbox_dir().join("note-1.md"),
            inbox_dm.marshal().unwrap(),
        )
        .unwrap();

        let expedition = Expedition::new(Arc::clone(&env), 8, None);
        let outcome = expedition.run(&CancellationToken::new()).await;

        let ExpeditionOutcome::Success(report) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(report.issue_id, "ENG-5");

        // Prompt + agent log persisted.
        assert!(env.layout.logs_dir().join("expedition-008-prompt.md").exists());
        assert!(env.layout.logs_dir().join("expedition-008.log").exists());
        // Journal + flag written.
        assert!(env.layout.journal_dir().join("008.md").exists());
        let flag = read_flag(&env.layout.flag_path());
        assert_eq!(flag.last_expedition, 8);
        assert_eq!(flag.last_issue, "ENG-5");
        assert_eq!(flag.last_status, "success");
        // Report D-Mail in archive and outbox.
        assert!(env.layout.archive_dir().join("report-eng-5.md").exists());
        assert!(env.layout.outbox_dir().join("report-eng-5.md").exists());
        // Scanned inbox item archived.
        assert!(!env.layout.inbox_dir().join("note-1.md").exists());
        assert!(env.layout.archive_dir().join("note-1.md").exists());
        // Gauge charged.
        assert_eq!(env.gauge.level(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_renders_prompt_only() {
        let dir = tempfile::tempdir().unwrap();
        // Any agent path works; it must never be spawned.
        let env = {
            let mut env = env_with_agent(dir.path(), "/definitely/not/here".to_string());
            Arc::get_mut(&mut env).unwrap().config.dry_run = true;
            env
        };
        let expedition = Expedition::new(Arc::clone(&env), 3, None);
        let outcome = expedition.run(&CancellationToken::new()).await;
        assert!(matches!(outcome, ExpeditionOutcome::DryRun));
        assert!(env.layout.logs_dir().join("expedition-003-prompt.md").exists());
        assert!(!env.layout.journal_dir().join("003.md").exists());
        assert_eq!(env.gauge.level(), 0);
    }

    #[tokio::test]
    async fn test_agent_failure_writes_synthetic_journal() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), "echo broken; exit 7");
        let env = env_with_agent(dir.path(), agent);
        env.gauge.charge();

        let expedition = Expedition::new(Arc::clone(&env), 2, None);
        let outcome = expedition.run(&CancellationToken::new()).await;

        let ExpeditionOutcome::Failed(report) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(report.reason.contains("exited with code 7"));
        assert_eq!(env.gauge.level(), 0, "failure discharges the gauge");

        let journal =
            std::fs::read_to_string(env.layout.journal_dir().join("002.md")).unwrap();
        assert!(journal.contains("- **Status**: failed"));
        assert!(journal.contains("exited with code 7"));
        assert_eq!(read_flag(&env.layout.flag_path()).last_status, "failed");
    }

    #[tokio::test]
    async fn test_parse_error_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), "echo 'chatty output, no report'");
        let env = env_with_agent(dir.path(), agent);

        let expedition = Expedition::new(Arc::clone(&env), 4, None);
        let outcome = expedition.run(&CancellationToken::new()).await;
        let ExpeditionOutcome::Failed(report) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(report.reason.contains("report parse failed"));
    }

    #[tokio::test]
    async fn test_complete_marker_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), "echo __EXPEDITION_COMPLETE__");
        let env = env_with_agent(dir.path(), agent);

        let expedition = Expedition::new(Arc::clone(&env), 6, None);
        let outcome = expedition.run(&CancellationToken::new()).await;
        assert!(matches!(outcome, ExpeditionOutcome::Complete));
        // Complete still checkpoints so resumed runs skip past it.
        assert_eq!(read_flag(&env.layout.flag_path()).last_expedition, 6);
    }

    #[tokio::test]
    async fn test_timeout_forces_reserve() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), "sleep 30");
        let env = {
            let mut env = env_with_agent(dir.path(), agent);
            Arc::get_mut(&mut env).unwrap().config.timeout_secs = 1;
            env
        };

        let expedition = Expedition::new(Arc::clone(&env), 5, None);
        let outcome = expedition.run(&CancellationToken::new()).await;
        let ExpeditionOutcome::Failed(report) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(report.failure_type, "timeout");
        assert_eq!(env.reserve.active_model(), "sonnet");
    }

    #[tokio::test]
    async fn test_cancellation_is_interrupted_and_stateless() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), "sleep 30");
        let env = env_with_agent(dir.path(), agent);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        });

        let expedition = Expedition::new(Arc::clone(&env), 9, None);
        let outcome = expedition.run(&cancel).await;
        assert!(matches!(outcome, ExpeditionOutcome::Interrupted));
        assert!(!env.layout.journal_dir().join("009.md").exists());
        assert_eq!(read_flag(&env.layout.flag_path()).last_expedition, 0);
        assert_eq!(env.gauge.level(), 0);
    }

    #[tokio::test]
    async fn test_skip_decays_gauge() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(
            dir.path(),
            "printf '__EXPEDITION_REPORT__\\nstatus: skipped\\nreason: nothing open\\n__EXPEDITION_END__\\n'",
        );
        let env = env_with_agent(dir.path(), agent);
        env.gauge.charge();
        env.gauge.charge();

        let expedition = Expedition::new(Arc::clone(&env), 7, None);
        let outcome = expedition.run(&CancellationToken::new()).await;
        assert!(matches!(outcome, ExpeditionOutcome::Skipped(_)));
        assert_eq!(env.gauge.level(), 1);
        assert!(env.layout.journal_dir().join("007.md").exists());
    }

    #[tokio::test]
    async fn test_malformed_inbox_dmail_does_not_block_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), success_report_script());
        let env = env_with_agent(dir.path(), agent);
        std::fs::write(env.layout.inbox_dir().join("broken.md"), "garbage").unwrap();

        let expedition = Expedition::new(Arc::clone(&env), 1, None);
        let outcome = expedition.run(&CancellationToken::new()).await;
        assert!(matches!(outcome, ExpeditionOutcome::Success(_)));
        // The malformed file is left alone, not archived.
        assert!(env.layout.inbox_dir().join("broken.md").exists());
    }
}
