//! The run loop: claim numbered expedition slots across workers until the
//! budget, a sentinel, or cancellation ends the run.

use paintress_config::{Config, ContinentLayout, OutputMode, ProjectConfig};
use paintress_core::AppError;
use paintress_dmail::{preflight_gate, Approver, GateDecision, StdinApprover};
use paintress_journal::{read_flag, scan_journals_for_lumina, write_lumina_file};
use paintress_process::{check_agent_installed, GitRunner, SystemGit};
use paintress_reserve::{GradientGauge, ReserveParty};
use paintress_runner::{Expedition, ExpeditionEnv, ExpeditionOutcome, LogNotifier, Notifier};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::worktree::WorktreePool;

/// Consecutive failures that end the run.
const GOMMAGE_THRESHOLD: u32 = 3;

const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

/// Why all workers were told to stop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// An agent reported that no work remains.
    Complete,
    /// The consecutive-failure threshold was reached.
    Gommage,
}

struct StopState {
    reason: Mutex<Option<StopReason>>,
    token: CancellationToken,
}

impl StopState {
    fn stop(&self, reason: StopReason) {
        let mut slot = self.reason.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
        }
        drop(slot);
        self.token.cancel();
    }

    fn reason(&self) -> Option<StopReason> {
        *self.reason.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Run-scoped counters, reset at the start of every run.
#[derive(Debug, Default)]
struct RunTotals {
    attempted: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    bugs: AtomicI64,
    consecutive_failures: AtomicU32,
}

impl RunTotals {
    fn reset(&self) {
        self.attempted.store(0, Ordering::SeqCst);
        self.success.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
        self.bugs.store(0, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

/// Snapshot of one run, printed as the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub attempted: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub bugs_found: i64,
}

pub struct Scheduler {
    config: Config,
    approver: Arc<dyn Approver>,
    notifier: Arc<dyn Notifier>,
    git: Arc<dyn GitRunner>,
    reserve: Arc<ReserveParty>,
    gauge: Arc<GradientGauge>,
    totals: Arc<RunTotals>,
}

impl Scheduler {
    pub fn new(
        config: Config,
        approver: Arc<dyn Approver>,
        notifier: Arc<dyn Notifier>,
        git: Arc<dyn GitRunner>,
    ) -> Self {
        let reserve = Arc::new(ReserveParty::new(
            config.primary_model.clone(),
            config.reserve_models.clone(),
        ));
        let gauge = Arc::new(GradientGauge::new(config.gauge_max));
        Self {
            config,
            approver,
            notifier,
            git,
            reserve,
            gauge,
            totals: Arc::new(RunTotals::default()),
        }
    }

    /// Scheduler with the production collaborators wired in.
    pub fn with_defaults(config: Config) -> Self {
        let git_timeout = Duration::from_secs(config.git_timeout_secs);
        Self::new(
            config,
            Arc::new(StdinApprover),
            Arc::new(LogNotifier),
            Arc::new(SystemGit::new(git_timeout)),
        )
    }

    /// Execute up to `max_expeditions` expeditions beyond the flag
    /// checkpoint and return the process exit code.
    pub async fn run(&self, cancel: &CancellationToken) -> i32 {
        self.totals.reset();
        let config = &self.config;
        let layout = ContinentLayout::new(&config.continent);

        if let Err(e) = layout.ensure() {
            error!(error = %e, "failed to prepare continent layout");
            return EXIT_FAILURE;
        }
        if let Err(e) = layout.write_mission() {
            error!(error = %e, "failed to write mission file");
            return EXIT_FAILURE;
        }
        if !config.dry_run {
            if let Err(e) = check_agent_installed(&config.agent_cmd) {
                error!(error = %e, "agent pre-flight check failed");
                return EXIT_FAILURE;
            }
        }

        match preflight_gate(&layout, config.auto_approve, self.approver.as_ref(), cancel).await {
            Ok(GateDecision::Proceed(_)) => {}
            Ok(GateDecision::Denied) => {
                info!("run denied at the HIGH-severity gate; nothing attempted");
                return EXIT_OK;
            }
            Err(e) => {
                if matches!(e.downcast_ref::<AppError>(), Some(err) if err.is_interruption()) {
                    return EXIT_INTERRUPTED;
                }
                error!(error = %e, "pre-flight inbox scan failed");
                return EXIT_FAILURE;
            }
        }

        let start_exp = read_flag(&layout.flag_path()).last_expedition + 1;
        info!(
            start = start_exp,
            budget = config.max_expeditions,
            workers = config.effective_workers(),
            "run starting"
        );

        let luminas = match scan_journals_for_lumina(&layout.journal_dir()).await {
            Ok(luminas) => luminas,
            Err(e) => {
                warn!(error = %e, "lumina pre-scan failed; continuing without lessons");
                Vec::new()
            }
        };
        if let Err(e) = write_lumina_file(&layout.lumina_path(), &luminas) {
            warn!(error = %e, "failed to write lumina file");
        }

        let pool = if config.uses_worktrees() {
            let pool = Arc::new(WorktreePool::new(
                config.continent.clone(),
                layout.worktrees_dir(),
                config.base_branch.clone(),
                config.worktree_setup_cmd.clone(),
                Arc::clone(&self.git),
                config.effective_workers(),
            ));
            if let Err(e) = pool.init().await {
                error!(error = %e, "worktree pool init failed");
                return EXIT_FAILURE;
            }
            Some(pool)
        } else {
            None
        };

        let project = ProjectConfig::load(&layout.config_path()).unwrap_or_else(|e| {
            warn!(error = %e, "project config unreadable; using defaults");
            ProjectConfig::default()
        });
        let env = Arc::new(ExpeditionEnv {
            config: config.clone(),
            layout,
            project,
            reserve: Arc::clone(&self.reserve),
            gauge: Arc::clone(&self.gauge),
            notifier: Arc::clone(&self.notifier),
            git: Arc::clone(&self.git),
            luminas,
        });

        let stop = Arc::new(StopState {
            reason: Mutex::new(None),
            token: cancel.child_token(),
        });
        let counter = Arc::new(AtomicU64::new(start_exp));
        let end = start_exp + config.max_expeditions;

        let mut workers = JoinSet::new();
        for worker_id in 0..config.effective_workers() {
            workers.spawn(worker_loop(
                Arc::clone(&env),
                pool.clone(),
                Arc::clone(&counter),
                end,
                Arc::clone(&self.totals),
                Arc::clone(&stop),
                worker_id,
            ));
        }
        while workers.join_next().await.is_some() {}

        if let Some(pool) = &pool {
            pool.shutdown().await;
        }

        let summary = self.summary();
        info!(
            attempted = summary.attempted,
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            bugs_found = summary.bugs_found,
            "run finished"
        );
        if config.output == OutputMode::Json {
            match serde_json::to_string(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(error = %e, "failed to serialize run summary"),
            }
        }

        if cancel.is_cancelled() {
            return EXIT_INTERRUPTED;
        }
        match stop.reason() {
            Some(StopReason::Gommage) => EXIT_FAILURE,
            Some(StopReason::Complete) | None => EXIT_OK,
        }
    }

    /// Snapshot of the current run counters.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            attempted: self.totals.attempted.load(Ordering::SeqCst),
            success: self.totals.success.load(Ordering::SeqCst),
            failed: self.totals.failed.load(Ordering::SeqCst),
            skipped: self.totals.skipped.load(Ordering::SeqCst),
            bugs_found: self.totals.bugs.load(Ordering::SeqCst),
        }
    }
}

async fn worker_loop(
    env: Arc<ExpeditionEnv>,
    pool: Option<Arc<WorktreePool>>,
    counter: Arc<AtomicU64>,
    end: u64,
    totals: Arc<RunTotals>,
    stop: Arc<StopState>,
    worker_id: u32,
) {
    loop {
        if stop.token.is_cancelled() {
            break;
        }
        let number = counter.fetch_add(1, Ordering::SeqCst);
        if number >= end {
            break;
        }

        let worktree = match &pool {
            Some(pool) => match pool.acquire(&stop.token).await {
                Some(worktree) => Some(worktree),
                None => break,
            },
            None => None,
        };

        totals.attempted.fetch_add(1, Ordering::SeqCst);
        debug!(worker_id, expedition = number, "expedition starting");
        let outcome = Expedition::new(Arc::clone(&env), number, worktree.clone())
            .run(&stop.token)
            .await;

        let mut interrupted = false;
        match &outcome {
            ExpeditionOutcome::Success(report) => {
                totals.success.fetch_add(1, Ordering::SeqCst);
                if report.bugs_found > 0 {
                    totals.bugs.fetch_add(report.bugs_found, Ordering::SeqCst);
                }
                totals.consecutive_failures.store(0, Ordering::SeqCst);
            }
            ExpeditionOutcome::Skipped(_) => {
                totals.skipped.fetch_add(1, Ordering::SeqCst);
            }
            ExpeditionOutcome::DryRun => {}
            ExpeditionOutcome::Failed(_) => {
                totals.failed.fetch_add(1, Ordering::SeqCst);
                let streak = totals.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if streak >= GOMMAGE_THRESHOLD {
                    warn!(streak, "gommage: consecutive failure threshold reached");
                    stop.stop(StopReason::Gommage);
                }
            }
            ExpeditionOutcome::Complete => {
                info!(expedition = number, "agent reported all work complete");
                stop.stop(StopReason::Complete);
            }
            ExpeditionOutcome::Interrupted => {
                interrupted = true;
            }
        }

        if let (Some(pool), Some(worktree)) = (&pool, worktree) {
            pool.release(worktree).await;
        }
        if interrupted {
            break;
        }

        if env.config.cooldown_secs > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(env.config.cooldown_secs)) => {}
                _ = stop.token.cancelled() => break,
            }
        }
    }
    debug!(worker_id, "worker done");
}
