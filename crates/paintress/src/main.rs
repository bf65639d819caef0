use anyhow::{Context, Result};
use clap::Parser;
use paintress_config::{
    init_logging, quiet_from_env, Config, ContinentLayout, OutputMode, ProjectConfig,
};
use paintress_dmail::{Approver, CommandApprover, StdinApprover};
use paintress_process::SystemGit;
use paintress_runner::LogNotifier;
use paintress_scheduler::Scheduler;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod cli;

use cli::{Cli, Commands, FormatArg};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run {
            continent,
            max_expeditions,
            workers,
            timeout,
            agent,
            model,
            reserves,
            base_branch,
            dev_url,
            review_cmd,
            worktree_setup,
            approve_cmd,
            auto_approve,
            dry_run,
            format,
        } => {
            let continent = match continent.canonicalize() {
                Ok(path) => path,
                Err(e) => {
                    eprintln!("paintress: continent {}: {e}", continent.display());
                    std::process::exit(1);
                }
            };

            let mut config = Config::new(continent);
            config.max_expeditions = max_expeditions;
            config.workers = workers;
            config.timeout_secs = timeout;
            config.agent_cmd = agent;
            config.primary_model = model;
            config.reserve_models = reserves;
            config.base_branch = base_branch;
            config.dev_url = dev_url;
            config.review_cmd = review_cmd;
            config.worktree_setup_cmd = worktree_setup;
            config.auto_approve = auto_approve;
            config.dry_run = dry_run;
            config.output = match format {
                FormatArg::Text => OutputMode::Text,
                FormatArg::Json => OutputMode::Json,
            };

            run(config, approve_cmd).await
        }
        Commands::Init { continent, team } => match init(&continent, &team) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("paintress: init failed: {e:#}");
                1
            }
        },
    };
    std::process::exit(code);
}

async fn run(config: Config, approve_cmd: Option<String>) -> i32 {
    let layout = ContinentLayout::new(&config.continent);
    let _log_guard = match init_logging(&layout.logs_dir(), quiet_from_env()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("paintress: logging setup failed: {e:#}");
            return 1;
        }
    };

    let approver: Arc<dyn Approver> = match approve_cmd {
        Some(template) => Arc::new(CommandApprover::new(template)),
        None => Arc::new(StdinApprover),
    };
    let git_timeout = Duration::from_secs(config.git_timeout_secs);
    let scheduler = Scheduler::new(
        config,
        approver,
        Arc::new(LogNotifier),
        Arc::new(SystemGit::new(git_timeout)),
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    scheduler.run(&cancel).await
}

/// Cancel the run on SIGINT or SIGTERM; workers classify in-flight
/// expeditions as interrupted and the process exits 130.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received; shutting down"),
                _ = sigterm.recv() => info!("SIGTERM received; shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        cancel.cancel();
    });
}

fn init(continent: &Path, team: &str) -> Result<()> {
    let continent = continent
        .canonicalize()
        .with_context(|| format!("continent {}", continent.display()))?;
    let layout = ContinentLayout::new(&continent);
    layout.ensure()?;
    layout.write_mission()?;

    let config_path = layout.config_path();
    if !config_path.exists() {
        let project = ProjectConfig {
            linear_team_key: team.to_string(),
            project_name: None,
        };
        project.save(&config_path)?;
    }

    println!("Initialized {}", layout.root().display());
    Ok(())
}
