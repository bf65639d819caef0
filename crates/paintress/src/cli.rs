use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "paintress", about = "Autonomous expedition loop driver", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum FormatArg {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run expeditions against a continent.
    Run {
        /// Path to the target git working tree.
        #[arg(long, default_value = ".")]
        continent: PathBuf,

        /// How many expeditions to run beyond the last checkpoint.
        #[arg(long, default_value_t = 1)]
        max_expeditions: u64,

        /// Parallel workers; 0 runs directly in the continent.
        #[arg(long, default_value_t = 0)]
        workers: u32,

        /// Per-expedition wall-clock budget in seconds.
        #[arg(long, default_value_t = 1800)]
        timeout: u64,

        /// Agent binary.
        #[arg(long, default_value = "claude")]
        agent: String,

        /// Primary model.
        #[arg(long, default_value = "opus")]
        model: String,

        /// Reserve models for rate-limit fallback, comma-separated.
        #[arg(long, value_delimiter = ',', default_value = "sonnet")]
        reserves: Vec<String>,

        /// Branch worktrees are cut from.
        #[arg(long, default_value = "main")]
        base_branch: String,

        /// Dev-server URL handed to the agent.
        #[arg(long, default_value = "")]
        dev_url: String,

        /// Review command; empty disables the review loop.
        #[arg(long, default_value = "")]
        review_cmd: String,

        /// Command run in each fresh worktree during pool init.
        #[arg(long, default_value = "")]
        worktree_setup: String,

        /// External approval command with a {message} placeholder.
        #[arg(long)]
        approve_cmd: Option<String>,

        /// Skip the HIGH-severity approval gate.
        #[arg(long)]
        auto_approve: bool,

        /// Render prompts without spawning the agent.
        #[arg(long)]
        dry_run: bool,

        /// Output format for run data on stdout.
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },

    /// Create the .expedition layout and a starter config.
    Init {
        #[arg(long, default_value = ".")]
        continent: PathBuf,

        /// Linear team key written to config.yaml.
        #[arg(long, default_value = "")]
        team: String,
    },
}
