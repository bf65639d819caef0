use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where machine-readable run data is written. In JSON mode the agent's
/// streamed output moves to stderr so stdout stays parseable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Text,
    Json,
}

/// Immutable run configuration, assembled by the CLI before workers start.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute path to the target git working tree.
    pub continent: PathBuf,
    /// How many further expeditions to run beyond the flag checkpoint.
    pub max_expeditions: u64,
    /// Parallel workers. 0 disables the worktree pool and runs expeditions
    /// directly in the continent.
    pub workers: u32,
    /// Wall-clock budget for one expedition, in seconds.
    pub timeout_secs: u64,
    /// Agent binary name.
    pub agent_cmd: String,
    /// Primary model passed to the agent.
    pub primary_model: String,
    /// Ordered fallback models for rate-limit situations.
    pub reserve_models: Vec<String>,
    /// Branch the worktree pool checks out and the agent branches from.
    pub base_branch: String,
    /// Dev-server URL handed to the agent verbatim.
    pub dev_url: String,
    /// Review command template; empty disables the review loop.
    pub review_cmd: String,
    /// Command run inside each fresh worktree during pool init.
    pub worktree_setup_cmd: String,
    /// Skip the HIGH-severity human approval gate.
    pub auto_approve: bool,
    /// Render prompts but never spawn the agent.
    pub dry_run: bool,
    pub output: OutputMode,
    /// Pause between expeditions on one worker, in seconds.
    pub cooldown_secs: u64,
    /// Gradient gauge capacity.
    pub gauge_max: u32,
    /// Bound on every git subcommand the pool and review loop issue.
    pub git_timeout_secs: u64,
}

impl Config {
    pub fn new(continent: impl Into<PathBuf>) -> Self {
        Self {
            continent: continent.into(),
            max_expeditions: 1,
            workers: 0,
            timeout_secs: 1800,
            agent_cmd: "claude".to_string(),
            primary_model: "opus".to_string(),
            reserve_models: vec!["sonnet".to_string()],
            base_branch: "main".to_string(),
            dev_url: String::new(),
            review_cmd: String::new(),
            worktree_setup_cmd: String::new(),
            auto_approve: false,
            dry_run: false,
            output: OutputMode::Text,
            cooldown_secs: 10,
            gauge_max: 5,
            git_timeout_secs: 30,
        }
    }

    /// Worker count with the scheduler's minimum of one applied.
    pub fn effective_workers(&self) -> u32 {
        self.workers.max(1)
    }

    /// Whether the worktree pool is in play at all.
    pub fn uses_worktrees(&self) -> bool {
        self.workers > 0
    }
}

/// Project-scoped settings read from `<continent>/.expedition/config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Linear team key the agent scopes issue queries to.
    #[serde(default)]
    pub linear_team_key: String,
    /// Optional Linear project name narrowing the scope further.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

impl ProjectConfig {
    /// Load from `config.yaml` under the layout root. Returns defaults when
    /// the file does not exist (uninitialized continents are still usable).
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        Ok(())
    }

    /// Human-readable scope line for the prompt, or `None` when the project
    /// config carries nothing.
    pub fn scope_line(&self) -> Option<String> {
        if self.linear_team_key.is_empty() {
            return None;
        }
        match &self.project_name {
            Some(project) if !project.is_empty() => Some(format!(
                "Linear team: {} (project: {})",
                self.linear_team_key, project
            )),
            _ => Some(format!("Linear team: {}", self.linear_team_key)),
        }
    }
}
