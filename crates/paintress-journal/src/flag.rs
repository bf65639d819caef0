//! The single-file checkpoint at `.run/flag.md`.
//!
//! Both the loop and the agent touch this file: the loop records the last
//! finished expedition, the agent updates `current_issue` mid-run for the
//! flag watcher. Writes go through one process-wide mutex and are dropped
//! when they would move `last_expedition` backwards, which makes
//! out-of-order worker completions safe.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

static FLAG_WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Parsed contents of `flag.md`. Missing keys read as empty/zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flag {
    pub last_expedition: u64,
    pub last_updated: String,
    pub last_issue: String,
    pub last_status: String,
    pub remaining_issues: String,
    pub current_issue: String,
    pub current_title: String,
}

impl Flag {
    fn parse(content: &str) -> Self {
        let mut flag = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "last_expedition" => {
                    flag.last_expedition = value.parse().unwrap_or(0);
                }
                "last_updated" => flag.last_updated = value.to_string(),
                "last_issue" => flag.last_issue = value.to_string(),
                "last_status" => flag.last_status = value.to_string(),
                "remaining_issues" => flag.remaining_issues = value.to_string(),
                "current_issue" => flag.current_issue = value.to_string(),
                "current_title" => flag.current_title = value.to_string(),
                _ => {}
            }
        }
        flag
    }

    fn render(&self) -> String {
        format!(
            "# Expedition flag. Managed file; the agent may update current_issue.\n\
             last_expedition: {}\n\
             last_updated: {}\n\
             last_issue: {}\n\
             last_status: {}\n\
             remaining_issues: {}\n\
             current_issue: {}\n\
             current_title: {}\n",
            self.last_expedition,
            sanitize(&self.last_updated),
            sanitize(&self.last_issue),
            sanitize(&self.last_status),
            sanitize(&self.remaining_issues),
            sanitize(&self.current_issue),
            sanitize(&self.current_title),
        )
    }
}

/// Values are single-line by construction; embedded CR/LF would corrupt
/// the key-per-line format.
fn sanitize(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Read the flag, treating a missing or unreadable file as the zero flag.
pub fn read_flag(flag_path: &Path) -> Flag {
    match std::fs::read_to_string(flag_path) {
        Ok(content) => Flag::parse(&content),
        Err(_) => Flag::default(),
    }
}

/// Record the checkpoint for a finished expedition.
///
/// Returns `false` when the write was dropped because the on-disk
/// `last_expedition` is already at or past `expedition`. The agent-owned
/// `current_issue`/`current_title` values are carried over unchanged.
pub fn write_flag(
    flag_path: &Path,
    expedition: u64,
    issue: &str,
    status: &str,
    remaining: &str,
) -> Result<bool> {
    let _guard = FLAG_WRITE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let current = read_flag(flag_path);
    if current.last_expedition >= expedition {
        debug!(
            on_disk = current.last_expedition,
            expedition, "flag write dropped to preserve monotonicity"
        );
        return Ok(false);
    }

    let flag = Flag {
        last_expedition: expedition,
        last_updated: Utc::now().to_rfc3339(),
        last_issue: issue.to_string(),
        last_status: status.to_string(),
        remaining_issues: remaining.to_string(),
        current_issue: current.current_issue,
        current_title: current.current_title,
    };

    if let Some(parent) = flag_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(flag_path, flag.render())
        .with_context(|| format!("Failed to write {}", flag_path.display()))?;
    Ok(true)
}
