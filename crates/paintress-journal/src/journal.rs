//! Append-only per-expedition journal files.
//!
//! Human-readable markdown, but the `- **Key**: value` bullets are a fixed
//! schema the Lumina miner reparses.

use anyhow::{Context, Result};
use chrono::Utc;
use paintress_core::ExpeditionReport;
use std::path::{Path, PathBuf};

/// `NNN.md`, zero-padded to three digits and growing naturally past 999.
pub fn journal_file_name(expedition: u64) -> String {
    format!("{expedition:03}.md")
}

/// Write the journal entry for one report. Entries are keyed by expedition
/// number, so parallel workers never collide.
pub fn write_journal(journal_dir: &Path, report: &ExpeditionReport) -> Result<PathBuf> {
    std::fs::create_dir_all(journal_dir)
        .with_context(|| format!("Failed to create {}", journal_dir.display()))?;

    let path = journal_dir.join(journal_file_name(report.expedition));
    let content = render_journal(report);
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn render_journal(report: &ExpeditionReport) -> String {
    format!(
        "# Expedition #{} — Journal\n\
         \n\
         - **Date**: {}\n\
         - **Issue**: {} — {}\n\
         - **Mission**: {}\n\
         - **Status**: {}\n\
         - **Reason**: {}\n\
         - **PR**: {}\n\
         - **Bugs found**: {}\n\
         - **Bug issues**: {}\n\
         - **Insight**: {}\n\
         - **Failure type**: {}\n",
        report.expedition,
        Utc::now().to_rfc3339(),
        report.issue_id,
        report.issue_title,
        report.mission_type,
        report.status,
        single_line(&report.reason),
        report.pr_url,
        report.bugs_found,
        report.bug_issues,
        single_line(&report.insight),
        report.failure_type,
    )
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Journal files sorted by name. `000.md` is the seed entry and never a
/// real expedition; subdirectories and non-markdown files are ignored.
pub fn list_journals(journal_dir: &Path) -> Result<Vec<PathBuf>> {
    if !journal_dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(journal_dir)
        .with_context(|| format!("Failed to read {}", journal_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".md") || name == "000.md" {
            continue;
        }
        paths.push(path);
    }
    paths.sort();
    Ok(paths)
}
