//! Lumina mining: reparse past journals into frequency-thresholded
//! lessons for future prompts.

use anyhow::Result;
use paintress_core::{Lumina, LuminaSource};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::warn;

use crate::journal::list_journals;

const FAILURE_THRESHOLD: u32 = 2;
const SUCCESS_THRESHOLD: u32 = 3;

/// Fields the miner pulls back out of one journal entry.
#[derive(Debug, Clone, Default)]
struct JournalFacts {
    status: String,
    reason: String,
    mission: String,
    insight: String,
}

/// Scan every journal of the continent, one task per file, and aggregate
/// repeated patterns.
///
/// Failures aggregate by insight (falling back to reason) and surface at
/// two occurrences; successes aggregate by insight (falling back to
/// mission) and need three.
pub async fn scan_journals_for_lumina(journal_dir: &Path) -> Result<Vec<Lumina>> {
    let paths = list_journals(journal_dir)?;
    let facts: Arc<Mutex<Vec<JournalFacts>>> = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = JoinSet::new();
    for path in paths {
        let facts = Arc::clone(&facts);
        tasks.spawn_blocking(move || match std::fs::read_to_string(&path) {
            Ok(content) => {
                let parsed = extract_facts(&content);
                facts.lock().unwrap_or_else(|e| e.into_inner()).push(parsed);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to read journal"),
        });
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "journal scan task panicked");
        }
    }

    let facts = facts.lock().unwrap_or_else(|e| e.into_inner());
    Ok(aggregate(&facts))
}

fn extract_facts(content: &str) -> JournalFacts {
    let mut facts = JournalFacts::default();
    for line in content.lines() {
        let Some((key, value)) = parse_field_line(line) else {
            continue;
        };
        match key.as_str() {
            "Status" => facts.status = value,
            "Reason" => facts.reason = value,
            "Mission" => facts.mission = value,
            "Insight" => facts.insight = value,
            _ => {}
        }
    }
    facts
}

/// Parse one `- **Key**: value` bullet; `**` bold markers are stripped
/// from the value as well.
fn parse_field_line(line: &str) -> Option<(String, String)> {
    let rest = line.trim().strip_prefix("- **")?;
    let (key, rest) = rest.split_once("**")?;
    let value = rest.strip_prefix(':')?.trim().replace("**", "");
    Some((key.to_string(), value))
}

fn aggregate(facts: &[JournalFacts]) -> Vec<Lumina> {
    let mut failure_counts: HashMap<&str, u32> = HashMap::new();
    let mut success_counts: HashMap<&str, u32> = HashMap::new();

    for f in facts {
        match f.status.as_str() {
            "failed" => {
                let key = if f.insight.is_empty() {
                    &f.reason
                } else {
                    &f.insight
                };
                if !key.is_empty() {
                    *failure_counts.entry(key).or_default() += 1;
                }
            }
            "success" => {
                let key = if f.insight.is_empty() {
                    &f.mission
                } else {
                    &f.insight
                };
                if !key.is_empty() {
                    *success_counts.entry(key).or_default() += 1;
                }
            }
            _ => {}
        }
    }

    let mut luminas: Vec<Lumina> = Vec::new();
    for (pattern, uses) in failure_counts {
        if uses >= FAILURE_THRESHOLD {
            luminas.push(Lumina {
                pattern: pattern.to_string(),
                source: LuminaSource::FailurePattern,
                uses,
            });
        }
    }
    for (pattern, uses) in success_counts {
        if uses >= SUCCESS_THRESHOLD {
            luminas.push(Lumina {
                pattern: pattern.to_string(),
                source: LuminaSource::SuccessPattern,
                uses,
            });
        }
    }
    luminas.sort_by(|a, b| {
        a.source
            .as_str()
            .cmp(b.source.as_str())
            .then_with(|| a.pattern.cmp(&b.pattern))
    });
    luminas
}

/// Render the operator-facing `lumina.md`.
pub fn render_lumina_markdown(luminas: &[Lumina]) -> String {
    if luminas.is_empty() {
        return "# Luminas\n\nNo repeated patterns yet.\n".to_string();
    }
    let mut out = String::from("# Luminas\n\n");
    for l in luminas {
        out.push_str(&format!("- [{}] {} (seen {}x)\n", l.source.as_str(), l.pattern, l.uses));
    }
    out
}

/// Best-effort write of the derived file; callers only log on failure.
pub fn write_lumina_file(path: &Path, luminas: &[Lumina]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_lumina_markdown(luminas))?;
    Ok(())
}
