//! Prompt assembly for one expedition.

use chrono::{DateTime, Utc};
use paintress_core::Lumina;
use paintress_dmail::DMail;

/// `expedition-NNN-prompt.md`, padded like the journal files.
pub fn prompt_file_name(expedition: u64) -> String {
    format!("expedition-{expedition:03}-prompt.md")
}

/// Everything the prompt template needs, gathered by the runner.
#[derive(Debug, Clone)]
pub struct PromptData {
    pub expedition: u64,
    pub timestamp: DateTime<Utc>,
    pub gradient_state: String,
    pub reserve_state: String,
    pub luminas: Vec<Lumina>,
    pub inbox_dmails: Vec<DMail>,
    pub context_files: Vec<(String, String)>,
    pub linear_scope: Option<String>,
    pub base_branch: String,
    pub dev_url: String,
    pub mission: String,
}

/// Render the full prompt text. Plain formatting, no template engine; the
/// section order is part of the agent contract.
pub fn build_prompt(data: &PromptData) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "# Expedition {} — {}\n\n",
        data.expedition,
        data.timestamp.to_rfc3339()
    ));

    out.push_str("## State\n\n");
    out.push_str(&format!("- {}\n", data.gradient_state));
    out.push_str(&format!("- {}\n", data.reserve_state));
    if let Some(scope) = &data.linear_scope {
        out.push_str(&format!("- {scope}\n"));
    }
    out.push_str(&format!("- Base branch: {}\n", data.base_branch));
    if !data.dev_url.is_empty() {
        out.push_str(&format!("- Dev server: {}\n", data.dev_url));
    }
    out.push('\n');

    if !data.luminas.is_empty() {
        out.push_str("## Lessons from past expeditions\n\n");
        for lumina in &data.luminas {
            out.push_str(&format!(
                "- [{}] {} (seen {}x)\n",
                lumina.source.as_str(),
                lumina.pattern,
                lumina.uses
            ));
        }
        out.push('\n');
    }

    if !data.inbox_dmails.is_empty() {
        out.push_str("## Inbox D-Mails\n\n");
        for dm in &data.inbox_dmails {
            out.push_str(&format!(
                "### {} ({}{})\n\n{}\n",
                dm.name,
                dm.kind,
                dm.severity
                    .as_deref()
                    .map(|s| format!(", severity {s}"))
                    .unwrap_or_default(),
                dm.description
            ));
            if !dm.body.is_empty() {
                out.push('\n');
                out.push_str(&dm.body);
                if !dm.body.ends_with('\n') {
                    out.push('\n');
                }
            }
            out.push('\n');
        }
    }

    if !data.context_files.is_empty() {
        out.push_str("## Project context\n\n");
        for (name, content) in &data.context_files {
            out.push_str(&format!("### {name}\n\n{content}\n"));
            if !content.ends_with('\n') {
                out.push('\n');
            }
        }
        out.push('\n');
    }

    out.push_str("## Mission\n\n");
    out.push_str(&data.mission);
    if !data.mission.ends_with('\n') {
        out.push('\n');
    }

    out
}
