use serde::{Deserialize, Serialize};

/// Sentinel line the agent emits when no work remains anywhere.
pub const COMPLETE_MARKER: &str = "__EXPEDITION_COMPLETE__";
/// Opening marker of the structured report block on agent stdout.
pub const REPORT_START_MARKER: &str = "__EXPEDITION_REPORT__";
/// Closing marker of the structured report block.
pub const REPORT_END_MARKER: &str = "__EXPEDITION_END__";

/// Outcome class of one expedition, as reported by the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpeditionStatus {
    Success,
    Skipped,
    Failed,
    /// The agent signalled that the whole run is done (`__EXPEDITION_COMPLETE__`).
    Complete,
}

impl ExpeditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Complete => "complete",
        }
    }

    /// Parse the `status:` value of a report block. Only the three
    /// reportable statuses are valid here; `complete` travels as its own
    /// marker, never as a status field.
    pub fn parse_report_value(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExpeditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What kind of work the agent performed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissionType {
    Implement,
    Verify,
    Fix,
    /// Anything else the agent chose to call its mission.
    Other(String),
}

impl MissionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Implement => "implement",
            Self::Verify => "verify",
            Self::Fix => "fix",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for MissionType {
    fn from(s: &str) -> Self {
        match s {
            "implement" => Self::Implement,
            "verify" => Self::Verify,
            "fix" => Self::Fix,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for MissionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for MissionType {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

/// Structured record parsed from one expedition's agent output.
///
/// Immutable once parsed; consumed by the journal and flag writers and the
/// review loop (which only appends to `insight`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpeditionReport {
    pub expedition: u64,
    pub issue_id: String,
    pub issue_title: String,
    pub mission_type: MissionType,
    pub branch: String,
    pub pr_url: String,
    pub status: ExpeditionStatus,
    pub reason: String,
    pub remaining_issues: String,
    pub bugs_found: i64,
    pub bug_issues: String,
    pub insight: String,
    pub failure_type: String,
}

impl ExpeditionReport {
    /// A blank report for the given expedition number.
    pub fn empty(expedition: u64) -> Self {
        Self {
            expedition,
            issue_id: String::new(),
            issue_title: String::new(),
            mission_type: MissionType::default(),
            branch: String::new(),
            pr_url: String::new(),
            status: ExpeditionStatus::Failed,
            reason: String::new(),
            remaining_issues: String::new(),
            bugs_found: 0,
            bug_issues: String::new(),
            insight: String::new(),
            failure_type: String::new(),
        }
    }

    /// Synthetic failure report used when the agent errored or its output
    /// had no parseable report block.
    pub fn synthetic_failure(expedition: u64, reason: impl Into<String>) -> Self {
        let mut report = Self::empty(expedition);
        report.reason = reason.into();
        report.failure_type = "runner-error".to_string();
        report
    }

    /// Whether the report names a usable PR URL.
    pub fn has_pr(&self) -> bool {
        !self.pr_url.is_empty() && self.pr_url != "none"
    }

    /// Whether the report names a usable branch.
    pub fn has_branch(&self) -> bool {
        !self.branch.is_empty() && self.branch != "none"
    }
}

/// Where a mined pattern came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LuminaSource {
    FailurePattern,
    SuccessPattern,
}

impl LuminaSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailurePattern => "failure-pattern",
            Self::SuccessPattern => "success-pattern",
        }
    }
}

/// A distilled lesson mined from past journals, fed into future prompts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lumina {
    pub pattern: String,
    pub source: LuminaSource,
    pub uses: u32,
}
