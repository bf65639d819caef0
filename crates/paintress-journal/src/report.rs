//! Deterministic parsing of the marker-framed report block.

use anyhow::Result;
use paintress_core::{
    AppError, ExpeditionReport, ExpeditionStatus, COMPLETE_MARKER, REPORT_END_MARKER,
    REPORT_START_MARKER,
};

/// Parse the full captured agent output into a report.
///
/// `__EXPEDITION_COMPLETE__` anywhere wins over everything else. Otherwise
/// the first `__EXPEDITION_REPORT__` .. `__EXPEDITION_END__` block is
/// scanned line by line; values keep their internal colons, unknown keys
/// are ignored.
pub fn parse_report(output: &str, expedition: u64) -> Result<ExpeditionReport> {
    if output.contains(COMPLETE_MARKER) {
        let mut report = ExpeditionReport::empty(expedition);
        report.status = ExpeditionStatus::Complete;
        return Ok(report);
    }

    let start = output
        .find(REPORT_START_MARKER)
        .ok_or(AppError::ReportMarkerMissing(REPORT_START_MARKER))?;
    let end = output
        .find(REPORT_END_MARKER)
        .ok_or(AppError::ReportMarkerMissing(REPORT_END_MARKER))?;
    if start >= end {
        return Err(AppError::ReportMarkersOutOfOrder.into());
    }

    let block = &output[start + REPORT_START_MARKER.len()..end];
    let mut report = ExpeditionReport::empty(expedition);
    let mut status: Option<ExpeditionStatus> = None;

    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "issue_id" => report.issue_id = value.to_string(),
            "issue_title" => report.issue_title = value.to_string(),
            "mission_type" => report.mission_type = value.into(),
            "branch" => report.branch = value.to_string(),
            "pr_url" => report.pr_url = value.to_string(),
            "status" => {
                status = Some(
                    ExpeditionStatus::parse_report_value(value)
                        .ok_or_else(|| AppError::ReportInvalidStatus(value.to_string()))?,
                );
            }
            "reason" => report.reason = value.to_string(),
            "remaining_issues" => report.remaining_issues = value.to_string(),
            "bugs_found" => report.bugs_found = parse_leading_int(value),
            "bug_issues" => report.bug_issues = value.to_string(),
            "insight" => report.insight = value.to_string(),
            "failure_type" => report.failure_type = value.to_string(),
            _ => {}
        }
    }

    report.status = status.ok_or_else(|| AppError::ReportInvalidStatus(String::new()))?;
    Ok(report)
}

/// Leading-integer scan: `"3 confirmed"` counts 3, garbage counts 0,
/// negatives are allowed.
fn parse_leading_int(value: &str) -> i64 {
    let value = value.trim();
    let mut end = 0;
    let bytes = value.as_bytes();
    if bytes.first() == Some(&b'-') {
        end = 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    value[..end].parse().unwrap_or(0)
}
