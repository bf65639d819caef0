//! The D-Mail wire format: `---\n<yaml>\n---\n\n<body>`.

use anyhow::Result;
use paintress_core::AppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The one severity value with special meaning: it arms the pre-flight
/// human-approval gate.
pub const SEVERITY_HIGH: &str = "high";

const DELIMITER: &str = "---";
const OPENING: &str = "---\n";

/// YAML frontmatter of a D-Mail file. Unknown keys are tolerated; broken
/// YAML is not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Frontmatter {
    name: String,
    kind: String,
    description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    severity: Option<String>,
    #[serde(
        rename = "dmail-schema-version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    schema_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

/// One message. `name` doubles as the filename stem in every queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DMail {
    pub name: String,
    pub kind: String,
    pub description: String,
    pub issues: Vec<String>,
    pub severity: Option<String>,
    pub schema_version: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub body: String,
}

impl DMail {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn is_high_severity(&self) -> bool {
        self.severity.as_deref() == Some(SEVERITY_HIGH)
    }

    pub fn file_name(&self) -> String {
        format!("{}.md", self.name)
    }

    /// Parse a D-Mail file. `source_name` only labels errors.
    ///
    /// Scans for the *first* closing delimiter, so bodies containing `---`
    /// lines survive untouched.
    pub fn parse(content: &str, source_name: &str) -> Result<Self> {
        let Some(after) = content.strip_prefix(OPENING) else {
            return Err(AppError::DMailMissingOpeningDelimiter {
                name: source_name.to_string(),
            }
            .into());
        };

        let (yaml, rest) = split_at_closing_delimiter(after).ok_or_else(|| {
            AppError::DMailMissingClosingDelimiter {
                name: source_name.to_string(),
            }
        })?;

        let frontmatter: Frontmatter = serde_yaml::from_str(yaml)
            .map_err(|e| anyhow::anyhow!("D-Mail '{source_name}' has invalid YAML: {e}"))?;

        Ok(Self {
            name: frontmatter.name,
            kind: frontmatter.kind,
            description: frontmatter.description,
            issues: frontmatter.issues,
            severity: frontmatter.severity,
            schema_version: frontmatter.schema_version,
            metadata: frontmatter.metadata,
            body: rest.trim_start_matches('\n').to_string(),
        })
    }

    /// Serialize back to the wire format. A non-empty body is separated
    /// from the closing delimiter by a blank line and always ends with a
    /// newline.
    pub fn marshal(&self) -> Result<String> {
        let frontmatter = Frontmatter {
            name: self.name.clone(),
            kind: self.kind.clone(),
            description: self.description.clone(),
            issues: self.issues.clone(),
            severity: self.severity.clone(),
            schema_version: self.schema_version.clone(),
            metadata: self.metadata.clone(),
        };
        let mut out = String::from(OPENING);
        out.push_str(&serde_yaml::to_string(&frontmatter)?);
        out.push_str(DELIMITER);
        out.push('\n');
        if !self.body.is_empty() {
            out.push('\n');
            out.push_str(&self.body);
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }
        Ok(out)
    }
}

/// Find the first closing `---` delimiter in the text following the opening
/// one. Returns the YAML slice (trailing newline included) and everything
/// after the delimiter.
fn split_at_closing_delimiter(after: &str) -> Option<(&str, &str)> {
    // Degenerate case: the frontmatter is empty and the closing delimiter
    // immediately follows the opening one.
    if let Some(rest) = after.strip_prefix("---\n") {
        return Some(("", rest));
    }
    if after == DELIMITER {
        return Some(("", ""));
    }

    if let Some(idx) = after.find("\n---\n") {
        return Some((&after[..idx + 1], &after[idx + 5..]));
    }
    if let Some(yaml) = after.strip_suffix("\n---") {
        // Closing delimiter at EOF without trailing newline.
        let yaml_end = yaml.len() + 1;
        return Some((&after[..yaml_end], ""));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DMail {
        DMail {
            name: "report-eng-42".to_string(),
            kind: "report".to_string(),
            description: "Implemented ENG-42".to_string(),
            issues: vec!["ENG-42".to_string()],
            severity: None,
            schema_version: Some("1".to_string()),
            metadata: BTreeMap::new(),
            body: "Shipped the thing.\n".to_string(),
        }
    }

    #[test]
    fn test_parse_basic() {
        let content = "---\nname: alert-1\nkind: alert\ndescription: disk almost full\nseverity: high\n---\n\nCheck the CI runner.\n";
        let dm = DMail::parse(content, "alert-1.md").unwrap();
        assert_eq!(dm.name, "alert-1");
        assert_eq!(dm.kind, "alert");
        assert!(dm.is_high_severity());
        assert_eq!(dm.body, "Check the CI runner.\n");
    }

    #[test]
    fn test_parse_missing_opening_delimiter() {
        let err = DMail::parse("name: x\n---\n", "x.md").unwrap_err();
        let app = err.downcast_ref::<AppError>().unwrap();
        assert!(matches!(
            app,
            AppError::DMailMissingOpeningDelimiter { name } if name == "x.md"
        ));
    }

    #[test]
    fn test_parse_missing_closing_delimiter() {
        let err = DMail::parse("---\nname: x\nkind: k\ndescription: d\n", "x.md").unwrap_err();
        let app = err.downcast_ref::<AppError>().unwrap();
        assert!(matches!(
            app,
            AppError::DMailMissingClosingDelimiter { name } if name == "x.md"
        ));
    }

    #[test]
    fn test_parse_body_with_delimiter_lines() {
        let content =
            "---\nname: spec-7\nkind: specification\ndescription: d\n---\n\nIntro\n\n---\n\nSecond section\n";
        let dm = DMail::parse(content, "spec-7.md").unwrap();
        assert_eq!(dm.body, "Intro\n\n---\n\nSecond section\n");
    }

    #[test]
    fn test_parse_closing_delimiter_at_eof() {
        let content = "---\nname: n\nkind: k\ndescription: d\n---";
        let dm = DMail::parse(content, "n.md").unwrap();
        assert_eq!(dm.name, "n");
        assert!(dm.body.is_empty());
    }

    #[test]
    fn test_parse_unknown_keys_tolerated() {
        let content = "---\nname: n\nkind: k\ndescription: d\nfuture-field: 9\n---\n";
        let dm = DMail::parse(content, "n.md").unwrap();
        assert_eq!(dm.name, "n");
    }

    #[test]
    fn test_parse_invalid_yaml_propagates() {
        let content = "---\nname: [unclosed\n---\n";
        let err = DMail::parse(content, "bad.md").unwrap_err();
        assert!(err.to_string().contains("bad.md"));
    }

    #[test]
    fn test_marshal_shape() {
        let out = sample().marshal().unwrap();
        assert!(out.starts_with("---\n"));
        assert!(out.contains("\n---\n\nShipped the thing.\n"));
        assert!(out.ends_with('\n'));
        assert!(out.contains("dmail-schema-version: '1'") || out.contains("dmail-schema-version: \"1\"") || out.contains("dmail-schema-version: 1"));
    }

    #[test]
    fn test_marshal_empty_body_has_no_blank_line() {
        let mut dm = sample();
        dm.body = String::new();
        let out = dm.marshal().unwrap();
        assert!(out.ends_with("---\n"));
        assert!(!out.ends_with("---\n\n"));
    }

    #[test]
    fn test_round_trip() {
        let dm = sample();
        let parsed = DMail::parse(&dm.marshal().unwrap(), "report-eng-42.md").unwrap();
        assert_eq!(parsed, dm);
    }

    #[test]
    fn test_round_trip_empty_body() {
        let mut dm = sample();
        dm.body = String::new();
        let parsed = DMail::parse(&dm.marshal().unwrap(), "x.md").unwrap();
        assert_eq!(parsed, dm);
    }

    #[test]
    fn test_round_trip_body_gains_trailing_newline() {
        let mut dm = sample();
        dm.body = "no trailing newline".to_string();
        let parsed = DMail::parse(&dm.marshal().unwrap(), "x.md").unwrap();
        assert_eq!(parsed.body, "no trailing newline\n");
    }

    #[test]
    fn test_round_trip_with_metadata_and_issues() {
        let mut dm = sample();
        dm.issues = vec!["ENG-1".to_string(), "ENG-2".to_string()];
        dm.metadata
            .insert("origin".to_string(), "expedition-12".to_string());
        let parsed = DMail::parse(&dm.marshal().unwrap(), "x.md").unwrap();
        assert_eq!(parsed, dm);
    }
}
