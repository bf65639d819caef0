#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Expedition timed out after {0}s")]
    ExpeditionTimeout(u64),

    #[error("Expedition interrupted")]
    Interrupted,

    #[error("Agent exited with code {code}: {summary}")]
    AgentFailed { code: i32, summary: String },

    #[error("Report block not found: missing {0} marker")]
    ReportMarkerMissing(&'static str),

    #[error("Report markers out of order")]
    ReportMarkersOutOfOrder,

    #[error("Invalid report status '{0}'")]
    ReportInvalidStatus(String),

    #[error("D-Mail '{name}' missing opening delimiter")]
    DMailMissingOpeningDelimiter { name: String },

    #[error("D-Mail '{name}' missing closing delimiter")]
    DMailMissingClosingDelimiter { name: String },

    #[error("Inbox scan failed: {0}")]
    InboxScanFailed(String),

    #[error("Approval denied")]
    ApprovalDenied,

    #[error("Review service rate limited")]
    ReviewRateLimited,

    #[error("Agent binary '{0}' is not installed or not in PATH")]
    AgentNotInstalled(String),
}

impl AppError {
    /// Whether this error came from the parent run being cancelled, as
    /// opposed to a real expedition failure. Interruptions never count
    /// toward the consecutive-failure sentinel.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_expedition_timeout() {
        let err = AppError::ExpeditionTimeout(900);
        assert_eq!(err.to_string(), "Expedition timed out after 900s");
    }

    #[test]
    fn test_display_agent_failed() {
        let err = AppError::AgentFailed {
            code: 2,
            summary: "fatal: not a git repository".into(),
        };
        assert_eq!(
            err.to_string(),
            "Agent exited with code 2: fatal: not a git repository"
        );
    }

    #[test]
    fn test_display_report_marker_missing() {
        let err = AppError::ReportMarkerMissing("__EXPEDITION_REPORT__");
        assert_eq!(
            err.to_string(),
            "Report block not found: missing __EXPEDITION_REPORT__ marker"
        );
    }

    #[test]
    fn test_display_dmail_delimiters() {
        let err = AppError::DMailMissingOpeningDelimiter {
            name: "alert-1.md".into(),
        };
        assert_eq!(err.to_string(), "D-Mail 'alert-1.md' missing opening delimiter");

        let err = AppError::DMailMissingClosingDelimiter {
            name: "alert-1.md".into(),
        };
        assert_eq!(err.to_string(), "D-Mail 'alert-1.md' missing closing delimiter");
    }

    #[test]
    fn test_interruption_classification() {
        assert!(AppError::Interrupted.is_interruption());
        assert!(!AppError::ExpeditionTimeout(10).is_interruption());
        assert!(
            !AppError::AgentFailed {
                code: 1,
                summary: String::new()
            }
            .is_interruption()
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AppError>();
    }
}
