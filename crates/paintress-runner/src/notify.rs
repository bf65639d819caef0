//! Observer capability for watcher events.

use paintress_dmail::DMail;
use tracing::{info, warn};

/// Receives watcher events during an expedition. Implementations must be
/// cheap; they run on the watcher tasks.
pub trait Notifier: Send + Sync {
    /// The agent moved to a new current issue (flag watcher).
    fn issue_changed(&self, issue: &str, title: &str);
    /// A D-Mail appeared in the inbox (inbox watcher).
    fn dmail_arrived(&self, dmail: &DMail);
    /// A HIGH-severity D-Mail arrived mid-expedition.
    fn high_severity_arrived(&self, dmail: &DMail);
}

/// Default notifier: everything goes to the log stream.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn issue_changed(&self, issue: &str, title: &str) {
        info!(issue, title, "agent picked up issue");
    }

    fn dmail_arrived(&self, dmail: &DMail) {
        info!(name = %dmail.name, kind = %dmail.kind, "inbox D-Mail observed");
    }

    fn high_severity_arrived(&self, dmail: &DMail) {
        warn!(
            name = %dmail.name,
            description = %dmail.description,
            "HIGH-severity D-Mail arrived mid-expedition; it will gate the next run"
        );
    }
}
