//! HIGH-severity pre-flight gate, run once before any worker starts.

use anyhow::Result;
use paintress_config::ContinentLayout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::approve::Approver;
use crate::bus::scan_inbox;
use crate::model::DMail;

/// Outcome of the gate, together with the inbox snapshot taken for it.
#[derive(Debug)]
pub enum GateDecision {
    /// Run may proceed; carries every inbox D-Mail found at scan time.
    Proceed(Vec<DMail>),
    /// A human denied the run. Clean abort, nothing attempted.
    Denied,
}

/// Scan the inbox and, when HIGH-severity items are present and
/// auto-approve is off, consult the approver exactly once for the whole
/// batch. A scan failure propagates so the run fails closed.
pub async fn preflight_gate(
    layout: &ContinentLayout,
    auto_approve: bool,
    approver: &dyn Approver,
    cancel: &CancellationToken,
) -> Result<GateDecision> {
    let dmails = scan_inbox(layout)?;
    let high: Vec<&DMail> = dmails.iter().filter(|d| d.is_high_severity()).collect();

    if high.is_empty() {
        return Ok(GateDecision::Proceed(dmails));
    }
    if auto_approve {
        info!(count = high.len(), "HIGH-severity D-Mails auto-approved");
        return Ok(GateDecision::Proceed(dmails));
    }

    let mut message = format!(
        "{} HIGH-severity D-Mail(s) are waiting in the inbox:\n",
        high.len()
    );
    for dm in &high {
        message.push_str(&format!("  - {}: {}\n", dm.name, dm.description));
    }

    if approver.request_approval(cancel, message.trim_end()).await? {
        info!(count = high.len(), "HIGH-severity gate approved");
        Ok(GateDecision::Proceed(dmails))
    } else {
        warn!("HIGH-severity gate denied; aborting run");
        Ok(GateDecision::Denied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::send_dmail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct CountingApprover {
        approve: bool,
        calls: AtomicU32,
    }

    impl CountingApprover {
        fn new(approve: bool) -> Self {
            Self {
                approve,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Approver for CountingApprover {
        async fn request_approval(
            &self,
            _cancel: &CancellationToken,
            _message: &str,
        ) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.approve)
        }
    }

    fn layout_with_inbox(dmails: &[DMail]) -> (tempfile::TempDir, ContinentLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = ContinentLayout::new(dir.path());
        layout.ensure().unwrap();
        for dm in dmails {
            std::fs::write(
                layout.inbox_dir().join(dm.file_name()),
                dm.marshal().unwrap(),
            )
            .unwrap();
        }
        (dir, layout)
    }

    fn high_alert(name: &str) -> DMail {
        let mut dm = DMail::new(name, "alert", "something urgent");
        dm.severity = Some("high".to_string());
        dm
    }

    #[tokio::test]
    async fn test_gate_no_high_skips_approver() {
        let (_dir, layout) = layout_with_inbox(&[DMail::new("info-1", "feedback", "fyi")]);
        let approver = CountingApprover::new(false);
        let cancel = CancellationToken::new();

        let decision = preflight_gate(&layout, false, &approver, &cancel)
            .await
            .unwrap();
        assert!(matches!(decision, GateDecision::Proceed(d) if d.len() == 1));
        assert_eq!(approver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gate_high_consults_approver_once() {
        let (_dir, layout) = layout_with_inbox(&[high_alert("alert-1"), high_alert("alert-2")]);
        let approver = CountingApprover::new(true);
        let cancel = CancellationToken::new();

        let decision = preflight_gate(&layout, false, &approver, &cancel)
            .await
            .unwrap();
        assert!(matches!(decision, GateDecision::Proceed(d) if d.len() == 2));
        assert_eq!(approver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_denied() {
        let (_dir, layout) = layout_with_inbox(&[high_alert("alert-1")]);
        let approver = CountingApprover::new(false);
        let cancel = CancellationToken::new();

        let decision = preflight_gate(&layout, false, &approver, &cancel)
            .await
            .unwrap();
        assert!(matches!(decision, GateDecision::Denied));
    }

    #[tokio::test]
    async fn test_gate_auto_approve_bypasses_approver() {
        let (_dir, layout) = layout_with_inbox(&[high_alert("alert-1")]);
        let approver = CountingApprover::new(false);
        let cancel = CancellationToken::new();

        let decision = preflight_gate(&layout, true, &approver, &cancel)
            .await
            .unwrap();
        assert!(matches!(decision, GateDecision::Proceed(_)));
        assert_eq!(approver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gate_scan_error_fails_closed() {
        let (_dir, layout) = layout_with_inbox(&[]);
        std::fs::write(layout.inbox_dir().join("broken.md"), "garbage").unwrap();
        let approver = CountingApprover::new(true);
        let cancel = CancellationToken::new();

        let result = preflight_gate(&layout, false, &approver, &cancel).await;
        assert!(result.is_err());
        assert_eq!(approver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gate_message_lists_items() {
        struct MessageCheck(AtomicBool);
        #[async_trait]
        impl Approver for MessageCheck {
            async fn request_approval(
                &self,
                _cancel: &CancellationToken,
                message: &str,
            ) -> Result<bool> {
                self.0.store(
                    message.contains("alert-1") && message.contains("something urgent"),
                    Ordering::SeqCst,
                );
                Ok(true)
            }
        }

        let (_dir, layout) = layout_with_inbox(&[high_alert("alert-1")]);
        let approver = MessageCheck(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        preflight_gate(&layout, false, &approver, &cancel)
            .await
            .unwrap();
        assert!(approver.0.load(Ordering::SeqCst));
    }

    #[test]
    fn test_send_then_gate_sees_nothing_in_outbox() {
        // Outbox traffic must never arm the gate; only inbox items count.
        let (_dir, layout) = layout_with_inbox(&[]);
        send_dmail(&layout, &high_alert("outgoing")).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let decision = rt
            .block_on(preflight_gate(
                &layout,
                false,
                &CountingApprover::new(false),
                &CancellationToken::new(),
            ))
            .unwrap();
        assert!(matches!(decision, GateDecision::Proceed(d) if d.is_empty()));
    }
}
