//! D-Mail: YAML-framed message files passed between operators, the loop,
//! and the agent through the continent's inbox/outbox/archive queues.

pub mod approve;
pub mod bus;
pub mod gate;
pub mod model;

pub use approve::{Approver, AutoApprover, CommandApprover, StdinApprover};
pub use bus::{archive_inbox_dmail, scan_inbox, send_dmail};
pub use gate::{preflight_gate, GateDecision};
pub use model::{DMail, SEVERITY_HIGH};
