//! The expedition runner: one end-to-end supervised agent invocation,
//! its watchers, and the post-run state updates.

pub mod expedition;
pub mod notify;
pub mod prompt;
pub mod review;
pub mod sinks;
pub mod watchers;

pub use expedition::{Expedition, ExpeditionEnv, ExpeditionOutcome};
pub use notify::{LogNotifier, Notifier};
pub use prompt::{build_prompt, prompt_file_name, PromptData};
pub use review::{run_review_loop, summarize_review, ReviewContext, MAX_REVIEW_CYCLES};
