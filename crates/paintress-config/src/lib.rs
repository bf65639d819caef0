//! Run configuration, project config (`config.yaml`), and the on-disk
//! `.expedition/` layout of a continent.

pub mod config;
pub mod layout;
pub mod logging;

pub use config::{Config, OutputMode, ProjectConfig};
pub use layout::{ensure_gitignore_entries, ContinentLayout, MANAGED_GITIGNORE_ENTRIES};
pub use logging::{init_logging, quiet_from_env};
