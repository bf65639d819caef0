//! Shared domain types and error taxonomy for the expedition loop.

pub mod error;
pub mod types;

pub use error::AppError;
pub use types::{
    ExpeditionReport, ExpeditionStatus, Lumina, LuminaSource, MissionType, COMPLETE_MARKER,
    REPORT_END_MARKER, REPORT_START_MARKER,
};
