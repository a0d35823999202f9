//! Shared application service layer for the QUANTICS front-ends.
//!
//! The CLI and any graphical front-end go through this crate for the local
//! calculation lifecycle, analysis tools, execution-mode resolution and
//! result browsing.

pub mod analysis;
pub mod capability;
pub mod error;
pub mod local_runner;
pub mod progress;
pub mod result_tree;
pub mod session;

// Re-export key types for convenience
pub use analysis::ToolOutcome;
pub use capability::{Capabilities, PlatformHandle, ResolvedMode};
pub use error::{AppError, AppResult};
pub use local_runner::{
    CreateRequest, LocalRunner, RunnerOptions, StatusRow, default_analysis_tools,
};
pub use progress::{RunnerEvent, RunnerStage};
pub use result_tree::{EntryKind, ResultEntry, human_size, scan_results};
pub use session::{LaunchOutcome, LocalOutcome, SAVED_CONFIG_NAME, Session};
