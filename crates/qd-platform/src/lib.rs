//! qd-platform: submission to a workflow-management platform.
//!
//! Contains:
//! - engine (the contract a platform must satisfy + the file-backed `DirectoryEngine`)
//! - data (immutable file and folder handles)
//! - workchain (workflow tools, resource shapes, the run script)
//! - adapter (front-end facing operations with error-tagged replies)
//! - monitor (poll-based status watching)

pub mod adapter;
pub mod data;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod workchain;

pub use adapter::{
    CODE_LABEL_CANDIDATES, CalculationResults, PlatformAdapter, PlatformReply, ProcessStatus,
    SubmitRequest,
};
pub use data::{FolderData, SinglefileData};
pub use engine::directory::DirectoryEngine;
pub use engine::{
    Code, ProcessId, ProcessNode, ProcessOutputs, ProcessState, WorkflowEngine,
    WorkflowSubmission,
};
pub use error::{PlatformError, PlatformResult};
pub use monitor::{DEFAULT_POLL_INTERVAL, MonitorEvent, StatusMonitor};
pub use workchain::{JobOptions, JobSettings, ResourceRequest};
