//! Contract between the adapter and a workflow engine.

pub mod directory;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use qd_core::{AnalysisParams, ParsedOutput, WorkflowType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::{FolderData, SinglefileData};
use crate::error::PlatformResult;
use crate::workchain::JobOptions;

pub type ProcessId = u64;

/// Scheduler family name used by SGE-managed computers.
pub const SCHEDULER_SGE: &str = "core.sge";
pub const SCHEDULER_DIRECT: &str = "core.direct";

/// A registered executable on a computer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    pub label: String,
    pub computer: String,
    pub executable: PathBuf,
    #[serde(default = "default_scheduler")]
    pub scheduler: String,
    /// Shell lines run before the executable, e.g. module loads.
    #[serde(default)]
    pub prepend_text: String,
}

fn default_scheduler() -> String {
    SCHEDULER_DIRECT.to_string()
}

impl Code {
    /// `label@computer`.
    pub fn full_label(&self) -> String {
        format!("{}@{}", self.label, self.computer)
    }

    pub fn uses_sge(&self) -> bool {
        self.scheduler == SCHEDULER_SGE
    }

    /// Matches either the full label or the bare label.
    pub fn matches_label(&self, label: &str) -> bool {
        self.full_label() == label || self.label == label
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Created,
    Waiting,
    Running,
    Finished,
    Excepted,
    Killed,
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Created => "created",
            ProcessState::Waiting => "waiting",
            ProcessState::Running => "running",
            ProcessState::Finished => "finished",
            ProcessState::Excepted => "excepted",
            ProcessState::Killed => "killed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessState::Finished | ProcessState::Excepted | ProcessState::Killed
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOutputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation_results: Option<ParsedOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_results: Option<BTreeMap<String, String>>,
    /// Relative file names in the retrieved output folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_folder: Option<Vec<String>>,
}

impl ProcessOutputs {
    pub fn is_empty(&self) -> bool {
        self.calculation_results.is_none()
            && self.analysis_results.is_none()
            && self.output_folder.is_none()
    }
}

/// Persisted view of one submitted workchain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessNode {
    pub pk: ProcessId,
    pub uuid: Uuid,
    #[serde(default)]
    pub label: Option<String>,
    pub process_state: ProcessState,
    pub ctime: DateTime<Local>,
    pub mtime: DateTime<Local>,
    #[serde(default)]
    pub exit_status: Option<i32>,
    #[serde(default)]
    pub exit_message: Option<String>,
    #[serde(default)]
    pub outputs: ProcessOutputs,
    #[serde(default)]
    pub report: Vec<String>,
}

impl ProcessNode {
    pub fn new(pk: ProcessId, label: Option<String>) -> Self {
        let now = Local::now();
        Self {
            pk,
            uuid: Uuid::new_v4(),
            label,
            process_state: ProcessState::Created,
            ctime: now,
            mtime: now,
            exit_status: None,
            exit_message: None,
            outputs: ProcessOutputs::default(),
            report: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.process_state == ProcessState::Finished
    }

    pub fn is_finished_ok(&self) -> bool {
        self.is_finished() && self.exit_status == Some(0)
    }
}

/// Everything needed to run the QUANTICS workchain once.
#[derive(Debug, Clone)]
pub struct WorkflowSubmission {
    pub label: Option<String>,
    pub code: Code,
    pub inp_file: SinglefileData,
    pub op_file: SinglefileData,
    pub workflow_type: WorkflowType,
    pub db_folder: Option<FolderData>,
    /// Tools run after a successful simulation; empty skips analysis.
    pub analysis_tools: Vec<String>,
    pub analysis_params: AnalysisParams,
    pub options: JobOptions,
}

pub trait WorkflowEngine: Send + Sync {
    fn load_code(&self, label: &str) -> PlatformResult<Code>;

    /// Codes whose label contains `pattern`.
    fn find_codes(&self, pattern: &str) -> PlatformResult<Vec<Code>>;

    fn submit(&self, submission: WorkflowSubmission) -> PlatformResult<ProcessId>;

    fn load_process(&self, pk: ProcessId) -> PlatformResult<ProcessNode>;

    /// Newest first, at most `limit`.
    fn recent_processes(&self, limit: usize) -> PlatformResult<Vec<ProcessNode>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_labels() {
        let code = Code {
            label: "quantics".to_string(),
            computer: "localhost".to_string(),
            executable: PathBuf::from("/opt/quantics/bin/quantics"),
            scheduler: SCHEDULER_DIRECT.to_string(),
            prepend_text: String::new(),
        };
        assert_eq!(code.full_label(), "quantics@localhost");
        assert!(code.matches_label("quantics"));
        assert!(code.matches_label("quantics@localhost"));
        assert!(!code.matches_label("quantics@hartree"));
        assert!(!code.uses_sge());
    }

    #[test]
    fn terminal_states() {
        assert!(ProcessState::Finished.is_terminal());
        assert!(ProcessState::Excepted.is_terminal());
        assert!(ProcessState::Killed.is_terminal());
        assert!(!ProcessState::Waiting.is_terminal());
        assert!(!ProcessState::Running.is_terminal());
    }

    #[test]
    fn finished_ok_needs_zero_exit() {
        let mut node = ProcessNode::new(1, None);
        node.process_state = ProcessState::Finished;
        node.exit_status = Some(400);
        assert!(node.is_finished());
        assert!(!node.is_finished_ok());
        node.exit_status = Some(0);
        assert!(node.is_finished_ok());
    }
}
