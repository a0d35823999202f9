//! Calculation record types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use qd_core::{ParsedOutput, WorkflowType};
use serde::{Deserialize, Serialize};

use crate::{RecordsError, RecordsResult};

/// Output files QUANTICS may leave in its output directory.
pub const KNOWN_OUTPUT_FILES: [&str; 4] = ["log", "output", "auto", "psi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalcStatus {
    #[default]
    Created,
    Running,
    Completed,
    Failed,
}

impl CalcStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CalcStatus::Created => "created",
            CalcStatus::Running => "running",
            CalcStatus::Completed => "completed",
            CalcStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CalcStatus::Completed | CalcStatus::Failed)
    }

    /// Completed and failed records may start another run; a running one
    /// may not.
    pub fn can_transition_to(self, next: CalcStatus) -> bool {
        use CalcStatus::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Completed, Running)
                | (Failed, Running)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for CalcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run and its analysis left behind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalcResults {
    /// Directory name from the input's `name =` directive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ParsedOutput>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub analysis: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub analysis_with_params: BTreeMap<String, String>,
    /// Keys written by other tools; preserved untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
    pub name: String,
    pub inp_file: PathBuf,
    pub op_file: PathBuf,
    #[serde(default)]
    pub db_folder: Option<PathBuf>,
    #[serde(default)]
    pub workflow_type: WorkflowType,
    pub working_directory: PathBuf,
    #[serde(default)]
    pub status: CalcStatus,
    #[serde(default)]
    pub start_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub results: CalcResults,
}

impl Calculation {
    /// New record in `created`. The database folder is only kept for
    /// workflows that use one.
    pub fn new(
        name: impl Into<String>,
        inp_file: PathBuf,
        op_file: PathBuf,
        workflow_type: WorkflowType,
        db_folder: Option<PathBuf>,
        working_directory: PathBuf,
    ) -> Self {
        Self {
            name: name.into(),
            inp_file,
            op_file,
            db_folder: db_folder.filter(|_| workflow_type.requires_db_folder()),
            workflow_type,
            working_directory,
            status: CalcStatus::Created,
            start_time: None,
            end_time: None,
            results: CalcResults::default(),
        }
    }

    pub fn transition(&mut self, next: CalcStatus) -> RecordsResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(RecordsError::InvalidTransition {
                name: self.name.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Enter `running` and stamp the start time.
    pub fn begin_run(&mut self, now: DateTime<Local>) -> RecordsResult<()> {
        self.transition(CalcStatus::Running)?;
        self.start_time = Some(now);
        self.end_time = None;
        Ok(())
    }

    /// Leave `running` for `completed` or `failed` and stamp the end time.
    pub fn finish(&mut self, success: bool, now: DateTime<Local>) -> RecordsResult<()> {
        let next = if success {
            CalcStatus::Completed
        } else {
            CalcStatus::Failed
        };
        self.transition(next)?;
        self.end_time = Some(now);
        Ok(())
    }

    /// Start time for status tables.
    pub fn start_time_label(&self) -> String {
        self.start_time
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Not started".to_string())
    }
}
