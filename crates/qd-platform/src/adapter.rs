//! Front-end facing platform operations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use qd_core::{AnalysisParams, ParsedOutput, WorkflowType};
use serde::{Deserialize, Serialize};

use crate::data::{FolderData, SinglefileData};
use crate::engine::{
    Code, ProcessId, ProcessNode, ProcessState, WorkflowEngine, WorkflowSubmission,
};
use crate::error::{PlatformError, PlatformResult};
use crate::workchain::{JobOptions, JobSettings, workflow_tools};

/// Code labels tried, in order, when none is configured or the configured
/// one does not exist.
pub const CODE_LABEL_CANDIDATES: [&str; 3] = [
    "quantics-hartree-fixed@hartree",
    "quantics-hartree@hartree",
    "quantics@localhost",
];

pub const SETUP_INSTRUCTIONS: &str = "No QUANTICS code found. Register one with: \
    qd-cli platform setup-code --label quantics --computer localhost --executable /path/to/quantics";

/// A value or an error message, serialised as `{"error": ...}` on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlatformReply<T> {
    Error { error: String },
    Ok(T),
}

impl<T> PlatformReply<T> {
    pub fn error(message: impl Into<String>) -> Self {
        PlatformReply::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PlatformReply::Error { .. })
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            PlatformReply::Ok(value) => Ok(value),
            PlatformReply::Error { error } => Err(error),
        }
    }
}

impl<T> From<PlatformResult<T>> for PlatformReply<T> {
    fn from(result: PlatformResult<T>) -> Self {
        match result {
            Ok(value) => PlatformReply::Ok(value),
            Err(e) => PlatformReply::error(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub pk: ProcessId,
    pub label: String,
    pub state: ProcessState,
    pub created: DateTime<Local>,
    /// Last modification time, only once the process has finished.
    pub finished: Option<DateTime<Local>>,
    pub exit_status: Option<i32>,
    pub has_outputs: bool,
}

impl From<&ProcessNode> for ProcessStatus {
    fn from(node: &ProcessNode) -> Self {
        Self {
            pk: node.pk,
            label: node
                .label
                .clone()
                .unwrap_or_else(|| format!("QUANTICS_{}", node.pk)),
            state: node.process_state,
            created: node.ctime,
            finished: node.is_finished().then_some(node.mtime),
            exit_status: node.exit_status,
            has_outputs: !node.outputs.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation: Option<ParsedOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_files: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub label: Option<String>,
    pub inp_file: PathBuf,
    pub op_file: PathBuf,
    pub workflow_type: WorkflowType,
    pub db_folder: Option<PathBuf>,
    pub run_analysis: bool,
    pub analysis_params: AnalysisParams,
    pub job: JobSettings,
}

impl SubmitRequest {
    pub fn new(inp_file: PathBuf, op_file: PathBuf, workflow_type: WorkflowType) -> Self {
        Self {
            label: None,
            inp_file,
            op_file,
            workflow_type,
            db_folder: None,
            run_analysis: true,
            analysis_params: AnalysisParams::default(),
            job: JobSettings::default(),
        }
    }
}

pub struct PlatformAdapter {
    engine: Arc<dyn WorkflowEngine>,
    code: Option<Code>,
}

impl PlatformAdapter {
    /// Bind to `engine` and resolve the QUANTICS code to run with.
    pub fn new(engine: Arc<dyn WorkflowEngine>, code_label: Option<&str>) -> Self {
        let code = resolve_code(engine.as_ref(), code_label);
        match &code {
            Some(code) => tracing::info!(code = %code.full_label(), "using QUANTICS code"),
            None => tracing::warn!("{}", SETUP_INSTRUCTIONS),
        }
        Self { engine, code }
    }

    pub fn code(&self) -> Option<&Code> {
        self.code.as_ref()
    }

    pub fn is_configured(&self) -> bool {
        self.code.is_some()
    }

    pub fn engine(&self) -> &Arc<dyn WorkflowEngine> {
        &self.engine
    }

    pub fn submit_calculation(&self, request: SubmitRequest) -> PlatformResult<ProcessId> {
        let code = self.code.clone().ok_or_else(|| PlatformError::Setup {
            message: SETUP_INSTRUCTIONS.to_string(),
        })?;

        let inp_file = SinglefileData::from_path(&request.inp_file)?;
        let op_file = SinglefileData::from_path(&request.op_file)?;
        let db_folder = match &request.db_folder {
            Some(dir) if dir.is_dir() => Some(FolderData::from_dir(dir)?),
            Some(dir) => {
                tracing::warn!(
                    path = %dir.display(),
                    "database folder does not exist, not attached"
                );
                None
            }
            None => None,
        };
        let analysis_tools = if request.run_analysis {
            workflow_tools(request.workflow_type)
        } else {
            Vec::new()
        };
        let options = JobOptions::build(&code, &request.job);

        let submission = WorkflowSubmission {
            label: request.label,
            code,
            inp_file,
            op_file,
            workflow_type: request.workflow_type,
            db_folder,
            analysis_tools,
            analysis_params: request.analysis_params,
            options,
        };
        let pk = self.engine.submit(submission)?;
        tracing::info!(pk, "submitted QUANTICS calculation");
        Ok(pk)
    }

    pub fn get_calculation_status(&self, pk: ProcessId) -> PlatformReply<ProcessStatus> {
        self.engine
            .load_process(pk)
            .map(|node| ProcessStatus::from(&node))
            .into()
    }

    pub fn get_calculation_results(&self, pk: ProcessId) -> PlatformReply<CalculationResults> {
        let node = match self.engine.load_process(pk) {
            Ok(node) => node,
            Err(e) => return PlatformReply::error(e.to_string()),
        };
        if !node.is_finished_ok() {
            return PlatformReply::error("Calculation not completed successfully");
        }
        PlatformReply::Ok(CalculationResults {
            calculation: node.outputs.calculation_results,
            analysis: node.outputs.analysis_results,
            output_files: node.outputs.output_folder,
        })
    }

    pub fn list_calculations(&self, limit: usize) -> PlatformReply<Vec<ProcessStatus>> {
        self.engine
            .recent_processes(limit)
            .map(|nodes| nodes.iter().map(ProcessStatus::from).collect())
            .into()
    }
}

fn resolve_code(engine: &dyn WorkflowEngine, code_label: Option<&str>) -> Option<Code> {
    for label in code_label.into_iter().chain(CODE_LABEL_CANDIDATES) {
        match engine.load_code(label) {
            Ok(code) => return Some(code),
            Err(PlatformError::CodeNotFound { .. }) => continue,
            Err(e) => tracing::warn!(label, error = %e, "code lookup failed"),
        }
    }
    match engine.find_codes("quantics") {
        Ok(codes) => {
            for code in &codes {
                tracing::info!(code = %code.full_label(), "available QUANTICS code");
            }
            codes.into_iter().next()
        }
        Err(e) => {
            tracing::warn!(error = %e, "code search failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_serialises_error_tag() {
        let reply: PlatformReply<u32> = PlatformReply::error("boom");
        assert_eq!(serde_json::to_string(&reply).unwrap(), r#"{"error":"boom"}"#);
        assert_eq!(reply.into_result(), Err("boom".to_string()));

        let ok: PlatformReply<u32> = PlatformReply::Ok(7);
        assert_eq!(serde_json::to_string(&ok).unwrap(), "7");
    }

    #[test]
    fn status_label_defaults_to_pk() {
        let node = ProcessNode::new(12, None);
        let status = ProcessStatus::from(&node);
        assert_eq!(status.label, "QUANTICS_12");
        assert_eq!(status.finished, None);
        assert!(!status.has_outputs);
    }
}
