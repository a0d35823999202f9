//! Configuration schema.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use qd_core::{AnalysisParams, CoreError, WorkflowType};
use serde::{Deserialize, Serialize};

/// Where a configured calculation is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Local,
    /// Submit to the workflow-management platform.
    #[serde(rename = "aiida", alias = "platform")]
    Platform,
    /// Use the platform when it is available, otherwise run locally.
    Auto,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Local => "local",
            ExecutionMode::Platform => "aiida",
            ExecutionMode::Auto => "auto",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ExecutionMode::Local),
            "aiida" | "platform" => Ok(ExecutionMode::Platform),
            "auto" => Ok(ExecutionMode::Auto),
            _ => Err(CoreError::UnknownMode {
                value: s.to_string(),
            }),
        }
    }
}

/// Every option a front-end collects for one calculation.
///
/// Keys are flat so the file stays hand-editable. Absent keys take the
/// defaults from [`QuanticsConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuanticsConfig {
    pub calculation_name: String,
    pub workflow_type: WorkflowType,
    pub quantics_executable: PathBuf,
    /// Overrides the runner's base directory for sessions.
    pub working_directory: Option<PathBuf>,
    pub base_directory: Option<PathBuf>,
    pub inp_file: Option<PathBuf>,
    pub op_file: Option<PathBuf>,
    pub db_folder: Option<PathBuf>,
    /// Write a copy of this configuration into the working directory.
    pub save_inputs: bool,
    /// Remove the copied database folder after a successful run.
    pub cleanup_on_success: bool,
    pub analysis_tools: Vec<String>,
    pub rdgpop_nz: String,
    pub rdgpop_dof: String,
    pub show_cmdline: bool,
    pub execution_mode: ExecutionMode,
    /// Process count requested from the platform scheduler.
    pub aiida_resources: u32,
    /// Wall-clock budget passed to the platform scheduler, in seconds.
    pub aiida_walltime: u64,
    pub aiida_queue: Option<String>,
    pub aiida_code_label: Option<String>,
    /// Root directory of the bundled workflow engine's store.
    pub aiida_store: Option<PathBuf>,
    /// Directory holding the analysis executables, when not on PATH.
    pub analysis_bin_dir: Option<PathBuf>,
}

impl Default for QuanticsConfig {
    fn default() -> Self {
        let params = AnalysisParams::default();
        Self {
            calculation_name: "my_quantics_run".to_string(),
            workflow_type: WorkflowType::Mctdh,
            quantics_executable: PathBuf::from("quantics"),
            working_directory: None,
            base_directory: None,
            inp_file: None,
            op_file: None,
            db_folder: None,
            save_inputs: true,
            cleanup_on_success: false,
            analysis_tools: Vec::new(),
            rdgpop_nz: params.rdgpop_nz,
            rdgpop_dof: params.rdgpop_dof,
            show_cmdline: params.show_cmdline,
            execution_mode: ExecutionMode::Local,
            aiida_resources: 1,
            aiida_walltime: 3600,
            aiida_queue: None,
            aiida_code_label: None,
            aiida_store: None,
            analysis_bin_dir: None,
        }
    }
}

impl QuanticsConfig {
    pub fn analysis_params(&self) -> AnalysisParams {
        AnalysisParams {
            rdgpop_nz: self.rdgpop_nz.clone(),
            rdgpop_dof: self.rdgpop_dof.clone(),
            show_cmdline: self.show_cmdline,
        }
    }

    /// Runner base directory: `base_directory`, else `working_directory`.
    pub fn runner_base(&self) -> Option<PathBuf> {
        self.base_directory
            .clone()
            .or_else(|| self.working_directory.clone())
    }
}
