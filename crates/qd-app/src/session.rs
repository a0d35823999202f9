//! What a front-end does when the user presses "start".

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use qd_config::{QuanticsConfig, save_config, validate_config};
use qd_platform::{JobSettings, ProcessId, SubmitRequest};
use qd_records::{CalcStatus, Calculation};

use crate::capability::{Capabilities, ResolvedMode};
use crate::error::{AppError, AppResult};
use crate::local_runner::{CreateRequest, DB_COPY_DIR, LocalRunner, RunnerOptions};
use crate::progress::RunnerEvent;
use crate::result_tree::{ResultEntry, scan_results};

/// File the session writes its configuration to inside the working directory.
pub const SAVED_CONFIG_NAME: &str = "quantics_config.json";

#[derive(Debug, Clone)]
pub struct LocalOutcome {
    pub calculation: Calculation,
    pub success: bool,
    pub analysis: BTreeMap<String, String>,
    pub saved_config: Option<PathBuf>,
    pub results: Option<ResultEntry>,
}

#[derive(Debug, Clone)]
pub enum LaunchOutcome {
    Local(Box<LocalOutcome>),
    Submitted { pk: ProcessId },
}

pub struct Session<'a> {
    config: &'a QuanticsConfig,
    capabilities: &'a Capabilities,
}

impl<'a> Session<'a> {
    pub fn new(config: &'a QuanticsConfig, capabilities: &'a Capabilities) -> Self {
        Self {
            config,
            capabilities,
        }
    }

    /// Validate and start the configured calculation. Log lines go to `sink`.
    pub fn launch(&self, sink: &mut dyn FnMut(String)) -> AppResult<LaunchOutcome> {
        validate_config(self.config)?;
        match self.capabilities.resolve_mode(self.config.execution_mode)? {
            ResolvedMode::Local => self
                .launch_local(sink)
                .map(|outcome| LaunchOutcome::Local(Box::new(outcome))),
            ResolvedMode::Platform => self.submit(sink),
        }
    }

    fn launch_local(&self, sink: &mut dyn FnMut(String)) -> AppResult<LocalOutcome> {
        let config = self.config;
        let mut runner = LocalRunner::open_with_options(
            config.runner_base(),
            RunnerOptions {
                analysis_bin_dir: config.analysis_bin_dir.clone(),
            },
        )?;

        let (inp_file, op_file) = required_inputs(config)?;
        let calc = runner.create_calculation(CreateRequest {
            name: config.calculation_name.clone(),
            inp_file,
            op_file,
            workflow_type: config.workflow_type,
            db_folder: config.db_folder.clone(),
        })?;
        let name = calc.name.clone();
        sink("=== Starting QUANTICS Calculation ===".to_string());
        sink(format!("Calculation name: {}", name));
        sink(format!("Workflow type: {}", calc.workflow_type));

        let success = runner.run_calculation_with_progress(
            &name,
            &config.quantics_executable,
            Some(&mut |event: RunnerEvent| sink(event.log_line())),
        )?;

        let mut analysis = BTreeMap::new();
        if success {
            sink("=== Calculation completed successfully ===".to_string());
            if !config.analysis_tools.is_empty() {
                sink("Starting analysis...".to_string());
                let params = config.analysis_params();
                analysis = runner.run_analysis_with_progress(
                    &name,
                    &config.analysis_tools,
                    Some(&params),
                    Some(&mut |event: RunnerEvent| sink(event.log_line())),
                )?;
                sink("Analysis completed".to_string());
            }
        } else {
            sink("=== Calculation failed ===".to_string());
        }

        let calculation = runner
            .get_calculation(&name)
            .cloned()
            .ok_or_else(|| AppError::CalculationNotFound(name.clone()))?;

        let saved_config = if config.save_inputs {
            let path = calculation.working_directory.join(SAVED_CONFIG_NAME);
            Some(save_config(config, Some(&path))?)
        } else {
            None
        };

        if config.cleanup_on_success && calculation.status == CalcStatus::Completed {
            let db_copy = calculation.working_directory.join(DB_COPY_DIR);
            if db_copy.exists() {
                fs::remove_dir_all(&db_copy)?;
                sink(format!("Removed {}", db_copy.display()));
            }
        }

        let browse_root = calculation
            .results
            .output_directory
            .as_deref()
            .filter(|dir| dir.is_dir())
            .unwrap_or(&calculation.working_directory);
        let results = scan_results(browse_root);
        Ok(LocalOutcome {
            calculation,
            success,
            analysis,
            saved_config,
            results,
        })
    }

    fn submit(&self, sink: &mut dyn FnMut(String)) -> AppResult<LaunchOutcome> {
        let config = self.config;
        let handle = self.capabilities.platform().ok_or_else(|| AppError::Setup {
            message: "workflow platform not available".to_string(),
        })?;
        let (inp_file, op_file) = required_inputs(config)?;

        let request = SubmitRequest {
            label: Some(config.calculation_name.trim().to_string()),
            inp_file,
            op_file,
            workflow_type: config.workflow_type,
            db_folder: config.db_folder.clone(),
            run_analysis: !config.analysis_tools.is_empty(),
            analysis_params: config.analysis_params(),
            job: JobSettings {
                num_mpiprocs: config.aiida_resources,
                max_wallclock_seconds: config.aiida_walltime,
                queue_name: config.aiida_queue.clone(),
            },
        };
        let pk = handle.adapter.submit_calculation(request)?;
        sink(format!("Submitted calculation to workflow platform with PK: {}", pk));
        Ok(LaunchOutcome::Submitted { pk })
    }
}

fn required_inputs(config: &QuanticsConfig) -> AppResult<(PathBuf, PathBuf)> {
    match (&config.inp_file, &config.op_file) {
        (Some(inp), Some(op)) => Ok((inp.clone(), op.clone())),
        _ => Err(AppError::InvalidInput(
            "both an .inp and an .op file are required".to_string(),
        )),
    }
}
