//! Local calculation lifecycle.
//!
//! Calculations are addressed by name. Usage errors (unknown or duplicate
//! names) are returned as `Err`. Failures of the environment (missing
//! executables, copy errors) are logged and reported as `Ok(false)`, with
//! the record moved to `failed` once a run has started.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Instant;

use chrono::Local;
use qd_core::{
    AnalysisParams, AnalysisTool, NAME_DIRECTIVE, OPNAME_DIRECTIVE, WorkflowType,
    parse_quantics_output, read_directive,
};
use qd_records::{CalcStatus, Calculation, KNOWN_OUTPUT_FILES, Registry, RegistryStore};
use serde::Serialize;
use walkdir::WalkDir;

use crate::analysis::{self, ToolOutcome};
use crate::error::{AppError, AppResult};
use crate::progress::{RunnerEvent, RunnerStage, emit_progress};

pub const DEFAULT_BASE_DIR_NAME: &str = ".quantics_local";
pub const RUNS_DIR: &str = "runs";
pub const INPUT_FILE_NAME: &str = "input.inp";
pub const LOG_FILE_NAME: &str = "quantics.log";
pub const DB_COPY_DIR: &str = "db_data";
pub const FALLBACK_OP_FILE_NAME: &str = "operator.op";

/// Options that apply to every calculation a runner handles.
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Directory holding the analysis executables, when not on PATH.
    pub analysis_bin_dir: Option<PathBuf>,
}

/// Request to register a new calculation.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub inp_file: PathBuf,
    pub op_file: PathBuf,
    pub workflow_type: WorkflowType,
    pub db_folder: Option<PathBuf>,
}

/// One line of a status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub name: String,
    pub status: CalcStatus,
    pub workflow_type: WorkflowType,
    pub start_time: String,
}

/// Tools offered for `workflow`.
pub fn default_analysis_tools(workflow: WorkflowType) -> Vec<String> {
    workflow
        .analysis_tools()
        .iter()
        .map(|t| t.to_string())
        .collect()
}

pub struct LocalRunner {
    base_directory: PathBuf,
    runs_directory: PathBuf,
    store: RegistryStore,
    registry: Registry,
    options: RunnerOptions,
}

impl LocalRunner {
    /// `~/.quantics_local`.
    pub fn default_base_directory() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_BASE_DIR_NAME)
    }

    pub fn open(base_directory: Option<PathBuf>) -> AppResult<Self> {
        Self::open_with_options(base_directory, RunnerOptions::default())
    }

    /// Create the base and runs directories if needed and load the registry.
    /// An unreadable registry is logged and replaced by an empty one.
    pub fn open_with_options(
        base_directory: Option<PathBuf>,
        options: RunnerOptions,
    ) -> AppResult<Self> {
        let base_directory =
            std::path::absolute(base_directory.unwrap_or_else(Self::default_base_directory))?;
        let runs_directory = base_directory.join(RUNS_DIR);
        fs::create_dir_all(&runs_directory)?;

        let store = RegistryStore::in_dir(&base_directory);
        let registry = match store.load() {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!(
                    path = %store.path().display(),
                    error = %e,
                    "could not read calculation registry, starting empty"
                );
                Registry::new()
            }
        };
        tracing::debug!(
            base = %base_directory.display(),
            calculations = registry.len(),
            "local runner ready"
        );

        Ok(Self {
            base_directory,
            runs_directory,
            store,
            registry,
            options,
        })
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub fn runs_directory(&self) -> &Path {
        &self.runs_directory
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    fn persist(&self) -> AppResult<()> {
        self.store.save(&self.registry)?;
        Ok(())
    }

    /// Persist inside a run, where failures are reported as `false`.
    fn persist_logged(&self, name: &str) -> bool {
        match self.persist() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(name, error = %e, "could not save calculation registry");
                false
            }
        }
    }

    pub fn create_calculation(&mut self, request: CreateRequest) -> AppResult<Calculation> {
        let name = request.name.trim().to_string();
        check_name(&name)?;
        if self.registry.contains(&name) {
            return Err(AppError::DuplicateName(name));
        }

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let working_directory = self.runs_directory.join(format!("{}_{}", name, timestamp));
        fs::create_dir_all(&working_directory).map_err(|source| AppError::FileWrite {
            path: working_directory.clone(),
            source,
        })?;

        let db_folder = request.db_folder.map(std::path::absolute).transpose()?;
        let calc = Calculation::new(
            name,
            std::path::absolute(&request.inp_file)?,
            std::path::absolute(&request.op_file)?,
            request.workflow_type,
            db_folder,
            working_directory,
        );
        self.registry.insert_new(calc.clone())?;
        self.persist()?;
        tracing::info!(
            name = %calc.name,
            workflow = %calc.workflow_type,
            dir = %calc.working_directory.display(),
            "created calculation"
        );
        Ok(calc)
    }

    /// Copy inputs into the working directory. The operator file is named
    /// after the input's `opname` directive.
    pub fn prepare_calculation(&self, name: &str) -> AppResult<bool> {
        let calc = self.registry.require(name)?;
        match prepare_inputs(calc) {
            Ok(op_file_name) => {
                tracing::info!(name, op_file = %op_file_name, "input files prepared");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(name, error = %e, "failed to prepare calculation");
                Ok(false)
            }
        }
    }

    pub fn run_calculation(&mut self, name: &str, executable: &Path) -> AppResult<bool> {
        self.run_calculation_with_progress(name, executable, None)
    }

    /// Run the simulation to completion, streaming progress events.
    pub fn run_calculation_with_progress(
        &mut self,
        name: &str,
        executable: &Path,
        mut progress_cb: Option<&mut dyn FnMut(RunnerEvent)>,
    ) -> AppResult<bool> {
        let started = Instant::now();
        if self.registry.require(name)?.status == CalcStatus::Running {
            tracing::warn!(name, "calculation is already running");
            return Ok(false);
        }

        emit_progress(
            &mut progress_cb,
            RunnerStage::Preparing,
            name,
            None,
            started,
            "Preparing input files",
        );
        if !self.prepare_calculation(name)? {
            emit_progress(
                &mut progress_cb,
                RunnerStage::Failed,
                name,
                None,
                started,
                "Failed to prepare input files",
            );
            return Ok(false);
        }

        let calc = self.registry.require_mut(name)?;
        calc.begin_run(Local::now())?;
        let working_directory = calc.working_directory.clone();
        if let Err(e) = self.persist() {
            tracing::error!(name, error = %e, "could not record calculation start");
            self.registry.require_mut(name)?.finish(false, Local::now())?;
            self.persist_logged(name);
            emit_progress(
                &mut progress_cb,
                RunnerStage::Failed,
                name,
                None,
                started,
                "Calculation failed",
            );
            return Ok(false);
        }

        let command_line = format!("{} -mnd {}", executable.display(), INPUT_FILE_NAME);
        tracing::info!(
            name,
            dir = %working_directory.display(),
            command = %command_line,
            "starting calculation"
        );
        emit_progress(
            &mut progress_cb,
            RunnerStage::Running,
            name,
            None,
            started,
            format!("Running {}", command_line),
        );

        let outcome = launch(executable, &working_directory);

        let calc = self.registry.require_mut(name)?;
        let success = match outcome {
            Ok(status) if status.success() => {
                calc.finish(true, Local::now())?;
                tracing::info!(name, "calculation completed successfully");
                emit_progress(
                    &mut progress_cb,
                    RunnerStage::DiscoveringOutputs,
                    name,
                    None,
                    started,
                    "Checking output files",
                );
                discover_outputs(calc);
                true
            }
            Ok(status) => {
                calc.finish(false, Local::now())?;
                tracing::warn!(
                    name,
                    code = ?status.code(),
                    log = %working_directory.join(LOG_FILE_NAME).display(),
                    "calculation failed"
                );
                false
            }
            Err(e) => {
                calc.finish(false, Local::now())?;
                tracing::error!(name, error = %e, "error while running calculation");
                false
            }
        };
        // the record is terminal in memory either way
        let success = self.persist_logged(name) && success;

        let (stage, message) = if success {
            (RunnerStage::Completed, "Calculation completed successfully")
        } else {
            (RunnerStage::Failed, "Calculation failed")
        };
        emit_progress(&mut progress_cb, stage, name, None, started, message);
        Ok(success)
    }

    /// Output directory of a calculation: the cached discovery result, else
    /// re-derived from the working copy of the input file.
    pub fn output_directory(&self, name: &str) -> AppResult<PathBuf> {
        let calc = self.registry.require(name)?;
        let output_name = match &calc.results.output_name {
            Some(cached) => cached.clone(),
            None => resolve_output_name(calc),
        };
        Ok(calc.working_directory.join(output_name))
    }

    /// Run `tools` with default parameters; results land in `analysis`.
    pub fn run_analysis(
        &mut self,
        name: &str,
        tools: &[String],
    ) -> AppResult<BTreeMap<String, String>> {
        self.run_analysis_with_progress(name, tools, None, None)
    }

    /// Run `tools` with `params`; results land in `analysis_with_params`.
    pub fn run_analysis_with_params(
        &mut self,
        name: &str,
        tools: &[String],
        params: &AnalysisParams,
    ) -> AppResult<BTreeMap<String, String>> {
        self.run_analysis_with_progress(name, tools, Some(params), None)
    }

    pub fn run_analysis_with_progress(
        &mut self,
        name: &str,
        tools: &[String],
        params: Option<&AnalysisParams>,
        mut progress_cb: Option<&mut dyn FnMut(RunnerEvent)>,
    ) -> AppResult<BTreeMap<String, String>> {
        let started = Instant::now();
        let mut results = BTreeMap::new();

        if self.registry.require(name)?.status != CalcStatus::Completed {
            tracing::warn!(name, "calculation not completed, cannot run analysis");
            return Ok(results);
        }
        let output_dir = self.output_directory(name)?;
        if !output_dir.is_dir() {
            tracing::warn!(name, dir = %output_dir.display(), "output directory does not exist");
            return Ok(results);
        }

        let effective = match params {
            Some(params) => params.clone(),
            None => AnalysisParams {
                show_cmdline: false,
                ..AnalysisParams::default()
            },
        };
        let bin_dir = self.options.analysis_bin_dir.as_deref();

        for tool_name in tools {
            let Some(tool) = AnalysisTool::parse(tool_name) else {
                tracing::warn!(name, tool = %tool_name, "unknown analysis tool, skipped");
                continue;
            };
            emit_progress(
                &mut progress_cb,
                RunnerStage::Analysing,
                name,
                Some(tool_name),
                started,
                format!("Running analysis tool: {}", tool_name),
            );
            let outcome = analysis::run_tool(tool_name, &tool, &output_dir, &effective, bin_dir);
            let message = match &outcome {
                ToolOutcome::Success(_) => format!("{} completed", tool_name),
                _ => format!("{} failed", tool_name),
            };
            emit_progress(
                &mut progress_cb,
                RunnerStage::Analysing,
                name,
                Some(tool_name),
                started,
                message,
            );
            results.insert(tool_name.clone(), outcome.into_text());
        }

        let calc = self.registry.require_mut(name)?;
        if params.is_some() {
            calc.results.analysis_with_params = results.clone();
        } else {
            calc.results.analysis = results.clone();
        }
        self.persist()?;
        emit_progress(
            &mut progress_cb,
            RunnerStage::Completed,
            name,
            None,
            started,
            "Analysis completed",
        );
        Ok(results)
    }

    pub fn list_calculations(&self) -> Vec<&Calculation> {
        self.registry.iter().collect()
    }

    pub fn get_calculation(&self, name: &str) -> Option<&Calculation> {
        self.registry.get(name)
    }

    pub fn status_rows(&self) -> Vec<StatusRow> {
        self.registry
            .iter()
            .map(|calc| StatusRow {
                name: calc.name.clone(),
                status: calc.status,
                workflow_type: calc.workflow_type,
                start_time: calc.start_time_label(),
            })
            .collect()
    }
}

/// Names become directory names.
fn check_name(name: &str) -> AppResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if invalid {
        return Err(AppError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn prepare_inputs(calc: &Calculation) -> io::Result<String> {
    let wd = &calc.working_directory;
    fs::create_dir_all(wd)?;
    fs::copy(&calc.inp_file, wd.join(INPUT_FILE_NAME))?;

    let op_file_name = read_directive(&calc.inp_file, OPNAME_DIRECTIVE)?
        .map(|opname| format!("{}.op", opname))
        .unwrap_or_else(|| FALLBACK_OP_FILE_NAME.to_string());
    fs::copy(&calc.op_file, wd.join(&op_file_name))?;

    if calc.workflow_type.requires_db_folder()
        && let Some(db) = &calc.db_folder
    {
        copy_tree(db, &wd.join(DB_COPY_DIR))?;
    }
    Ok(op_file_name)
}

/// Recursive copy into a directory that must not exist yet.
fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    if dest.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", dest.display()),
        ));
    }
    if !src.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("database folder {} not found", src.display()),
        ));
    }
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn launch(executable: &Path, working_directory: &Path) -> io::Result<ExitStatus> {
    let log = File::create(working_directory.join(LOG_FILE_NAME))?;
    let log_err = log.try_clone()?;
    Command::new(executable)
        .args(["-mnd", INPUT_FILE_NAME])
        .current_dir(working_directory)
        .stdout(log)
        .stderr(log_err)
        .status()
}

/// `name =` from the working copy of the input, else the calculation name.
fn resolve_output_name(calc: &Calculation) -> String {
    let inp = calc.working_directory.join(INPUT_FILE_NAME);
    match read_directive(&inp, NAME_DIRECTIVE) {
        Ok(Some(output_name)) => output_name,
        Ok(None) => {
            tracing::info!(
                name = %calc.name,
                "input has no name directive, using the calculation name"
            );
            calc.name.clone()
        }
        Err(e) => {
            tracing::warn!(name = %calc.name, error = %e, "cannot read name from input file");
            calc.name.clone()
        }
    }
}

fn discover_outputs(calc: &mut Calculation) {
    let output_name = resolve_output_name(calc);
    let output_dir = calc.working_directory.join(&output_name);

    let found: Vec<String> = if output_dir.is_dir() {
        KNOWN_OUTPUT_FILES
            .iter()
            .filter(|f| output_dir.join(f).exists())
            .map(|f| f.to_string())
            .collect()
    } else {
        tracing::warn!(dir = %output_dir.display(), "output directory not found");
        Vec::new()
    };
    if !found.is_empty() {
        tracing::info!(name = %calc.name, files = %found.join(", "), "found output files");
    }

    let log = fs::read_to_string(calc.working_directory.join(LOG_FILE_NAME)).unwrap_or_default();
    let summary = parse_quantics_output(&log);

    calc.results.output_name = Some(output_name);
    calc.results.output_directory = Some(output_dir);
    calc.results.output_files = found;
    calc.results.summary = (!summary.is_empty()).then_some(summary);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_must_be_single_path_components() {
        assert!(check_name("ho_run").is_ok());
        assert!(check_name("ho run 2").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(matches!(check_name(bad), Err(AppError::InvalidName(_))), "{}", bad);
        }
    }

    #[test]
    fn default_tools_follow_workflow_map() {
        assert_eq!(
            default_analysis_tools(WorkflowType::DdVmcg),
            vec!["rdcheck etot", "rdcheck spop", "ddtraj"]
        );
    }

    #[test]
    fn copy_tree_refuses_existing_target() {
        let root = std::env::temp_dir().join(format!("qd_app_copy_tree_{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let src = root.join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested").join("a.dat"), "x").unwrap();

        let dest = root.join("dest");
        copy_tree(&src, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("nested").join("a.dat")).unwrap(), "x");

        let err = copy_tree(&src, &dest).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }
}
