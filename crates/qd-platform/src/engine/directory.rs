//! File-backed workflow engine.
//!
//! Store layout under the root directory:
//!
//! ```text
//! codes.json                     registered codes
//! processes/<pk>/process.json    process node, replaced atomically
//! processes/<pk>/work/           materialised inputs and job outputs
//! ```
//!
//! Each submission runs its workchain on a background thread. Process ids
//! are allocated under an in-process lock, so a store must only be written
//! by one engine at a time.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::Local;
use qd_core::{
    NAME_DIRECTIVE, OPNAME_DIRECTIVE, find_directive, output_file_name, parse_quantics_output,
};
use walkdir::WalkDir;

use super::{
    Code, ProcessId, ProcessNode, ProcessOutputs, ProcessState, WorkflowEngine,
    WorkflowSubmission,
};
use crate::error::{PlatformError, PlatformResult};
use crate::workchain::{
    DEFAULT_OUTPUT_NAME, EXIT_CALCULATION_FAILED, EXIT_CALCULATION_FAILED_MESSAGE, RETRIEVED_DIR,
    RUN_SCRIPT_NAME, STDOUT_NAME, render_run_script,
};

const CODES_FILE: &str = "codes.json";
const PROCESSES_DIR: &str = "processes";
const NODE_FILE: &str = "process.json";
const WORK_DIR: &str = "work";
const DB_DIR: &str = "db_data";

pub struct DirectoryEngine {
    root: PathBuf,
    pk_lock: Mutex<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DirectoryEngine {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> PlatformResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(PROCESSES_DIR))?;
        let codes = root.join(CODES_FILE);
        if !codes.exists() {
            fs::write(&codes, "[]")?;
        }
        tracing::debug!(root = %root.display(), "opened workflow store");
        Ok(Self {
            root,
            pk_lock: Mutex::new(()),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn codes(&self) -> PlatformResult<Vec<Code>> {
        let content = fs::read_to_string(self.root.join(CODES_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Add `code`, replacing any code with the same full label.
    pub fn register_code(&self, code: Code) -> PlatformResult<()> {
        let mut codes = self.codes()?;
        let full_label = code.full_label();
        codes.retain(|c| c.full_label() != full_label);
        tracing::info!(code = %full_label, "registering code");
        codes.push(code);
        write_atomic(
            &self.root.join(CODES_FILE),
            &serde_json::to_string_pretty(&codes)?,
        )?;
        Ok(())
    }

    /// Block until every workchain started by this engine has ended.
    pub fn wait_for_workers(&self) {
        let handles: Vec<_> = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            workers.drain(..).collect()
        };
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("workchain thread panicked");
            }
        }
    }

    fn next_pk(&self) -> PlatformResult<ProcessId> {
        let mut max = 0;
        for entry in fs::read_dir(self.root.join(PROCESSES_DIR))? {
            let entry = entry?;
            if let Ok(pk) = entry.file_name().to_string_lossy().parse::<ProcessId>() {
                max = max.max(pk);
            }
        }
        Ok(max + 1)
    }
}

impl WorkflowEngine for DirectoryEngine {
    fn load_code(&self, label: &str) -> PlatformResult<Code> {
        self.codes()?
            .into_iter()
            .find(|c| c.matches_label(label))
            .ok_or_else(|| PlatformError::CodeNotFound {
                label: label.to_string(),
            })
    }

    fn find_codes(&self, pattern: &str) -> PlatformResult<Vec<Code>> {
        Ok(self
            .codes()?
            .into_iter()
            .filter(|c| c.label.contains(pattern))
            .collect())
    }

    fn submit(&self, submission: WorkflowSubmission) -> PlatformResult<ProcessId> {
        let (pk, work) = {
            let _guard = self.pk_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let pk = self.next_pk()?;
            let work = process_dir(&self.root, pk).join(WORK_DIR);
            fs::create_dir_all(&work)?;

            let mut node = ProcessNode::new(pk, submission.label.clone());
            node.report.push(format!(
                "Submitted QUANTICS workchain using code {}",
                submission.code.full_label()
            ));
            write_node(&self.root, &node)?;
            (pk, work)
        };

        let materialised = materialise(&work, &submission);
        let output_name = match materialised {
            Ok(name) => name,
            Err(e) => {
                mark_excepted(&self.root, pk, &e);
                return Err(e);
            }
        };

        let root = self.root.clone();
        let tools = submission.analysis_tools.clone();
        let spawned = thread::Builder::new()
            .name(format!("qd-workchain-{}", pk))
            .spawn(move || execute(&root, pk, &work, &output_name, &tools));
        match spawned {
            Ok(handle) => {
                self.workers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(handle);
                tracing::info!(pk, "workchain submitted");
                Ok(pk)
            }
            Err(e) => {
                let e = PlatformError::Io(e);
                mark_excepted(&self.root, pk, &e);
                Err(e)
            }
        }
    }

    fn load_process(&self, pk: ProcessId) -> PlatformResult<ProcessNode> {
        read_node(&self.root, pk)
    }

    fn recent_processes(&self, limit: usize) -> PlatformResult<Vec<ProcessNode>> {
        let mut nodes = Vec::new();
        for entry in fs::read_dir(self.root.join(PROCESSES_DIR))? {
            let entry = entry?;
            let Ok(pk) = entry.file_name().to_string_lossy().parse::<ProcessId>() else {
                continue;
            };
            match read_node(&self.root, pk) {
                Ok(node) => nodes.push(node),
                Err(e) => tracing::warn!(pk, error = %e, "skipping unreadable process node"),
            }
        }
        nodes.sort_by(|a, b| b.ctime.cmp(&a.ctime).then(b.pk.cmp(&a.pk)));
        nodes.truncate(limit);
        Ok(nodes)
    }
}

fn process_dir(root: &Path, pk: ProcessId) -> PathBuf {
    root.join(PROCESSES_DIR).join(pk.to_string())
}

fn write_atomic(path: &Path, content: &str) -> PlatformResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn write_node(root: &Path, node: &ProcessNode) -> PlatformResult<()> {
    let dir = process_dir(root, node.pk);
    fs::create_dir_all(&dir)?;
    write_atomic(&dir.join(NODE_FILE), &serde_json::to_string_pretty(node)?)
}

fn read_node(root: &Path, pk: ProcessId) -> PlatformResult<ProcessNode> {
    let path = process_dir(root, pk).join(NODE_FILE);
    if !path.exists() {
        return Err(PlatformError::ProcessNotFound { pk });
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn update_node(
    root: &Path,
    pk: ProcessId,
    apply: impl FnOnce(&mut ProcessNode),
) -> PlatformResult<()> {
    let mut node = read_node(root, pk)?;
    apply(&mut node);
    node.mtime = Local::now();
    write_node(root, &node)
}

fn mark_excepted(root: &Path, pk: ProcessId, error: &PlatformError) {
    let message = error.to_string();
    tracing::error!(pk, error = %message, "workchain excepted");
    let updated = update_node(root, pk, |node| {
        node.process_state = ProcessState::Excepted;
        node.exit_message = Some(message.clone());
        node.report.push(format!("Excepted: {}", message));
    });
    if let Err(e) = updated {
        tracing::error!(pk, error = %e, "failed to record exception");
    }
}

/// Write inputs and the job script into `work`; returns the output
/// directory name the script expects.
fn materialise(work: &Path, submission: &WorkflowSubmission) -> PlatformResult<String> {
    let inp_text = submission.inp_file.content_str();
    submission.inp_file.write_to(&work.join("input.inp"))?;

    let op_name = find_directive(&inp_text, OPNAME_DIRECTIVE)
        .map(|name| format!("{}.op", name))
        .unwrap_or_else(|| "operator.op".to_string());
    submission.op_file.write_to(&work.join(op_name))?;

    if let Some(db) = &submission.db_folder {
        db.write_to(&work.join(DB_DIR))?;
    }

    let output_name = find_directive(&inp_text, NAME_DIRECTIVE)
        .or_else(|| submission.label.clone())
        .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string());

    let script = render_run_script(
        &submission.code,
        &output_name,
        &submission.analysis_tools,
        &submission.analysis_params,
    );
    fs::write(work.join(RUN_SCRIPT_NAME), script)?;
    fs::write(
        work.join("job_options.json"),
        serde_json::to_string_pretty(&submission.options)?,
    )?;
    Ok(output_name)
}

fn execute(root: &Path, pk: ProcessId, work: &Path, output_name: &str, tools: &[String]) {
    if let Err(e) = run_workchain(root, pk, work, tools) {
        mark_excepted(root, pk, &e);
    }
    tracing::debug!(pk, output = output_name, "workchain thread done");
}

fn run_workchain(root: &Path, pk: ProcessId, work: &Path, tools: &[String]) -> PlatformResult<()> {
    // run_quantics
    update_node(root, pk, |node| {
        node.process_state = ProcessState::Running;
        node.report.push("Launching QUANTICS job script".to_string());
    })?;
    let status = Command::new("sh")
        .arg(RUN_SCRIPT_NAME)
        .current_dir(work)
        .stdin(Stdio::null())
        .stdout(File::create(work.join("_scheduler-stdout.txt"))?)
        .stderr(File::create(work.join("_scheduler-stderr.txt"))?)
        .status()?;

    // check_quantics
    if !status.success() {
        tracing::warn!(pk, code = ?status.code(), "QUANTICS job failed");
        return update_node(root, pk, |node| {
            node.process_state = ProcessState::Finished;
            node.exit_status = Some(EXIT_CALCULATION_FAILED);
            node.exit_message = Some(EXIT_CALCULATION_FAILED_MESSAGE.to_string());
            node.report.push("QUANTICS calculation failed".to_string());
        });
    }
    let stdout = fs::read_to_string(work.join(STDOUT_NAME)).unwrap_or_default();
    let parsed = parse_quantics_output(&stdout);

    // run_analysis
    let retrieved = work.join(RETRIEVED_DIR);
    let analysis: BTreeMap<String, String> = tools
        .iter()
        .filter_map(|tool| {
            let text = fs::read_to_string(retrieved.join(output_file_name(tool))).ok()?;
            Some((tool.clone(), text))
        })
        .collect();

    // finalize_results
    let output_folder = if retrieved.is_dir() {
        Some(list_files(&retrieved)?)
    } else {
        None
    };
    update_node(root, pk, |node| {
        node.report
            .push("QUANTICS calculation completed successfully".to_string());
        node.report.push("Analysis completed".to_string());
        node.outputs = ProcessOutputs {
            calculation_results: Some(parsed),
            analysis_results: (!analysis.is_empty()).then_some(analysis),
            output_folder,
        };
        node.process_state = ProcessState::Finished;
        node.exit_status = Some(0);
        node.report.push("WorkChain completed successfully".to_string());
    })
}

fn list_files(dir: &Path) -> PlatformResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            names.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(names)
}
