//! The QUANTICS workchain: run, check, analyse, finalise.

use serde::{Deserialize, Serialize};

use qd_core::{AnalysisParams, AnalysisTool, WorkflowType, output_file_name};

use crate::engine::Code;

/// Steps in execution order.
pub const WORKCHAIN_STEPS: [&str; 4] = [
    "run_quantics",
    "check_quantics",
    "run_analysis",
    "finalize_results",
];

pub const EXIT_CALCULATION_FAILED: i32 = 400;
pub const EXIT_CALCULATION_FAILED_MESSAGE: &str =
    "ERROR_QUANTICS_CALCULATION_FAILED: The QUANTICS calculation failed";

pub const RUN_SCRIPT_NAME: &str = "run_quantics.sh";
pub const STDOUT_NAME: &str = "quantics.out";
pub const STDERR_NAME: &str = "quantics.err";
pub const RETRIEVED_DIR: &str = "output";
pub const DEFAULT_OUTPUT_NAME: &str = "quantics";

/// Default SGE parallel environment.
pub const SGE_PARALLEL_ENV: &str = "smp";

/// Tools the workchain runs for `workflow`.
pub fn workflow_tools(workflow: WorkflowType) -> Vec<String> {
    workflow
        .analysis_tools()
        .iter()
        .map(|t| t.to_string())
        .collect()
}

/// Scheduler resource request. SGE takes a parallel environment; other
/// schedulers take a machine count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceRequest {
    ParallelEnv {
        parallel_env: String,
        tot_num_mpiprocs: u32,
    },
    Machines {
        num_machines: u32,
        tot_num_mpiprocs: u32,
    },
}

impl ResourceRequest {
    pub fn for_code(code: &Code, num_mpiprocs: u32) -> Self {
        if code.uses_sge() {
            ResourceRequest::ParallelEnv {
                parallel_env: SGE_PARALLEL_ENV.to_string(),
                tot_num_mpiprocs: num_mpiprocs,
            }
        } else {
            ResourceRequest::Machines {
                num_machines: 1,
                tot_num_mpiprocs: num_mpiprocs,
            }
        }
    }
}

/// What a caller asks for; the resource shape is derived from the code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub num_mpiprocs: u32,
    /// Scheduler hint, not enforced locally.
    pub max_wallclock_seconds: u64,
    pub queue_name: Option<String>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            num_mpiprocs: 1,
            max_wallclock_seconds: 3600,
            queue_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub resources: ResourceRequest,
    pub max_wallclock_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
}

impl JobOptions {
    pub fn build(code: &Code, settings: &JobSettings) -> Self {
        Self {
            resources: ResourceRequest::for_code(code, settings.num_mpiprocs.max(1)),
            max_wallclock_seconds: settings.max_wallclock_seconds,
            queue_name: settings.queue_name.clone(),
        }
    }
}

/// Single-quote `s` for POSIX sh.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Render the job script.
///
/// The simulation's exit status is the script's exit status. Analysis tools
/// run in the output directory afterwards; a failing tool's output file holds
/// `Error: ` followed by its stderr. The output directory is then copied into `output/` for
/// retrieval.
pub fn render_run_script(
    code: &Code,
    output_name: &str,
    tools: &[String],
    params: &AnalysisParams,
) -> String {
    let mut script = String::from("#!/bin/sh\n");
    if !code.prepend_text.trim().is_empty() {
        script.push_str(code.prepend_text.trim_end());
        script.push('\n');
    }
    script.push_str(&format!(
        "{} -mnd input.inp > {} 2> {} || exit $?\n",
        shell_quote(&code.executable.to_string_lossy()),
        STDOUT_NAME,
        STDERR_NAME
    ));

    let out_dir = shell_quote(output_name);
    script.push_str(&format!("if [ -d {} ]; then\n", out_dir));
    script.push_str(&format!("  cd {} || exit 1\n", out_dir));
    for tool in tools {
        let Some(spec) = AnalysisTool::parse(tool) else {
            script.push_str(&format!("  echo {}\n", shell_quote(&format!("Unknown tool: {}", tool))));
            continue;
        };
        let command = std::iter::once(spec.program().to_string())
            .chain(spec.args())
            .map(|a| shell_quote(&a))
            .collect::<Vec<_>>()
            .join(" ");
        let feed = match spec.stdin_script(params) {
            Some(_) => format!(
                "printf '%s\\n%s\\n' {} {} | ",
                shell_quote(&params.rdgpop_nz),
                shell_quote(&params.rdgpop_dof)
            ),
            None => String::new(),
        };
        let out_file = shell_quote(&output_file_name(tool));
        let err_file = shell_quote(&format!(".{}.err", tool.trim().replace(' ', "_")));
        script.push_str(&format!(
            "  {}{} > {} 2> {} || {{ printf 'Error: '; cat {}; }} > {}\n",
            feed, command, out_file, err_file, err_file, out_file
        ));
        script.push_str(&format!("  rm -f {}\n", err_file));
    }
    script.push_str("  cd ..\n");
    script.push_str(&format!("  mkdir -p {}\n", RETRIEVED_DIR));
    script.push_str(&format!("  cp -R {}/. {}/\n", out_dir, RETRIEVED_DIR));
    script.push_str("fi\n");
    script.push_str("echo 'QUANTICS calculation completed'\n");
    script
}
