//! Post-processing tool invocation.
//!
//! Tools run in the calculation's output directory, one at a time. A tool's
//! failure is recorded as text and never stops the batch.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use qd_core::{AnalysisParams, AnalysisTool, output_file_name};

/// What one tool invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Exit 0; captured stdout.
    Success(String),
    /// Nonzero exit; captured stderr.
    Failed(String),
    /// The tool could not be run or its output not saved.
    Exception(String),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }

    /// Text stored in the calculation record.
    pub fn into_text(self) -> String {
        match self {
            ToolOutcome::Success(stdout) => stdout,
            ToolOutcome::Failed(stderr) => format!("Error: {}", stderr),
            ToolOutcome::Exception(e) => format!("Exception: {}", e),
        }
    }
}

/// Program path, prefixed with `bin_dir` when one is configured.
pub fn resolve_program(program: &str, bin_dir: Option<&Path>) -> PathBuf {
    match bin_dir {
        Some(dir) => dir.join(program),
        None => PathBuf::from(program),
    }
}

/// Run `tool` in `dir`. On success stdout is also saved next to the
/// simulation outputs as `<tool>_output.txt`.
pub fn run_tool(
    name: &str,
    tool: &AnalysisTool,
    dir: &Path,
    params: &AnalysisParams,
    bin_dir: Option<&Path>,
) -> ToolOutcome {
    let stdin_script = tool.stdin_script(params);
    if params.show_cmdline {
        match &stdin_script {
            Some(_) => tracing::info!(
                command = %tool.command_line(),
                nz = %params.rdgpop_nz,
                dof = %params.rdgpop_dof,
                "executing analysis command"
            ),
            None => tracing::info!(command = %tool.command_line(), "executing analysis command"),
        }
    }

    let output = match execute(tool, dir, stdin_script.as_deref(), bin_dir) {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(tool = name, error = %e, "analysis tool could not be run");
            return ToolOutcome::Exception(e.to_string());
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if params.show_cmdline && !stdout.is_empty() {
        tracing::info!(tool = name, "command output:\n{}", stdout);
    }

    if !output.status.success() {
        tracing::warn!(tool = name, code = ?output.status.code(), "{} failed: {}", name, stderr);
        return ToolOutcome::Failed(stderr);
    }

    let saved = dir.join(output_file_name(name));
    if let Err(e) = fs::write(&saved, &stdout) {
        tracing::warn!(path = %saved.display(), error = %e, "could not save tool output");
        return ToolOutcome::Exception(e.to_string());
    }
    tracing::info!(tool = name, "{} completed", name);
    ToolOutcome::Success(stdout)
}

fn execute(
    tool: &AnalysisTool,
    dir: &Path,
    stdin_script: Option<&str>,
    bin_dir: Option<&Path>,
) -> io::Result<Output> {
    let mut command = Command::new(resolve_program(tool.program(), bin_dir));
    command
        .args(tool.args())
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let Some(script) = stdin_script else {
        return command.stdin(Stdio::null()).output();
    };

    let mut child = command.stdin(Stdio::piped()).spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        // a tool that exits before reading everything is judged by its status
        if let Err(e) = stdin.write_all(script.as_bytes())
            && e.kind() != io::ErrorKind::BrokenPipe
        {
            return Err(e);
        }
    }
    child.wait_with_output()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_text_is_tagged() {
        assert_eq!(ToolOutcome::Success("ok\n".into()).into_text(), "ok\n");
        assert_eq!(ToolOutcome::Failed("bad".into()).into_text(), "Error: bad");
        assert_eq!(
            ToolOutcome::Exception("missing".into()).into_text(),
            "Exception: missing"
        );
    }

    #[test]
    fn bin_dir_prefixes_program() {
        assert_eq!(
            resolve_program("rdcheck", Some(Path::new("/opt/quantics/bin"))),
            PathBuf::from("/opt/quantics/bin/rdcheck")
        );
        assert_eq!(resolve_program("rdcheck", None), PathBuf::from("rdcheck"));
    }

    #[test]
    fn missing_program_is_an_exception() {
        let dir = std::env::temp_dir();
        let tool = AnalysisTool::parse("rdcheck etot").unwrap();
        let outcome = run_tool(
            "rdcheck etot",
            &tool,
            &dir,
            &AnalysisParams::default(),
            Some(Path::new("/nonexistent/qd/bin")),
        );
        assert!(matches!(outcome, ToolOutcome::Exception(_)));
        assert!(outcome.into_text().starts_with("Exception: "));
    }
}
