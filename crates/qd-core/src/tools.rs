//! Analysis tool command specs.

use serde::{Deserialize, Serialize};

/// Parameters for tools that ask questions on standard input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Number of grid points `rdgpop` sums over.
    pub rdgpop_nz: String,
    /// Degree-of-freedom index `rdgpop` reports on.
    pub rdgpop_dof: String,
    /// Log each command line and its captured output.
    pub show_cmdline: bool,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            rdgpop_nz: "2".to_string(),
            rdgpop_dof: "1".to_string(),
            show_cmdline: true,
        }
    }
}

/// A recognised post-processing tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisTool {
    /// `rdcheck` and its sub-arguments, e.g. `rdcheck natpop 0 0`.
    Rdcheck { argv: Vec<String> },
    /// `rdgpop -w`, answers grid-point count and dof on stdin.
    Rdgpop,
    /// `ddtraj`, no input.
    Ddtraj,
}

impl AnalysisTool {
    /// Map a tool string to its command. Unknown tools yield `None`.
    pub fn parse(tool: &str) -> Option<Self> {
        let tool = tool.trim();
        if tool.starts_with("rdcheck") {
            let argv = tool.split_whitespace().map(str::to_string).collect();
            return Some(AnalysisTool::Rdcheck { argv });
        }
        match tool {
            "rdgpop" => Some(AnalysisTool::Rdgpop),
            "ddtraj" => Some(AnalysisTool::Ddtraj),
            _ => None,
        }
    }

    pub fn program(&self) -> &str {
        match self {
            AnalysisTool::Rdcheck { argv } => argv.first().map(String::as_str).unwrap_or("rdcheck"),
            AnalysisTool::Rdgpop => "rdgpop",
            AnalysisTool::Ddtraj => "ddtraj",
        }
    }

    pub fn args(&self) -> Vec<String> {
        match self {
            AnalysisTool::Rdcheck { argv } => argv.iter().skip(1).cloned().collect(),
            // -w overwrites existing gpop files without asking
            AnalysisTool::Rdgpop => vec!["-w".to_string()],
            AnalysisTool::Ddtraj => Vec::new(),
        }
    }

    /// Text to feed on standard input, if the tool is interactive.
    pub fn stdin_script(&self, params: &AnalysisParams) -> Option<String> {
        match self {
            AnalysisTool::Rdgpop => Some(format!("{}\n{}\n", params.rdgpop_nz, params.rdgpop_dof)),
            _ => None,
        }
    }

    /// Full command line for display.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program().to_string())
            .chain(self.args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// File the captured stdout of `tool` is saved under.
pub fn output_file_name(tool: &str) -> String {
    format!("{}_output.txt", tool.trim().replace(' ', "_"))
}
