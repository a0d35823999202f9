//! Workflow types and the analysis tools that apply to each.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Simulation mode of a calculation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum WorkflowType {
    #[default]
    #[serde(rename = "MCTDH")]
    Mctdh,
    #[serde(rename = "vMCG")]
    Vmcg,
    #[serde(rename = "DD-vMCG")]
    DdVmcg,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 3] = [
        WorkflowType::Mctdh,
        WorkflowType::Vmcg,
        WorkflowType::DdVmcg,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowType::Mctdh => "MCTDH",
            WorkflowType::Vmcg => "vMCG",
            WorkflowType::DdVmcg => "DD-vMCG",
        }
    }

    /// Only direct-dynamics runs consume a database folder.
    pub fn requires_db_folder(self) -> bool {
        matches!(self, WorkflowType::DdVmcg)
    }

    /// Analysis tools offered for this workflow type.
    ///
    /// Both the local runner and the workflow-platform adapter present this
    /// list to the user, so it is the only copy of the mapping.
    pub fn analysis_tools(self) -> &'static [&'static str] {
        match self {
            WorkflowType::Mctdh => &[
                "rdcheck etot",
                "rdcheck spop",
                "rdcheck natpop 0 0",
                "rdgpop",
            ],
            WorkflowType::Vmcg => &["rdcheck etot", "rdcheck spop"],
            WorkflowType::DdVmcg => &["rdcheck etot", "rdcheck spop", "ddtraj"],
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowType::ALL
            .into_iter()
            .find(|w| w.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::UnknownWorkflow {
                value: s.to_string(),
            })
    }
}
