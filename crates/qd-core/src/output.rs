//! Pattern extraction from the simulation's text output.
//!
//! Only a handful of labelled lines are recognised; everything else in the
//! log is opaque to this layer.

use serde::{Deserialize, Serialize};

const TOTAL_ENERGY: &str = "Total energy";
const FINAL_TIME: &str = "Final time";
const CONVERGENCE: &str = "Convergence";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_energy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converged: Option<bool>,
}

impl ParsedOutput {
    pub fn is_empty(&self) -> bool {
        self.total_energy.is_none() && self.final_time.is_none() && self.converged.is_none()
    }
}

pub fn parse_quantics_output(text: &str) -> ParsedOutput {
    ParsedOutput {
        total_energy: labelled_value(text, TOTAL_ENERGY),
        final_time: labelled_value(text, FINAL_TIME),
        converged: convergence(text),
    }
}

/// Last token of the first line containing `label`, if it parses.
fn labelled_value(text: &str, label: &str) -> Option<f64> {
    let line = text.lines().find(|l| l.contains(label))?;
    line.split_whitespace().last()?.parse().ok()
}

fn convergence(text: &str) -> Option<bool> {
    text.lines()
        .filter(|l| l.contains(CONVERGENCE))
        .find_map(|l| {
            if l.contains("achieved") {
                Some(true)
            } else if l.contains("failed") {
                Some(false)
            } else {
                None
            }
        })
}
