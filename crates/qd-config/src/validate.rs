//! Configuration validation, run before a calculation is started.

use std::path::{Path, PathBuf};

use crate::schema::QuanticsConfig;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please provide a calculation name")]
    EmptyName,

    #[error("Invalid calculation name: {name} (use letters, digits, '_' or '-')")]
    InvalidName { name: String },

    #[error("Please select a valid {what}: {}", display_path(.path))]
    MissingInput {
        what: &'static str,
        path: Option<PathBuf>,
    },

    #[error("DD-vMCG workflow requires a valid DB folder")]
    MissingDbFolder,
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<not set>".to_string())
}

/// Names become directory names, so only a conservative alphabet is allowed.
pub fn is_valid_calculation_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn validate_config(config: &QuanticsConfig) -> Result<(), ValidationError> {
    let name = config.calculation_name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if !is_valid_calculation_name(name) {
        return Err(ValidationError::InvalidName {
            name: name.to_string(),
        });
    }

    require_file(".inp file", config.inp_file.as_deref())?;
    require_file(".op file", config.op_file.as_deref())?;

    if config.workflow_type.requires_db_folder()
        && !config.db_folder.as_deref().is_some_and(Path::is_dir)
    {
        return Err(ValidationError::MissingDbFolder);
    }

    Ok(())
}

fn require_file(what: &'static str, path: Option<&Path>) -> Result<(), ValidationError> {
    match path {
        Some(p) if p.is_file() => Ok(()),
        _ => Err(ValidationError::MissingInput {
            what,
            path: path.map(Path::to_path_buf),
        }),
    }
}
