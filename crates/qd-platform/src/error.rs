use std::path::PathBuf;

use crate::engine::ProcessId;

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(thiserror::Error, Debug)]
pub enum PlatformError {
    #[error("Platform setup error: {message}")]
    Setup { message: String },

    #[error("Code not found: {label}")]
    CodeNotFound { label: String },

    #[error("Process not found: {pk}")]
    ProcessNotFound { pk: ProcessId },

    #[error("Input not found: {path}")]
    InputNotFound { path: PathBuf },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}
