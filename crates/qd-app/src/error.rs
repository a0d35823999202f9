//! Error types for the qd-app service layer.

use std::path::PathBuf;

/// Application error type that wraps errors from the backend crates and
/// gives the CLI and other front-ends one error interface.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Calculation not found: {0}")]
    CalculationNotFound(String),

    #[error("Calculation name '{0}' already exists")]
    DuplicateName(String),

    #[error("Invalid calculation name: {0:?}")]
    InvalidName(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration validation failed: {0}")]
    Validation(String),

    #[error("Records error: {0}")]
    Records(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Platform setup error: {message}")]
    Setup { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to write {path}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for qd-app operations.
pub type AppResult<T> = Result<T, AppError>;

// Conversions from backend error types
impl From<qd_core::CoreError> for AppError {
    fn from(err: qd_core::CoreError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

impl From<qd_config::ConfigError> for AppError {
    fn from(err: qd_config::ConfigError) -> Self {
        match err {
            qd_config::ConfigError::Validation(e) => AppError::Validation(e.to_string()),
            other => AppError::Config(other.to_string()),
        }
    }
}

impl From<qd_config::ValidationError> for AppError {
    fn from(err: qd_config::ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<qd_records::RecordsError> for AppError {
    fn from(err: qd_records::RecordsError) -> Self {
        match err {
            qd_records::RecordsError::DuplicateName { name } => AppError::DuplicateName(name),
            qd_records::RecordsError::NotFound { name } => AppError::CalculationNotFound(name),
            other => AppError::Records(other.to_string()),
        }
    }
}

impl From<qd_platform::PlatformError> for AppError {
    fn from(err: qd_platform::PlatformError) -> Self {
        match err {
            qd_platform::PlatformError::Setup { message } => AppError::Setup { message },
            other => AppError::Platform(other.to_string()),
        }
    }
}
