//! qd-records: calculation records and the registry that persists them.

pub mod registry;
pub mod store;
pub mod types;

pub use registry::Registry;
pub use store::{REGISTRY_FILE_NAME, RegistryStore};
pub use types::*;

pub type RecordsResult<T> = Result<T, RecordsError>;

#[derive(thiserror::Error, Debug)]
pub enum RecordsError {
    #[error("Calculation '{name}' already exists")]
    DuplicateName { name: String },

    #[error("Calculation not found: {name}")]
    NotFound { name: String },

    #[error("Calculation '{name}' cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: CalcStatus,
        to: CalcStatus,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
