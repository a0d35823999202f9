use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown workflow type: {value} (expected MCTDH, vMCG or DD-vMCG)")]
    UnknownWorkflow { value: String },

    #[error("Unknown execution mode: {value} (expected local, aiida or auto)")]
    UnknownMode { value: String },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },
}
