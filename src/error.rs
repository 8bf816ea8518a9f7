//! Error taxonomy for the experiment core.
//!
//! Every variant is recoverable from the caller's point of view: the CLI
//! turns them into a single user-visible message. Nothing here is meant to
//! abort the process.

use thiserror::Error;

pub type LabResult<T> = std::result::Result<T, LabError>;

#[derive(Debug, Error)]
pub enum LabError {
    /// A dataset/algorithm/score/run handle or name no longer resolves.
    #[error("{kind} not found: {what}")]
    NotFound { kind: &'static str, what: String },

    /// Raw input does not satisfy the declared kind of a parameter.
    #[error("invalid value for parameter `{param}`: {reason}")]
    InvalidParameter { param: String, reason: String },

    /// Numeric input that parses but does not fit (overflow or declared bounds).
    #[error("value for parameter `{param}` is out of range: {reason}")]
    OutOfRange { param: String, reason: String },

    /// A name given where a handle is needed matches several entries.
    #[error("{kind} name `{name}` is ambiguous; use one of {}", .handles.join(", "))]
    Ambiguous {
        kind: &'static str,
        name: String,
        handles: Vec<String>,
    },

    #[error("{kind} named `{name}` already exists")]
    DuplicateName { kind: &'static str, name: String },

    /// Only raised when the caller asked for de-duplication.
    #[error("an identical run already exists ({existing})")]
    DuplicateRun { existing: String },

    /// A plugin source does not expose what the plugin contract requires.
    #[error("plugin {source_name} violates the plugin contract: {reason}")]
    ModuleContract { source_name: String, reason: String },

    #[error("algorithm `{algorithm}` failed: {reason}")]
    AlgorithmFailed { algorithm: String, reason: String },

    #[error("algorithm `{algorithm}` returned {got} labels for {expected} samples")]
    LabelCountMismatch {
        algorithm: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid dataset: {0}")]
    Dataset(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl LabError {
    pub fn not_found(kind: &'static str, what: impl ToString) -> Self {
        LabError::NotFound {
            kind,
            what: what.to_string(),
        }
    }

    pub fn invalid(param: &str, reason: impl Into<String>) -> Self {
        LabError::InvalidParameter {
            param: param.to_string(),
            reason: reason.into(),
        }
    }

    pub fn out_of_range(param: &str, reason: impl Into<String>) -> Self {
        LabError::OutOfRange {
            param: param.to_string(),
            reason: reason.into(),
        }
    }

    pub fn contract(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        LabError::ModuleContract {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// True for the parameter coercion family (bad kind or out of range).
    pub fn is_parameter_error(&self) -> bool {
        matches!(
            self,
            LabError::InvalidParameter { .. } | LabError::OutOfRange { .. }
        )
    }
}
