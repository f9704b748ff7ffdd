//! Error taxonomy for the run controller and ranking contract.
//!
//! Nothing here is fatal to the process: every variant is recoverable by issuing a new submit.

use thiserror::Error;

/// Why a `RunRequest` was rejected before reaching the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("model id is empty")]
    EmptyModelId,

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("text input is empty")]
    EmptyText,

    #[error("image input is empty")]
    EmptyImage,
}

/// Failure reported by an inference backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    /// Malformed input; reported inline, state unchanged.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("cannot {op} while {state}")]
    InvalidTransition {
        op: &'static str,
        state: &'static str,
    },

    /// Backend returned two predictions with the same label.
    #[error("duplicate label in predictions: {0}")]
    DuplicateLabel(String),

    #[error("backend returned no predictions")]
    EmptySet,

    #[error("confidence for {label} out of range: {confidence}")]
    InvalidConfidence { label: String, confidence: f64 },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl RunError {
    /// Errors caused by the backend breaking its contract or failing outright.
    /// These end a run in `Idle`; the others are rejected commands.
    pub fn is_run_failure(&self) -> bool {
        matches!(
            self,
            RunError::DuplicateLabel(_)
                | RunError::EmptySet
                | RunError::InvalidConfidence { .. }
                | RunError::Backend(_)
        )
    }
}
