//! Error types for the training-run harness

use thiserror::Error;

/// Result type alias using the harness Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the training-run harness
#[derive(Error, Debug)]
pub enum Error {
    // Not-found errors
    #[error("could not find a checkpoint with id {checkpoint_id}")]
    CheckpointNotFound { checkpoint_id: String },

    #[error("could not find the most recent checkpoint for run {run_id}")]
    NoCheckpoints { run_id: String },

    #[error("could not find a model with id {model_id}")]
    ModelNotFound { model_id: String },

    #[error("datum not found at index {index}{}", .reason.as_deref().map(|r| format!(". {r}")).unwrap_or_default())]
    DatumNotFound { index: usize, reason: Option<String> },

    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    // Data-integrity errors
    #[error("unexpected multiple checkpoints with id {checkpoint_id} ({matches} matches)")]
    DuplicateCheckpoint { checkpoint_id: String, matches: usize },

    #[error("malformed checkpoint id {checkpoint_id}: {reason}")]
    MalformedCheckpointId { checkpoint_id: String, reason: String },

    // Interruption
    #[error("RunContext was interrupted")]
    Interrupted,

    // Validation errors
    #[error("key_prefix must end with a forward slash, got {prefix:?}")]
    InvalidKeyPrefix { prefix: String },

    #[error("index must be a non-negative integer less than {len}. given {index}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("no dataset snapshot split has been prepared")]
    DatasetNotPrepared,

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // Lifecycle misuse
    #[error("RunContext in invalid state: expected {expected}, got {actual}")]
    InvalidLifecycle { expected: String, actual: String },

    // Unwind errors
    #[error("failed to release {resource}: {source}")]
    ReleaseFailed {
        resource: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{primary} ({} further failure(s) while unwinding)", .suppressed.len())]
    Unwind {
        primary: Box<Error>,
        suppressed: Vec<Error>,
    },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns true if this error reports that a requested item does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::CheckpointNotFound { .. }
                | Error::NoCheckpoints { .. }
                | Error::ModelNotFound { .. }
                | Error::DatumNotFound { .. }
                | Error::StoragePathNotFound { .. }
        )
    }

    /// Returns true if this error signals corruption or a broken store invariant
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            Error::DuplicateCheckpoint { .. } | Error::MalformedCheckpointId { .. }
        )
    }

    /// Returns true if this is the interruption condition
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage { .. })
    }

    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        self.is_data_integrity()
            || matches!(
                self,
                Error::InvalidConfig { .. }
                    | Error::InvalidLifecycle { .. }
                    | Error::Internal { .. }
            )
    }

    /// Failures raised by release actions while this error was propagating
    pub fn suppressed(&self) -> &[Error] {
        match self {
            Error::Unwind { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// The primary failure, looking through an unwind aggregate
    pub fn primary(&self) -> &Error {
        match self {
            Error::Unwind { primary, .. } => primary,
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
