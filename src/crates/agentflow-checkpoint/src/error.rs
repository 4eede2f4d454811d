//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while saving, loading or pruning checkpoints
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint exists under the given id
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary serialization error
    #[error("Binary serialization error: {0}")]
    Binary(#[from] bincode::Error),

    /// Backend storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Optimistic-concurrency violation; safe to retry a bounded number of times
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// The record itself is malformed
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),
}

impl CheckpointError {
    /// Whether retrying the operation may succeed.
    ///
    /// Only [`CheckpointError::Conflict`] is transient; everything else is a
    /// hard failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, CheckpointError::Conflict(_))
    }
}
