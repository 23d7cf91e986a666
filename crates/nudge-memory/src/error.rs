//! Error types for the memory crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the memory crate.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Embedding cache database failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The embedding provider failed or timed out after all retries.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(#[from] nudge_llm::LlmError),

    /// A vector does not have the configured dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// A persisted pattern file or index artifact failed validation.
    #[error("Corrupt snapshot at {}: {reason}", path.display())]
    CorruptSnapshot { path: PathBuf, reason: String },

    /// Cluster abstraction failed. Callers log this and continue.
    #[error("Abstraction failed for cluster {cluster_id}: {reason}")]
    AbstractionFailed { cluster_id: usize, reason: String },

    /// Requested record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid data or parameters.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl MemoryError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptSnapshot {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
