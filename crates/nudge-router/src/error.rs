//! Router error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading, reloading and administering routing state.
///
/// Routing itself never fails; these surface from `initialize`, `reload` and
/// the administrative writes.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Pattern store, index or cache failure.
    #[error("Memory error: {0}")]
    Memory(#[from] nudge_memory::MemoryError),

    /// Embedder or abstractor could not be built.
    #[error("Model provider error: {0}")]
    Llm(#[from] nudge_llm::LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] nudge_config::ConfigError),

    /// The weakness catalog file is malformed or inconsistent.
    #[error("Invalid weakness catalog {path}: {reason}")]
    InvalidCatalog { path: PathBuf, reason: String },

    /// The entity-name catalog is malformed.
    #[error("Invalid entity catalog {path}: {reason}")]
    InvalidEntities { path: PathBuf, reason: String },

    /// A catalog entry carries a question pattern that is not a valid regex.
    #[error("Weakness '{id}' has an invalid question pattern: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    /// The files on disk already failed validation and have not changed since.
    #[error("Snapshot rejected earlier and unchanged since: {0}")]
    RejectedSnapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A reload could not run to completion.
    #[error("Reload error: {0}")]
    Reload(String),

    /// The filesystem watcher could not be started.
    #[error("Watch error: {0}")]
    Watch(String),
}

/// Result type for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;
