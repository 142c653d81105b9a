//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from DuckDB.
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Row not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Structurally invalid operation or content.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A write would violate the append-only version invariant.
    #[error("stale version: {0}")]
    StaleVersion(String),
}

impl From<quill_types::Error> for StorageError {
    fn from(e: quill_types::Error) -> Self {
        Self::InvalidData(e.to_string())
    }
}
