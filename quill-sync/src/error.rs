//! Sync engine error types.
//!
//! The taxonomy drives retry policy: transient errors retry with durable
//! backoff then dead-letter, version conflicts route to the detector and are
//! never blindly retried, and validation errors dead-letter immediately.
//! A duplicate idempotency key is not an error anywhere in the pipeline.

use serde_json::Value;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the replay and resolution pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Timeout, connect failure or 5xx — retried with backoff.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Optimistic-concurrency rejection carrying the authoritative state.
    #[error("version conflict: current version is {current_version}")]
    VersionConflict {
        current_version: i64,
        current_content: Value,
    },

    /// Malformed operation — dead-lettered, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The documents exceed the merge size guard or are not mergeable
    /// structures; callers must fall back to a choose-side resolution.
    #[error("merge not possible: {0}")]
    MergeNotPossible(String),

    /// Operation TTL lapsed before it could be sent.
    #[error("operation expired")]
    Expired,

    #[error("storage error: {0}")]
    Storage(#[from] quill_storage::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("engine channel closed")]
    ChannelClosed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Returns true if the error should be retried with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientNetwork(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
