//! Core type definitions for the Quill offline write queue.
//!
//! This crate defines the fundamental, storage-agnostic types shared by the
//! queue and sync engine:
//! - Entity, device and operation identifiers (UUID v7)
//! - The queued write operation model and its dead-letter mirror
//! - The block-tree document model used by the three-way merge engine
//!
//! Presentation-level types (view models, dialog state for specific UIs)
//! belong in the application layer, not here.

mod document;
mod ids;
mod operation;

pub use document::{content_hash, Block, BlockContent, DiffSummary, Document};
pub use ids::{DeviceId, EntityId, OperationId};
pub use operation::{
    DeadLetterOperation, DeadLetterReason, OperationKind, OperationStatus, QueueOperation,
};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}
