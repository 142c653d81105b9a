//! Offline write replay engine for Quill.
//!
//! Writes made while disconnected land in the durable queue
//! (`quill-storage`); this crate replays them once connectivity returns,
//! detects when a replay collides with a concurrent remote change, and
//! resolves the collision via three-way merge or an explicit user decision.
//!
//! # Architecture
//!
//! - [`processor::QueueProcessor`] — the event loop: drains bounded batches,
//!   gated by the [`breaker::CircuitBreaker`] and [`monitor::NetworkMonitor`].
//! - [`conflict::ConflictDetector`] — classifies optimistic-concurrency
//!   rejections: stale duplicates auto-resolve, real divergence becomes a
//!   [`conflict::ConflictEnvelope`].
//! - [`merge`] — three-way merge over block-tree documents.
//! - [`resolution::ResolutionCoordinator`] — keep-mine / use-latest / merge /
//!   force, with per-entity FIFO envelope queuing.
//! - [`transfer`] — checksummed queue export/import.
//!
//! The presentation layer only ever talks to the coordinator and the
//! processor handle; no UI concerns live here.

pub mod api_client;
pub mod breaker;
pub mod config;
pub mod conflict;
pub mod error;
pub mod merge;
pub mod monitor;
pub mod processor;
pub mod resolution;
pub mod telemetry;
pub mod transfer;

pub use api_client::{PushOutcome, RemoteApiClient};
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use config::SyncConfig;
pub use conflict::{ConflictDetector, ConflictEnvelope, Detection};
pub use error::{SyncError, SyncResult};
pub use merge::{merge, MergeOutcome};
pub use monitor::{classify, ConnectionQuality, NetworkMonitor};
pub use processor::{
    create_queue_processor, FlushReport, ProcessorCommand, ProcessorHandle, QueueProcessor,
};
pub use resolution::{
    Resolution, ResolutionAction, ResolutionCoordinator, ResolutionState, ResolutionStatus,
};
pub use telemetry::{Telemetry, TelemetryEvent};
pub use transfer::{export, import, ImportOutcome, ImportReport, QueueExport};
