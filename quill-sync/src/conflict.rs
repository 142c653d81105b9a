//! Conflict detection for rejected replays.
//!
//! When the remote API rejects a write whose declared base version B is
//! behind the authoritative version C, the detector compares content hashes
//! (never deep structure): if the content at B equals the content at C, the
//! divergence is a stale duplicate and the pending write is discarded
//! silently. Otherwise a conflict envelope carrying base, mine and theirs is
//! built for the resolution flow.

use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use quill_storage::VersionStore;
use quill_types::{content_hash, DiffSummary, EntityId, OperationId, QueueOperation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// Ephemeral record of one unresolved conflict. Created on version mismatch,
/// destroyed once the coordinator resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictEnvelope {
    pub id: Uuid,
    pub operation_id: OperationId,
    pub entity_id: EntityId,
    pub resource_table: String,
    pub base_version: i64,
    pub base_content: Value,
    pub mine_content: Value,
    pub theirs_version: i64,
    pub theirs_content: Value,
    pub diff_summary: DiffSummary,
    pub created_at: DateTime<Utc>,
}

/// What the detector decided about a rejected replay.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// The remote already holds the content this write was based on —
    /// discard the pending write, no user interaction.
    StaleDuplicate,
    /// Genuine divergence; surface for resolution.
    Conflict(Box<ConflictEnvelope>),
}

/// Builds conflict envelopes from optimistic-concurrency rejections.
#[derive(Clone)]
pub struct ConflictDetector {
    versions: VersionStore,
}

impl ConflictDetector {
    pub fn new(versions: VersionStore) -> Self {
        Self { versions }
    }

    /// Classifies a rejected replay given the authoritative current state.
    ///
    /// The base content hash comes from the stored version at
    /// `op.base_version` when available, falling back to the hash the writer
    /// declared on the operation.
    pub fn detect(
        &self,
        op: &QueueOperation,
        theirs_version: i64,
        theirs_content: &Value,
    ) -> SyncResult<Detection> {
        let base_record = self
            .versions
            .at(op.entity_id, &op.resource_table, op.base_version)?;

        let (base_content, base_hash) = match base_record {
            Some(record) => {
                let hash = record.content_hash.clone();
                (record.content, hash)
            }
            None => (Value::Null, op.content_hash.clone().unwrap_or_default()),
        };

        let theirs_hash = content_hash(theirs_content);
        if !base_hash.is_empty() && base_hash == theirs_hash {
            debug!(
                operation = %op.id,
                entity = %op.entity_id,
                "base and current content are identical, auto-resolving stale duplicate"
            );
            return Ok(Detection::StaleDuplicate);
        }

        let envelope = ConflictEnvelope {
            id: Uuid::now_v7(),
            operation_id: op.id,
            entity_id: op.entity_id,
            resource_table: op.resource_table.clone(),
            base_version: op.base_version,
            base_content,
            mine_content: op.payload.clone(),
            theirs_version,
            theirs_content: theirs_content.clone(),
            diff_summary: DiffSummary::between_values(&op.payload, theirs_content),
            created_at: Utc::now(),
        };
        Ok(Detection::Conflict(Box::new(envelope)))
    }
}
