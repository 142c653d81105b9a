//! Conflict resolution coordinator.
//!
//! The sole entry point the presentation layer uses to act on a conflict.
//! Envelopes queue FIFO per entity — at most one is ever presented per
//! entity, and a second conflict arriving while one is unresolved waits
//! behind it. The dialog flow is an explicit state machine (Idle,
//! ConflictPresented, Resolving, Resolved) driven by discrete events, so the
//! engine never depends on UI lifecycle.

use crate::api_client::{PushOutcome, RemoteApiClient};
use crate::conflict::ConflictEnvelope;
use crate::error::{SyncError, SyncResult};
use crate::merge::{merge, MergeOutcome};
use crate::telemetry::Telemetry;
use crate::telemetry_meta;
use chrono::Utc;
use quill_storage::{QueueStore, StorageError, VersionStore};
use quill_types::{content_hash, DiffSummary, Document, EntityId};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The four resolution actions a user can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionAction {
    /// Re-submit the pending content with base version forced to theirs.
    KeepMine,
    /// Discard the pending write and accept theirs; no network write.
    UseLatest,
    /// Three-way merge; clean merges commit, conflicted merges are surfaced.
    Merge,
    /// Same mechanism as keep-mine, gated behind explicit confirmation.
    /// Used when merge reports "not mergeable".
    Force { confirmed: bool },
}

impl ResolutionAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::KeepMine => "keep_mine",
            Self::UseLatest => "use_latest",
            Self::Merge => "merge",
            Self::Force { .. } => "force",
        }
    }
}

/// Terminal status of one resolve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStatus {
    /// The conflict is gone; `new_version` carries the committed version.
    Resolved,
    /// The resubmission hit a fresh conflict; a new envelope is presented.
    Reconflicted,
    /// The merge produced conflict sections; inspect before committing.
    MergePending,
}

/// Outcome returned to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub status: ResolutionStatus,
    pub new_version: Option<i64>,
    /// Annotated merge result when `status == MergePending`.
    pub merge: Option<MergeOutcome>,
}

/// Dialog-flow states for one entity's conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionState {
    #[default]
    Idle,
    ConflictPresented,
    Resolving,
    Resolved,
}

/// Applies resolution actions and re-drives the queue with the outcome.
pub struct ResolutionCoordinator {
    queue: QueueStore,
    versions: VersionStore,
    api: Arc<RemoteApiClient>,
    telemetry: Telemetry,
    max_merge_size: usize,
    /// FIFO of unresolved envelopes per entity; only the front is presented.
    pending: HashMap<EntityId, VecDeque<ConflictEnvelope>>,
    states: HashMap<EntityId, ResolutionState>,
}

impl ResolutionCoordinator {
    pub fn new(
        queue: QueueStore,
        versions: VersionStore,
        api: Arc<RemoteApiClient>,
        telemetry: Telemetry,
        max_merge_size: usize,
    ) -> Self {
        Self {
            queue,
            versions,
            api,
            telemetry,
            max_merge_size,
            pending: HashMap::new(),
            states: HashMap::new(),
        }
    }

    /// Accepts a new envelope from the detector. If the entity already has
    /// an unresolved conflict, this one queues behind it.
    pub fn present(&mut self, envelope: ConflictEnvelope) {
        let entity_id = envelope.entity_id;
        let queue = self.pending.entry(entity_id).or_default();
        queue.push_back(envelope);
        if queue.len() == 1 {
            self.states.insert(entity_id, ResolutionState::ConflictPresented);
        } else {
            debug!(
                entity = %entity_id,
                queued = queue.len() - 1,
                "conflict queued behind an unresolved envelope"
            );
        }
    }

    /// The envelope currently presented for an entity, if any.
    #[must_use]
    pub fn current(&self, entity_id: EntityId) -> Option<&ConflictEnvelope> {
        self.pending.get(&entity_id).and_then(VecDeque::front)
    }

    /// Dialog state for an entity.
    #[must_use]
    pub fn state(&self, entity_id: EntityId) -> ResolutionState {
        self.states.get(&entity_id).copied().unwrap_or_default()
    }

    /// Entities with at least one unresolved envelope.
    #[must_use]
    pub fn entities_in_conflict(&self) -> Vec<EntityId> {
        self.pending
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Dismisses the presented envelope without resolving it.
    ///
    /// The underlying operation stays `conflicted`; only the next explicit
    /// flush re-drives it — never a hot retry loop.
    pub fn dismiss(&mut self, envelope_id: Uuid) -> SyncResult<()> {
        let entity_id = self.entity_for_envelope(envelope_id)?;
        let queue = self.pending.entry(entity_id).or_default();
        queue.pop_front();
        self.advance(entity_id, ResolutionState::Idle);
        debug!(entity = %entity_id, "conflict dismissed, operation stays parked");
        Ok(())
    }

    /// Applies a resolution action to the presented envelope.
    ///
    /// For `Merge`, `payload` optionally carries an inspected merged document
    /// to commit (the post-inspection step after a `MergePending` outcome).
    pub async fn resolve(
        &mut self,
        envelope_id: Uuid,
        action: ResolutionAction,
        payload: Option<Value>,
    ) -> SyncResult<Resolution> {
        let entity_id = self.entity_for_envelope(envelope_id)?;
        let envelope = self
            .pending
            .get(&entity_id)
            .and_then(|q| q.front())
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("envelope {envelope_id}")))?;

        self.states.insert(entity_id, ResolutionState::Resolving);

        let result = match action {
            ResolutionAction::UseLatest => self.use_latest(&envelope),
            ResolutionAction::KeepMine => {
                self.commit(&envelope, envelope.mine_content.clone(), action)
                    .await
            }
            ResolutionAction::Force { confirmed } => {
                if !confirmed {
                    Err(SyncError::Validation(
                        "force resolution requires explicit confirmation".into(),
                    ))
                } else {
                    self.commit(&envelope, envelope.mine_content.clone(), action)
                        .await
                }
            }
            ResolutionAction::Merge => match payload {
                // Post-inspection commit of an already-merged document.
                Some(merged) => self.commit(&envelope, merged, action).await,
                None => self.merge_and_maybe_commit(&envelope).await,
            },
        };

        match &result {
            Ok(resolution) => {
                self.telemetry.emit(
                    "conflict_resolved",
                    telemetry_meta! {
                        "action" => action.as_str(),
                        "status" => format!("{:?}", resolution.status),
                        "entity_id" => entity_id.to_string(),
                    },
                );
            }
            Err(e) => {
                // Leave the envelope presented so the user can try again.
                self.states
                    .insert(entity_id, ResolutionState::ConflictPresented);
                self.telemetry.emit(
                    "resolution_failed",
                    telemetry_meta! {
                        "action" => action.as_str(),
                        "error" => e.to_string(),
                        "entity_id" => entity_id.to_string(),
                    },
                );
            }
        }

        result
    }

    /// use-latest: accept theirs, drop the pending write, no network call.
    fn use_latest(&mut self, envelope: &ConflictEnvelope) -> SyncResult<Resolution> {
        self.finish_operation(envelope)?;

        // Make the authoritative content visible locally if we have not yet
        // recorded that version.
        let current = self
            .versions
            .current(envelope.entity_id, &envelope.resource_table)?
            .map(|r| r.version)
            .unwrap_or(0);
        if envelope.theirs_version > current {
            self.versions.record(
                envelope.entity_id,
                &envelope.resource_table,
                envelope.theirs_version,
                &envelope.theirs_content,
            )?;
        }

        self.pop_front(envelope.entity_id);
        info!(entity = %envelope.entity_id, "conflict resolved by accepting latest");
        Ok(Resolution {
            status: ResolutionStatus::Resolved,
            new_version: Some(envelope.theirs_version),
            merge: None,
        })
    }

    /// merge: run the engine; clean merges commit immediately, conflicted
    /// merges are surfaced for inspection.
    async fn merge_and_maybe_commit(
        &mut self,
        envelope: &ConflictEnvelope,
    ) -> SyncResult<Resolution> {
        let base = Document::from_value(&envelope.base_content);
        let mine = Document::from_value(&envelope.mine_content);
        let theirs = Document::from_value(&envelope.theirs_content);

        let (Some(base), Some(mine), Some(theirs)) = (base, mine, theirs) else {
            return Err(SyncError::MergeNotPossible(
                "contents are not block documents".into(),
            ));
        };

        let outcome = merge(&base, &mine, &theirs, self.max_merge_size)?;

        if outcome.is_clean() {
            let merged = outcome.document.to_value();
            return self
                .commit(envelope, merged, ResolutionAction::Merge)
                .await;
        }

        debug!(
            entity = %envelope.entity_id,
            conflict_sections = outcome.conflict_sections,
            "merge produced conflict sections, surfacing for inspection"
        );
        self.states
            .insert(envelope.entity_id, ResolutionState::ConflictPresented);
        Ok(Resolution {
            status: ResolutionStatus::MergePending,
            new_version: None,
            merge: Some(outcome),
        })
    }

    /// Re-submits `content` with the base version forced to theirs.
    async fn commit(
        &mut self,
        envelope: &ConflictEnvelope,
        content: Value,
        action: ResolutionAction,
    ) -> SyncResult<Resolution> {
        let mut op = match self.queue.get(envelope.operation_id)? {
            Some(op) => op,
            None => {
                return Err(SyncError::NotFound(format!(
                    "operation {} behind envelope {}",
                    envelope.operation_id, envelope.id
                )))
            }
        };
        op.payload = content.clone();
        op.base_version = envelope.theirs_version;
        op.content_hash = Some(content_hash(&envelope.theirs_content));

        match self.api.push_write(&op).await? {
            PushOutcome::Committed { version } => {
                self.versions
                    .record(envelope.entity_id, &envelope.resource_table, version, &content)?;
                self.finish_operation(envelope)?;
                self.pop_front(envelope.entity_id);
                info!(
                    entity = %envelope.entity_id,
                    version,
                    action = action.as_str(),
                    "conflict resolved and committed"
                );
                Ok(Resolution {
                    status: ResolutionStatus::Resolved,
                    new_version: Some(version),
                    merge: None,
                })
            }
            PushOutcome::Conflict {
                current_version,
                current_content,
            } => {
                warn!(
                    entity = %envelope.entity_id,
                    current_version,
                    "resolution resubmission hit a fresh conflict"
                );
                let fresh = ConflictEnvelope {
                    id: Uuid::now_v7(),
                    operation_id: envelope.operation_id,
                    entity_id: envelope.entity_id,
                    resource_table: envelope.resource_table.clone(),
                    base_version: envelope.theirs_version,
                    base_content: envelope.theirs_content.clone(),
                    mine_content: content,
                    theirs_version: current_version,
                    diff_summary: DiffSummary::between_values(
                        &envelope.theirs_content,
                        &current_content,
                    ),
                    theirs_content: current_content,
                    created_at: Utc::now(),
                };
                if let Some(queue) = self.pending.get_mut(&envelope.entity_id) {
                    if let Some(front) = queue.front_mut() {
                        *front = fresh;
                    }
                }
                self.states
                    .insert(envelope.entity_id, ResolutionState::ConflictPresented);
                Ok(Resolution {
                    status: ResolutionStatus::Reconflicted,
                    new_version: None,
                    merge: None,
                })
            }
        }
    }

    /// Deletes the parked operation behind a resolved envelope. Tolerates the
    /// row already being gone (e.g. resolved from an explicit-batch flush).
    fn finish_operation(&self, envelope: &ConflictEnvelope) -> SyncResult<()> {
        match self.queue.mark_succeeded(envelope.operation_id) {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn pop_front(&mut self, entity_id: EntityId) {
        if let Some(queue) = self.pending.get_mut(&entity_id) {
            queue.pop_front();
        }
        self.advance(entity_id, ResolutionState::Resolved);
    }

    /// Moves to `resting`, or straight back to ConflictPresented when another
    /// envelope was queued behind the resolved one.
    fn advance(&mut self, entity_id: EntityId, resting: ResolutionState) {
        let has_next = self
            .pending
            .get(&entity_id)
            .is_some_and(|q| !q.is_empty());
        if has_next {
            self.states
                .insert(entity_id, ResolutionState::ConflictPresented);
        } else {
            self.states.insert(entity_id, resting);
        }
    }

    fn entity_for_envelope(&self, envelope_id: Uuid) -> SyncResult<EntityId> {
        self.pending
            .iter()
            .find(|(_, q)| q.front().is_some_and(|e| e.id == envelope_id))
            .map(|(id, _)| *id)
            .ok_or_else(|| SyncError::NotFound(format!("envelope {envelope_id}")))
    }
}
