//! The queued write operation model.
//!
//! A `QueueOperation` is a write made while disconnected from the
//! authoritative store. It is persisted durably, replayed once connectivity
//! returns, and carries everything the replay needs: the declared base
//! version for optimistic concurrency, an idempotency key so retries are
//! applied at most once, and a priority so urgent writes drain first.

use crate::{DeviceId, EntityId, OperationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// What kind of write an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(crate::Error::InvalidOperation(format!(
                "unknown operation kind: {other}"
            ))),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a queued operation.
///
/// `pending` rows are eligible for the next drain, `processing` rows are
/// claimed by exactly one drain, `failed` rows wait out their backoff window,
/// and `conflicted` rows are parked until a resolution re-drives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Failed,
    Conflicted,
}

impl OperationStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::Conflicted => "conflicted",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "failed" => Ok(Self::Failed),
            "conflicted" => Ok(Self::Conflicted),
            other => Err(crate::Error::InvalidOperation(format!(
                "unknown operation status: {other}"
            ))),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable write operation awaiting replay against the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    /// Logical table/collection the write targets.
    pub resource_table: String,
    pub entity_id: EntityId,
    /// The write payload. Object-shaped for create/update.
    pub payload: Value,
    /// Caller-supplied token ensuring at-most-once application.
    pub idempotency_key: String,
    pub origin_device_id: DeviceId,
    pub schema_version: u32,
    /// Higher priorities drain first.
    pub priority: i32,
    pub status: OperationStatus,
    pub retry_count: u32,
    /// Version of the entity this write was based on (optimistic concurrency).
    pub base_version: i64,
    /// Hash of the content at `base_version`, as seen by the writer.
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl QueueOperation {
    /// Creates a new pending operation with a fresh id and timestamp.
    #[must_use]
    pub fn new(
        kind: OperationKind,
        resource_table: impl Into<String>,
        entity_id: EntityId,
        payload: Value,
        idempotency_key: impl Into<String>,
        origin_device_id: DeviceId,
    ) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            resource_table: resource_table.into(),
            entity_id,
            payload,
            idempotency_key: idempotency_key.into(),
            origin_device_id,
            schema_version: 1,
            priority: 0,
            status: OperationStatus::Pending,
            retry_count: 0,
            base_version: 0,
            content_hash: None,
            created_at: Utc::now(),
            expires_at: None,
            error_message: None,
        }
    }

    /// Sets the drain priority (higher drains first).
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the declared base version and content hash for the replay's
    /// optimistic-concurrency check.
    #[must_use]
    pub fn with_base_version(mut self, version: i64, content_hash: Option<String>) -> Self {
        self.base_version = version;
        self.content_hash = content_hash;
        self
    }

    /// Sets an expiry after which the operation is dead-lettered unsent.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Structural validation applied at enqueue time.
    ///
    /// Malformed operations are rejected synchronously so they never reach
    /// the replay path.
    pub fn validate(&self) -> crate::Result<()> {
        if self.idempotency_key.trim().is_empty() {
            return Err(crate::Error::InvalidOperation(
                "idempotency_key cannot be empty".into(),
            ));
        }
        if self.resource_table.trim().is_empty() {
            return Err(crate::Error::InvalidOperation(
                "resource_table cannot be empty".into(),
            ));
        }
        if matches!(self.kind, OperationKind::Create | OperationKind::Update)
            && !self.payload.is_object()
        {
            return Err(crate::Error::InvalidOperation(format!(
                "{} payload must be a JSON object",
                self.kind
            )));
        }
        Ok(())
    }

    /// Returns true if the operation has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t < now)
    }
}

/// Why an operation was moved to the dead-letter store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Exceeded the configured retry maximum.
    MaxRetries,
    /// Expired before it could be sent.
    Expired,
    /// Structurally invalid — never retried.
    Validation,
}

impl DeadLetterReason {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxRetries => "max_retries",
            Self::Expired => "expired",
            Self::Validation => "validation",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "max_retries" => Ok(Self::MaxRetries),
            "expired" => Ok(Self::Expired),
            "validation" => Ok(Self::Validation),
            other => Err(crate::Error::InvalidOperation(format!(
                "unknown dead-letter reason: {other}"
            ))),
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation that exhausted retries or expired.
///
/// Dead letters are never deleted automatically; they wait for manual retry
/// or discard with full context retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterOperation {
    pub operation: QueueOperation,
    pub reason: DeadLetterReason,
    pub dead_lettered_at: DateTime<Utc>,
}
