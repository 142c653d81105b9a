//! Durable operation queue — the persistent store of pending writes.
//!
//! Rows move `pending -> processing -> deleted` on success, or
//! `pending -> dead_letters` once retries are exhausted, the TTL expires, or
//! validation fails. Claiming is an atomic status transition on the row
//! (claim pattern), so two concurrent drains never touch the same row even
//! across processes sharing the database file.
//!
//! Idempotency: the queue, the dead-letter table and the processed-key
//! ledger together remember every key ever seen, so a second enqueue with a
//! seen key is a logged no-op, never a duplicate send.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Duration, Utc};
use duckdb::{params, Connection};
use quill_types::{
    DeadLetterOperation, DeadLetterReason, DeviceId, EntityId, OperationId, OperationKind,
    OperationStatus, QueueOperation,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Base delay for the durable retry backoff schedule.
const RETRY_BACKOFF_BASE_MS: i64 = 1_000;
/// Backoff cap — a row never waits longer than this between attempts.
const RETRY_BACKOFF_CAP_MS: i64 = 60_000;

const OP_COLUMNS: &str = "id, kind, resource_table, entity_id, payload_json, idempotency_key, \
     origin_device_id, schema_version, priority, status, retry_count, base_version, \
     content_hash, created_at, expires_at, error_message";

/// Result of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The operation was persisted.
    Inserted,
    /// The idempotency key was already seen — no-op.
    Duplicate,
}

/// Persistent queue of write operations awaiting replay.
#[derive(Clone)]
pub struct QueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl QueueStore {
    /// Opens or creates a queue store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, "128MB", 1)?;
        initialize_queue_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory queue store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_queue_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Persists a new operation.
    ///
    /// Validation failures are rejected synchronously. A second insert with
    /// a seen idempotency key returns [`EnqueueOutcome::Duplicate`] without
    /// touching the queue.
    pub fn enqueue(&self, op: &QueueOperation) -> StorageResult<EnqueueOutcome> {
        op.validate()?;

        let conn = self.conn.lock().unwrap();
        if key_seen(&conn, &op.idempotency_key)? {
            debug!(
                key = %op.idempotency_key,
                "duplicate idempotency key, enqueue is a no-op"
            );
            return Ok(EnqueueOutcome::Duplicate);
        }

        conn.execute(
            &format!(
                "INSERT INTO operations ({OP_COLUMNS}, next_attempt_at, claimed_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL)"
            ),
            params![
                op.id.to_string(),
                op.kind.as_str(),
                op.resource_table,
                op.entity_id.to_string(),
                op.payload.to_string(),
                op.idempotency_key,
                op.origin_device_id.to_string(),
                op.schema_version as i64,
                op.priority as i64,
                op.status.as_str(),
                op.retry_count as i64,
                op.base_version,
                op.content_hash,
                op.created_at.timestamp_millis(),
                op.expires_at.map(|t| t.timestamp_millis()),
                op.error_message,
            ],
        )?;
        Ok(EnqueueOutcome::Inserted)
    }

    /// Atomically claims up to `limit` pending, non-expired rows ordered by
    /// priority DESC, created_at ASC, flipping them to `processing`.
    ///
    /// Only the oldest unfinished operation per entity is eligible, so
    /// per-entity causal order survives priority-driven batch composition.
    /// Rows inside their retry backoff window are skipped.
    pub fn dequeue_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<QueueOperation>> {
        let conn = self.conn.lock().unwrap();
        let now_ms = now.timestamp_millis();

        let sql = format!(
            "SELECT {OP_COLUMNS} FROM operations o \
             WHERE o.status = 'pending' \
               AND (o.expires_at IS NULL OR o.expires_at >= ?) \
               AND (o.next_attempt_at IS NULL OR o.next_attempt_at <= ?) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM operations older \
                   WHERE older.entity_id = o.entity_id \
                     AND (older.created_at < o.created_at \
                          OR (older.created_at = o.created_at AND older.id < o.id)) \
               ) \
             ORDER BY o.priority DESC, o.created_at ASC \
             LIMIT {limit}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let candidates: Vec<QueueOperation> = stmt
            .query_map(params![now_ms, now_ms], row_to_operation)?
            .filter_map(|r| r.ok())
            .collect();

        let mut claimed = Vec::with_capacity(candidates.len());
        for mut op in candidates {
            // Status guard protects against a concurrent process claiming
            // between our select and this update.
            let updated = conn.execute(
                "UPDATE operations SET status = 'processing', claimed_at = ? \
                 WHERE id = ? AND status = 'pending'",
                params![now_ms, op.id.to_string()],
            )?;
            if updated == 1 {
                op.status = OperationStatus::Processing;
                claimed.push(op);
            }
        }
        Ok(claimed)
    }

    /// Deletes a successfully replayed row and records its idempotency key
    /// in the processed ledger.
    pub fn mark_succeeded(&self, id: OperationId) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let op = fetch_operation(&conn, id)?;
        conn.execute(
            "INSERT OR IGNORE INTO processed_keys (idempotency_key, processed_at) VALUES (?, ?)",
            params![op.idempotency_key, Utc::now().timestamp_millis()],
        )?;
        conn.execute(
            "DELETE FROM operations WHERE id = ?",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Records a transient failure: bumps retry_count, stores the error and
    /// the durable `next_attempt_at` backoff stamp, and returns the row to
    /// pending — or moves it to dead-letter once retries exceed `max_retries`.
    ///
    /// Returns the dead letter if the row was escalated.
    pub fn mark_failed(
        &self,
        id: OperationId,
        error: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<DeadLetterOperation>> {
        let conn = self.conn.lock().unwrap();
        let mut op = fetch_operation(&conn, id)?;
        op.retry_count += 1;
        op.error_message = Some(error.to_string());

        if op.retry_count > max_retries {
            warn!(
                operation = %op.id,
                entity = %op.entity_id,
                retries = op.retry_count,
                "retries exhausted, moving operation to dead-letter"
            );
            let dl = insert_dead_letter(&conn, &op, DeadLetterReason::MaxRetries, now)?;
            conn.execute(
                "DELETE FROM operations WHERE id = ?",
                params![id.to_string()],
            )?;
            return Ok(Some(dl));
        }

        let next_attempt = now + retry_backoff(op.retry_count);
        conn.execute(
            "UPDATE operations SET status = 'pending', retry_count = ?, error_message = ?, \
             next_attempt_at = ?, claimed_at = NULL WHERE id = ?",
            params![
                op.retry_count as i64,
                op.error_message,
                next_attempt.timestamp_millis(),
                id.to_string(),
            ],
        )?;
        Ok(None)
    }

    /// Parks a row in `conflicted` status. Conflicted rows are never picked
    /// up by the periodic drain; an explicit flush after resolution re-drives
    /// them.
    pub fn mark_conflicted(&self, id: OperationId) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE operations SET status = 'conflicted', claimed_at = NULL WHERE id = ?",
            params![id.to_string()],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Returns a conflicted row to pending so the next flush replays it.
    pub fn requeue_conflicted(&self, id: OperationId) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE operations SET status = 'pending', next_attempt_at = NULL WHERE id = ? \
             AND status = 'conflicted'",
            params![id.to_string()],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Returns every conflicted row to pending. Called by the explicit flush
    /// trigger so resolutions re-drive parked work — never by the periodic
    /// drain.
    pub fn requeue_all_conflicted(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE operations SET status = 'pending', next_attempt_at = NULL \
             WHERE status = 'conflicted'",
            [],
        )?;
        Ok(updated)
    }

    /// Releases a claimed row back to pending without counting a failure.
    pub fn release(&self, id: OperationId) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE operations SET status = 'pending', claimed_at = NULL \
             WHERE id = ? AND status = 'processing'",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Moves every row whose TTL has lapsed to dead-letter with reason
    /// `expired`, without ever attempting to send it. Returns how many rows
    /// were swept.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {OP_COLUMNS} FROM operations \
             WHERE expires_at IS NOT NULL AND expires_at < ? AND status <> 'processing'"
        );
        let mut stmt = conn.prepare(&sql)?;
        let expired: Vec<QueueOperation> = stmt
            .query_map(params![now.timestamp_millis()], row_to_operation)?
            .filter_map(|r| r.ok())
            .collect();

        for op in &expired {
            insert_dead_letter(&conn, op, DeadLetterReason::Expired, now)?;
            conn.execute(
                "DELETE FROM operations WHERE id = ?",
                params![op.id.to_string()],
            )?;
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "swept expired operations to dead-letter");
        }
        Ok(expired.len())
    }

    /// Returns rows stuck in `processing` past the timeout back to pending
    /// (crash recovery for drains that died mid-claim).
    pub fn reclaim_stuck(&self, now: DateTime<Utc>, timeout: Duration) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (now - timeout).timestamp_millis();
        let reclaimed = conn.execute(
            "UPDATE operations SET status = 'pending', claimed_at = NULL \
             WHERE status = 'processing' AND claimed_at IS NOT NULL AND claimed_at < ?",
            params![cutoff],
        )?;
        if reclaimed > 0 {
            warn!(count = reclaimed, "reclaimed operations stuck in processing");
        }
        Ok(reclaimed)
    }

    /// Moves a structurally invalid row straight to dead-letter. Validation
    /// failures are never retried.
    pub fn dead_letter_invalid(&self, id: OperationId, error: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let mut op = fetch_operation(&conn, id)?;
        op.error_message = Some(error.to_string());
        insert_dead_letter(&conn, &op, DeadLetterReason::Validation, Utc::now())?;
        conn.execute(
            "DELETE FROM operations WHERE id = ?",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// All dead letters, oldest first. Never deleted automatically.
    pub fn dead_letters(&self) -> StorageResult<Vec<DeadLetterOperation>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {OP_COLUMNS}, reason, dead_lettered_at FROM dead_letters \
             ORDER BY dead_lettered_at ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_dead_letter)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Number of dead letters awaiting manual triage.
    pub fn dead_letter_count(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    /// Manually re-enqueues a dead letter with a reset retry count.
    ///
    /// If the idempotency key has since been processed or re-queued, the dead
    /// letter is discarded and `Duplicate` is returned.
    pub fn retry_dead_letter(&self, id: OperationId) -> StorageResult<EnqueueOutcome> {
        let op = {
            let conn = self.conn.lock().unwrap();
            let sql = format!(
                "SELECT {OP_COLUMNS}, reason, dead_lettered_at FROM dead_letters WHERE id = ?"
            );
            let result = conn.query_row(&sql, params![id.to_string()], row_to_dead_letter);
            match result {
                Ok(dl) => {
                    conn.execute(
                        "DELETE FROM dead_letters WHERE id = ?",
                        params![id.to_string()],
                    )?;
                    dl.operation
                }
                Err(duckdb::Error::QueryReturnedNoRows) => {
                    return Err(StorageError::NotFound(id.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        };

        let mut retried = op;
        retried.status = OperationStatus::Pending;
        retried.retry_count = 0;
        retried.error_message = None;
        self.enqueue(&retried)
    }

    /// Permanently discards a dead letter.
    pub fn discard_dead_letter(&self, id: OperationId) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM dead_letters WHERE id = ?",
            params![id.to_string()],
        )?;
        if deleted == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Fetches a single operation.
    pub fn get(&self, id: OperationId) -> StorageResult<Option<QueueOperation>> {
        let conn = self.conn.lock().unwrap();
        match fetch_operation(&conn, id) {
            Ok(op) => Ok(Some(op)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns true if the key exists in the queue, the dead-letter table or
    /// the processed ledger.
    pub fn contains_idempotency_key(&self, key: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        Ok(key_seen(&conn, key)?)
    }

    /// Every live operation, enqueue order.
    pub fn all_operations(&self) -> StorageResult<Vec<QueueOperation>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {OP_COLUMNS} FROM operations ORDER BY created_at ASC, id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let ops = stmt
            .query_map([], row_to_operation)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ops)
    }

    /// Unfinished operations for one entity, causal order.
    pub fn operations_for_entity(&self, entity_id: EntityId) -> StorageResult<Vec<QueueOperation>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {OP_COLUMNS} FROM operations WHERE entity_id = ? \
             ORDER BY created_at ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let ops = stmt
            .query_map(params![entity_id.to_string()], row_to_operation)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ops)
    }

    /// Number of rows eligible for a future drain.
    pub fn pending_count(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM operations WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Total live rows regardless of status.
    pub fn len(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM operations", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Returns true if no live rows remain.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Live row counts grouped by status (export statistics).
    pub fn status_counts(&self) -> StorageResult<Vec<(String, usize)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM operations GROUP BY status ORDER BY status",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(counts)
    }
}

/// Exponential backoff for the durable retry schedule: 1s, 2s, 4s... capped.
fn retry_backoff(retry_count: u32) -> Duration {
    let exp = retry_count.saturating_sub(1).min(16);
    let ms = (RETRY_BACKOFF_BASE_MS << exp).min(RETRY_BACKOFF_CAP_MS);
    Duration::milliseconds(ms)
}

fn key_seen(conn: &Connection, key: &str) -> duckdb::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM operations WHERE idempotency_key = ?) \
              + (SELECT COUNT(*) FROM dead_letters WHERE idempotency_key = ?) \
              + (SELECT COUNT(*) FROM processed_keys WHERE idempotency_key = ?)",
        params![key, key, key],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn fetch_operation(conn: &Connection, id: OperationId) -> StorageResult<QueueOperation> {
    let sql = format!("SELECT {OP_COLUMNS} FROM operations WHERE id = ?");
    match conn.query_row(&sql, params![id.to_string()], row_to_operation) {
        Ok(op) => Ok(op),
        Err(duckdb::Error::QueryReturnedNoRows) => Err(StorageError::NotFound(id.to_string())),
        Err(e) => Err(e.into()),
    }
}

fn insert_dead_letter(
    conn: &Connection,
    op: &QueueOperation,
    reason: DeadLetterReason,
    now: DateTime<Utc>,
) -> StorageResult<DeadLetterOperation> {
    conn.execute(
        &format!(
            "INSERT INTO dead_letters ({OP_COLUMNS}, reason, dead_lettered_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        params![
            op.id.to_string(),
            op.kind.as_str(),
            op.resource_table,
            op.entity_id.to_string(),
            op.payload.to_string(),
            op.idempotency_key,
            op.origin_device_id.to_string(),
            op.schema_version as i64,
            op.priority as i64,
            OperationStatus::Failed.as_str(),
            op.retry_count as i64,
            op.base_version,
            op.content_hash,
            op.created_at.timestamp_millis(),
            op.expires_at.map(|t| t.timestamp_millis()),
            op.error_message,
            reason.as_str(),
            now.timestamp_millis(),
        ],
    )?;
    let mut dead = op.clone();
    dead.status = OperationStatus::Failed;
    Ok(DeadLetterOperation {
        operation: dead,
        reason,
        dead_lettered_at: now,
    })
}

fn row_to_operation(row: &duckdb::Row<'_>) -> duckdb::Result<QueueOperation> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let resource_table: String = row.get(2)?;
    let entity_id_str: String = row.get(3)?;
    let payload_json: String = row.get(4)?;
    let idempotency_key: String = row.get(5)?;
    let device_str: String = row.get(6)?;
    let schema_version: i64 = row.get(7)?;
    let priority: i64 = row.get(8)?;
    let status_str: String = row.get(9)?;
    let retry_count: i64 = row.get(10)?;
    let base_version: i64 = row.get(11)?;
    let content_hash: Option<String> = row.get(12)?;
    let created_at: i64 = row.get(13)?;
    let expires_at: Option<i64> = row.get(14)?;
    let error_message: Option<String> = row.get(15)?;

    Ok(QueueOperation {
        id: id_str.parse().unwrap_or_default(),
        kind: OperationKind::parse(&kind_str).unwrap_or(OperationKind::Update),
        resource_table,
        entity_id: entity_id_str.parse().unwrap_or_default(),
        payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
        idempotency_key,
        origin_device_id: device_str.parse::<DeviceId>().unwrap_or_default(),
        schema_version: schema_version as u32,
        priority: priority as i32,
        status: OperationStatus::parse(&status_str).unwrap_or(OperationStatus::Pending),
        retry_count: retry_count as u32,
        base_version,
        content_hash,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
        expires_at: expires_at.and_then(DateTime::from_timestamp_millis),
        error_message,
    })
}

fn row_to_dead_letter(row: &duckdb::Row<'_>) -> duckdb::Result<DeadLetterOperation> {
    let operation = row_to_operation(row)?;
    let reason_str: String = row.get(16)?;
    let dead_lettered_at: i64 = row.get(17)?;
    Ok(DeadLetterOperation {
        operation,
        reason: DeadLetterReason::parse(&reason_str).unwrap_or(DeadLetterReason::MaxRetries),
        dead_lettered_at: DateTime::from_timestamp_millis(dead_lettered_at).unwrap_or_default(),
    })
}

fn initialize_queue_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS operations (
            id VARCHAR PRIMARY KEY,
            kind VARCHAR NOT NULL,
            resource_table VARCHAR NOT NULL,
            entity_id VARCHAR NOT NULL,
            payload_json TEXT NOT NULL,
            idempotency_key VARCHAR NOT NULL UNIQUE,
            origin_device_id VARCHAR NOT NULL,
            schema_version BIGINT NOT NULL,
            priority BIGINT NOT NULL,
            status VARCHAR NOT NULL,
            retry_count BIGINT NOT NULL,
            base_version BIGINT NOT NULL,
            content_hash VARCHAR,
            created_at BIGINT NOT NULL,
            expires_at BIGINT,
            error_message TEXT,
            next_attempt_at BIGINT,
            claimed_at BIGINT
        );
        CREATE INDEX IF NOT EXISTS idx_operations_drain
            ON operations(status, priority DESC, created_at ASC);
        CREATE INDEX IF NOT EXISTS idx_operations_entity ON operations(entity_id, created_at);

        CREATE TABLE IF NOT EXISTS dead_letters (
            id VARCHAR PRIMARY KEY,
            kind VARCHAR NOT NULL,
            resource_table VARCHAR NOT NULL,
            entity_id VARCHAR NOT NULL,
            payload_json TEXT NOT NULL,
            idempotency_key VARCHAR NOT NULL,
            origin_device_id VARCHAR NOT NULL,
            schema_version BIGINT NOT NULL,
            priority BIGINT NOT NULL,
            status VARCHAR NOT NULL,
            retry_count BIGINT NOT NULL,
            base_version BIGINT NOT NULL,
            content_hash VARCHAR,
            created_at BIGINT NOT NULL,
            expires_at BIGINT,
            error_message TEXT,
            reason VARCHAR NOT NULL,
            dead_lettered_at BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS processed_keys (
            idempotency_key VARCHAR PRIMARY KEY,
            processed_at BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}
