//! Append-only version store — the authoritative record of entity versions.
//!
//! Every successful committed write appends a row; versions per
//! entity + sub-resource strictly increase and rows never mutate. Components
//! needing the authoritative "current version" read it fresh from here,
//! never from a cached copy carried across a network round trip.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use duckdb::{params, Connection};
use quill_types::{content_hash, DiffSummary, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One immutable version of an entity's sub-resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub entity_id: EntityId,
    pub sub_resource: String,
    pub version: i64,
    pub content: Value,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Side-by-side comparison of two versions, for the conflict detector and
/// inspection tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub v1_content: Value,
    pub v1_hash: String,
    pub v2_content: Value,
    pub v2_hash: String,
    pub diff_summary: DiffSummary,
}

/// Append-only store of entity version history.
#[derive(Clone)]
pub struct VersionStore {
    conn: Arc<Mutex<Connection>>,
}

impl VersionStore {
    /// Opens or creates a version store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, "128MB", 1)?;
        initialize_version_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory version store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_version_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Appends the next version for an entity's sub-resource.
    ///
    /// The version number is computed under the connection lock, so versions
    /// form a strictly increasing sequence with no duplicates.
    pub fn append(
        &self,
        entity_id: EntityId,
        sub_resource: &str,
        content: &Value,
    ) -> StorageResult<VersionRecord> {
        let conn = self.conn.lock().unwrap();
        let next: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM versions \
             WHERE entity_id = ? AND sub_resource = ?",
            params![entity_id.to_string(), sub_resource],
            |row| row.get(0),
        )?;
        insert_version(&conn, entity_id, sub_resource, next, content)
    }

    /// Records a version assigned by the remote API.
    ///
    /// Rejects anything at or below the current version — history is
    /// append-only and strictly increasing.
    pub fn record(
        &self,
        entity_id: EntityId,
        sub_resource: &str,
        version: i64,
        content: &Value,
    ) -> StorageResult<VersionRecord> {
        let conn = self.conn.lock().unwrap();
        let current: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM versions \
             WHERE entity_id = ? AND sub_resource = ?",
            params![entity_id.to_string(), sub_resource],
            |row| row.get(0),
        )?;
        if version <= current {
            return Err(StorageError::StaleVersion(format!(
                "version {version} for entity {entity_id} is not above current {current}"
            )));
        }
        insert_version(&conn, entity_id, sub_resource, version, content)
    }

    /// Latest version record, or None if the entity has no history.
    pub fn current(
        &self,
        entity_id: EntityId,
        sub_resource: &str,
    ) -> StorageResult<Option<VersionRecord>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT entity_id, sub_resource, version, content_json, content_hash, created_at \
             FROM versions WHERE entity_id = ? AND sub_resource = ? \
             ORDER BY version DESC LIMIT 1",
            params![entity_id.to_string(), sub_resource],
            row_to_version,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Exact historical version, or None.
    pub fn at(
        &self,
        entity_id: EntityId,
        sub_resource: &str,
        version: i64,
    ) -> StorageResult<Option<VersionRecord>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT entity_id, sub_resource, version, content_json, content_hash, created_at \
             FROM versions WHERE entity_id = ? AND sub_resource = ? AND version = ?",
            params![entity_id.to_string(), sub_resource, version],
            row_to_version,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Full ascending history for an entity's sub-resource.
    pub fn history(
        &self,
        entity_id: EntityId,
        sub_resource: &str,
    ) -> StorageResult<Vec<VersionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT entity_id, sub_resource, version, content_json, content_hash, created_at \
             FROM versions WHERE entity_id = ? AND sub_resource = ? ORDER BY version ASC",
        )?;
        let records = stmt
            .query_map(params![entity_id.to_string(), sub_resource], row_to_version)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Compares two stored versions of an entity.
    pub fn compare(
        &self,
        entity_id: EntityId,
        sub_resource: &str,
        v1: i64,
        v2: i64,
    ) -> StorageResult<VersionComparison> {
        let first = self.at(entity_id, sub_resource, v1)?.ok_or_else(|| {
            StorageError::NotFound(format!("version {v1} of entity {entity_id}"))
        })?;
        let second = self.at(entity_id, sub_resource, v2)?.ok_or_else(|| {
            StorageError::NotFound(format!("version {v2} of entity {entity_id}"))
        })?;

        Ok(VersionComparison {
            diff_summary: DiffSummary::between_values(&first.content, &second.content),
            v1_content: first.content,
            v1_hash: first.content_hash,
            v2_content: second.content,
            v2_hash: second.content_hash,
        })
    }
}

fn insert_version(
    conn: &Connection,
    entity_id: EntityId,
    sub_resource: &str,
    version: i64,
    content: &Value,
) -> StorageResult<VersionRecord> {
    let now = Utc::now();
    let hash = content_hash(content);
    conn.execute(
        "INSERT INTO versions (entity_id, sub_resource, version, content_json, content_hash, \
         created_at) VALUES (?, ?, ?, ?, ?, ?)",
        params![
            entity_id.to_string(),
            sub_resource,
            version,
            content.to_string(),
            hash,
            now.timestamp_millis(),
        ],
    )?;
    debug!(entity = %entity_id, version, "appended version record");
    Ok(VersionRecord {
        entity_id,
        sub_resource: sub_resource.to_string(),
        version,
        content: content.clone(),
        content_hash: hash,
        created_at: now,
    })
}

fn row_to_version(row: &duckdb::Row<'_>) -> duckdb::Result<VersionRecord> {
    let entity_id_str: String = row.get(0)?;
    let sub_resource: String = row.get(1)?;
    let version: i64 = row.get(2)?;
    let content_json: String = row.get(3)?;
    let content_hash: String = row.get(4)?;
    let created_at: i64 = row.get(5)?;

    Ok(VersionRecord {
        entity_id: entity_id_str.parse().unwrap_or_default(),
        sub_resource,
        version,
        content: serde_json::from_str(&content_json).unwrap_or(Value::Null),
        content_hash,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
    })
}

fn initialize_version_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS versions (
            entity_id VARCHAR NOT NULL,
            sub_resource VARCHAR NOT NULL,
            version BIGINT NOT NULL,
            content_json TEXT NOT NULL,
            content_hash VARCHAR NOT NULL,
            created_at BIGINT NOT NULL,
            PRIMARY KEY (entity_id, sub_resource, version)
        );
        CREATE INDEX IF NOT EXISTS idx_versions_entity ON versions(entity_id, sub_resource);
        "#,
    )?;
    Ok(())
}
