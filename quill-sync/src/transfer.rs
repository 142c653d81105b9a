//! Queue export and import.
//!
//! The export payload carries every live operation plus a checksum over the
//! serialized operations array, so corruption or tampering is detected
//! before an import mutates anything. Import skips idempotency keys the
//! target has already seen and supports a validate-only pass that runs every
//! check without writing.

use crate::error::{SyncError, SyncResult};
use quill_storage::{EnqueueOutcome, QueueStore};
use quill_types::{OperationStatus, QueueOperation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Current export payload version.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Statistics captured at export time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStatistics {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

/// Export metadata block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub checksum: String,
    pub statistics: ExportStatistics,
    pub dead_letter_count: usize,
}

/// Portable snapshot of the operation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueExport {
    pub version: u32,
    pub operations: Vec<QueueOperation>,
    pub metadata: ExportMetadata,
    pub checksum: String,
}

/// Per-operation import outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportOutcome {
    Imported,
    Skipped,
    Invalid,
}

/// One line of the import report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub idempotency_key: String,
    pub outcome: ImportOutcome,
}

/// Summary returned by an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub valid: bool,
    pub imported: usize,
    pub skipped: usize,
    pub results: Vec<ImportResult>,
}

/// Snapshots every live operation with an integrity checksum.
pub fn export(queue: &QueueStore) -> SyncResult<QueueExport> {
    let operations = queue.all_operations()?;
    let checksum = operations_checksum(&operations)?;

    let by_status = queue.status_counts()?.into_iter().collect::<BTreeMap<_, _>>();
    let metadata = ExportMetadata {
        checksum: checksum.clone(),
        statistics: ExportStatistics {
            total: operations.len(),
            by_status,
        },
        dead_letter_count: queue.dead_letter_count()?,
    };

    debug!(total = operations.len(), "exported operation queue");
    Ok(QueueExport {
        version: EXPORT_FORMAT_VERSION,
        operations,
        metadata,
        checksum,
    })
}

/// Imports an exported queue snapshot.
///
/// Fails before touching anything if the checksum does not match the
/// operations array. With `validate_only`, every integrity and idempotency
/// check runs but the queue is left unmodified.
pub fn import(
    queue: &QueueStore,
    export: &QueueExport,
    validate_only: bool,
) -> SyncResult<ImportReport> {
    if export.version != EXPORT_FORMAT_VERSION {
        return Err(SyncError::Validation(format!(
            "unsupported export version {}",
            export.version
        )));
    }

    let expected = operations_checksum(&export.operations)?;
    if expected != export.checksum {
        return Err(SyncError::Validation(
            "export checksum mismatch — payload corrupted or tampered".into(),
        ));
    }

    let mut report = ImportReport {
        valid: true,
        imported: 0,
        skipped: 0,
        results: Vec::with_capacity(export.operations.len()),
    };

    for op in &export.operations {
        let outcome = import_one(queue, op, validate_only)?;
        match outcome {
            ImportOutcome::Imported => report.imported += 1,
            ImportOutcome::Skipped => report.skipped += 1,
            ImportOutcome::Invalid => report.valid = false,
        }
        report.results.push(ImportResult {
            idempotency_key: op.idempotency_key.clone(),
            outcome,
        });
    }

    debug!(
        imported = report.imported,
        skipped = report.skipped,
        validate_only,
        "queue import finished"
    );
    Ok(report)
}

fn import_one(
    queue: &QueueStore,
    op: &QueueOperation,
    validate_only: bool,
) -> SyncResult<ImportOutcome> {
    if op.validate().is_err() {
        warn!(key = %op.idempotency_key, "import rejected malformed operation");
        return Ok(ImportOutcome::Invalid);
    }

    if validate_only {
        if queue.contains_idempotency_key(&op.idempotency_key)? {
            return Ok(ImportOutcome::Skipped);
        }
        return Ok(ImportOutcome::Imported);
    }

    // Imported rows always start pending; claims do not survive transport.
    let mut incoming = op.clone();
    incoming.status = OperationStatus::Pending;

    match queue.enqueue(&incoming)? {
        EnqueueOutcome::Inserted => Ok(ImportOutcome::Imported),
        EnqueueOutcome::Duplicate => Ok(ImportOutcome::Skipped),
    }
}

/// SHA-256 hex over the serialized operations array.
fn operations_checksum(operations: &[QueueOperation]) -> SyncResult<String> {
    let serialized = serde_json::to_vec(operations)?;
    Ok(hex::encode(Sha256::digest(&serialized)))
}
