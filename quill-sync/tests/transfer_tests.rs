use pretty_assertions::assert_eq;
use quill_storage::QueueStore;
use quill_sync::transfer::{export, import, ImportOutcome, EXPORT_FORMAT_VERSION};
use quill_sync::SyncError;
use quill_types::{DeviceId, EntityId, OperationKind, OperationStatus, QueueOperation};
use serde_json::json;
use sha2::{Digest, Sha256};

fn make_op(key: &str) -> QueueOperation {
    QueueOperation::new(
        OperationKind::Update,
        "pages",
        EntityId::new(),
        json!({"title": key}),
        key,
        DeviceId::new(),
    )
}

fn populated_store(keys: &[&str]) -> QueueStore {
    let store = QueueStore::open_in_memory().unwrap();
    for key in keys {
        store.enqueue(&make_op(key)).unwrap();
    }
    store
}

#[test]
fn export_captures_operations_and_statistics() {
    let store = populated_store(&["a", "b", "c"]);
    let snapshot = export(&store).unwrap();

    assert_eq!(snapshot.version, EXPORT_FORMAT_VERSION);
    assert_eq!(snapshot.operations.len(), 3);
    assert_eq!(snapshot.metadata.statistics.total, 3);
    assert_eq!(snapshot.metadata.statistics.by_status.get("pending"), Some(&3));
    assert_eq!(snapshot.metadata.dead_letter_count, 0);
    assert_eq!(snapshot.checksum, snapshot.metadata.checksum);
    assert!(!snapshot.checksum.is_empty());
}

#[test]
fn export_import_roundtrip_into_an_empty_store() {
    let source = populated_store(&["a", "b"]);
    let snapshot = export(&source).unwrap();

    let target = QueueStore::open_in_memory().unwrap();
    let report = import(&target, &snapshot, false).unwrap();

    assert!(report.valid);
    assert_eq!(report.imported, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(target.len().unwrap(), 2);
}

#[test]
fn reimport_skips_every_seen_key() {
    let source = populated_store(&["a", "b"]);
    let snapshot = export(&source).unwrap();

    let target = QueueStore::open_in_memory().unwrap();
    import(&target, &snapshot, false).unwrap();
    let second = import(&target, &snapshot, false).unwrap();

    assert!(second.valid);
    assert_eq!(second.imported, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(target.len().unwrap(), 2);
    assert!(second
        .results
        .iter()
        .all(|r| r.outcome == ImportOutcome::Skipped));
}

#[test]
fn checksum_tampering_fails_before_any_write() {
    let source = populated_store(&["a"]);
    let mut snapshot = export(&source).unwrap();
    snapshot.operations[0].payload = json!({"title": "tampered"});

    let target = QueueStore::open_in_memory().unwrap();
    let err = import(&target, &snapshot, false).unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert!(target.is_empty().unwrap());
}

#[test]
fn unsupported_versions_are_rejected() {
    let source = populated_store(&["a"]);
    let mut snapshot = export(&source).unwrap();
    snapshot.version = EXPORT_FORMAT_VERSION + 1;

    let target = QueueStore::open_in_memory().unwrap();
    assert!(matches!(
        import(&target, &snapshot, false),
        Err(SyncError::Validation(_))
    ));
}

#[test]
fn validate_only_reports_without_mutating() {
    let source = populated_store(&["a", "b"]);
    let snapshot = export(&source).unwrap();

    let target = populated_store(&["b"]);
    let report = import(&target, &snapshot, true).unwrap();

    assert!(report.valid);
    assert_eq!(report.imported, 1);
    assert_eq!(report.skipped, 1);
    // The dry run left the target untouched.
    assert_eq!(target.len().unwrap(), 1);
}

#[test]
fn malformed_operations_are_flagged_but_do_not_abort() {
    let source = populated_store(&["good"]);
    let mut snapshot = export(&source).unwrap();
    // Break one operation after export, then fix the checksum so only
    // per-operation validation trips.
    let mut bad = make_op("bad");
    bad.resource_table = String::new();
    snapshot.operations.push(bad);
    let reserialized = serde_json::to_vec(&snapshot.operations).unwrap();
    snapshot.checksum = hex::encode(Sha256::digest(&reserialized));

    let target = QueueStore::open_in_memory().unwrap();
    let report = import(&target, &snapshot, false).unwrap();

    assert!(!report.valid);
    assert_eq!(report.imported, 1);
    assert_eq!(target.len().unwrap(), 1);
    assert!(report
        .results
        .iter()
        .any(|r| r.outcome == ImportOutcome::Invalid));
}

#[test]
fn claimed_rows_import_as_pending() {
    let source = populated_store(&["a"]);
    source.dequeue_batch(1, chrono::Utc::now()).unwrap();
    let snapshot = export(&source).unwrap();
    assert_eq!(snapshot.operations[0].status, OperationStatus::Processing);

    let target = QueueStore::open_in_memory().unwrap();
    import(&target, &snapshot, false).unwrap();
    let imported = target.all_operations().unwrap();
    assert_eq!(imported[0].status, OperationStatus::Pending);
}

#[test]
fn export_payload_survives_json_serialization() {
    let source = populated_store(&["a"]);
    let snapshot = export(&source).unwrap();
    let text = serde_json::to_string(&snapshot).unwrap();
    let back: quill_sync::QueueExport = serde_json::from_str(&text).unwrap();
    assert_eq!(snapshot, back);
}
