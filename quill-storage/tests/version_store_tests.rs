use pretty_assertions::assert_eq;
use quill_storage::{StorageError, VersionStore};
use quill_types::{content_hash, EntityId};
use serde_json::json;

#[test]
fn append_assigns_strictly_increasing_versions() {
    let store = VersionStore::open_in_memory().unwrap();
    let entity = EntityId::new();

    let v1 = store.append(entity, "body", &json!({"n": 1})).unwrap();
    let v2 = store.append(entity, "body", &json!({"n": 2})).unwrap();
    let v3 = store.append(entity, "body", &json!({"n": 3})).unwrap();

    assert_eq!(v1.version, 1);
    assert_eq!(v2.version, 2);
    assert_eq!(v3.version, 3);
}

#[test]
fn sub_resources_version_independently() {
    let store = VersionStore::open_in_memory().unwrap();
    let entity = EntityId::new();

    store.append(entity, "body", &json!({"n": 1})).unwrap();
    store.append(entity, "body", &json!({"n": 2})).unwrap();
    let title = store.append(entity, "title", &json!("hi")).unwrap();

    assert_eq!(title.version, 1);
    assert_eq!(store.current(entity, "body").unwrap().unwrap().version, 2);
}

#[test]
fn record_accepts_server_versions_above_current() {
    let store = VersionStore::open_in_memory().unwrap();
    let entity = EntityId::new();

    store.record(entity, "body", 7, &json!({"n": 7})).unwrap();
    let current = store.current(entity, "body").unwrap().unwrap();
    assert_eq!(current.version, 7);

    // Gaps are fine; the sequence only has to increase.
    store.record(entity, "body", 12, &json!({"n": 12})).unwrap();
    assert_eq!(store.current(entity, "body").unwrap().unwrap().version, 12);
}

#[test]
fn record_rejects_stale_versions() {
    let store = VersionStore::open_in_memory().unwrap();
    let entity = EntityId::new();
    store.record(entity, "body", 5, &json!({"n": 5})).unwrap();

    let same = store.record(entity, "body", 5, &json!({"n": 5}));
    assert!(matches!(same, Err(StorageError::StaleVersion(_))));
    let below = store.record(entity, "body", 3, &json!({"n": 3}));
    assert!(matches!(below, Err(StorageError::StaleVersion(_))));

    // Rejections leave history untouched.
    assert_eq!(store.history(entity, "body").unwrap().len(), 1);
}

#[test]
fn current_and_at_return_none_for_unknown_entities() {
    let store = VersionStore::open_in_memory().unwrap();
    let entity = EntityId::new();
    assert!(store.current(entity, "body").unwrap().is_none());
    assert!(store.at(entity, "body", 1).unwrap().is_none());
}

#[test]
fn at_fetches_exact_historical_content() {
    let store = VersionStore::open_in_memory().unwrap();
    let entity = EntityId::new();
    store.append(entity, "body", &json!({"n": 1})).unwrap();
    store.append(entity, "body", &json!({"n": 2})).unwrap();

    let first = store.at(entity, "body", 1).unwrap().unwrap();
    assert_eq!(first.content, json!({"n": 1}));
    assert_eq!(first.content_hash, content_hash(&json!({"n": 1})));
    assert!(store.at(entity, "body", 3).unwrap().is_none());
}

#[test]
fn history_is_ascending_and_complete() {
    let store = VersionStore::open_in_memory().unwrap();
    let entity = EntityId::new();
    for n in 1..=4 {
        store.append(entity, "body", &json!({"n": n})).unwrap();
    }

    let history = store.history(entity, "body").unwrap();
    assert_eq!(history.len(), 4);
    let versions: Vec<i64> = history.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
}

#[test]
fn compare_surfaces_contents_hashes_and_diff() {
    let store = VersionStore::open_in_memory().unwrap();
    let entity = EntityId::new();
    let a = json!({"blocks": [{"id": "b0", "content": {"text": "A"}}]});
    let b = json!({"blocks": [{"id": "b0", "content": {"text": "B"}}]});
    store.append(entity, "body", &a).unwrap();
    store.append(entity, "body", &b).unwrap();

    let cmp = store.compare(entity, "body", 1, 2).unwrap();
    assert_eq!(cmp.v1_content, a);
    assert_eq!(cmp.v2_content, b);
    assert_ne!(cmp.v1_hash, cmp.v2_hash);
    assert_eq!(cmp.diff_summary.blocks_changed, 1);
}

#[test]
fn compare_missing_version_is_not_found() {
    let store = VersionStore::open_in_memory().unwrap();
    let entity = EntityId::new();
    store.append(entity, "body", &json!({})).unwrap();
    assert!(matches!(
        store.compare(entity, "body", 1, 2),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("versions.db");
    let entity = EntityId::new();

    {
        let store = VersionStore::open(&path).unwrap();
        store.append(entity, "body", &json!({"n": 1})).unwrap();
    }

    let store = VersionStore::open(&path).unwrap();
    let current = store.current(entity, "body").unwrap().unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(current.content, json!({"n": 1}));
}
