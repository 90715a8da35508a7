// ABOUTME: Tests for the on-disk sync state file
// ABOUTME: Reopen, crash recovery, corrupt files, and state written by older loaders

use chrono::{TimeZone, Utc};
use search_replicator::replication::{initial_watermark, Cursor, JsonFileStorage, StateStore};
use serde_json::{json, Value};
use std::fs;
use tempfile::tempdir;

#[tokio::test]
async fn test_cursor_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let modified = Utc.with_ymd_and_hms(2021, 6, 16, 20, 14, 9).unwrap();

    let mut store = StateStore::open(&path).await;
    store.ensure_cursor().await.unwrap();
    store.record_batch(100, Some(modified));
    store.persist().await.unwrap();
    drop(store);

    // Process restarted mid-window
    let mut store = StateStore::open(&path).await;
    let cursor = store.ensure_cursor().await.unwrap();
    assert_eq!(
        cursor,
        Cursor {
            watermark: initial_watermark(),
            offset: 100
        }
    );
    assert_eq!(store.pending_watermark(), Some(modified));

    let closed = store.complete_pass(None);
    store.persist().await.unwrap();
    assert_eq!(
        closed,
        Cursor {
            watermark: modified,
            offset: 0
        }
    );

    let reopened = StateStore::open(&path).await;
    assert_eq!(reopened.cursor(), Some(closed));
    assert!(reopened.pending_watermark().is_none());
}

#[tokio::test]
async fn test_state_file_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("storage.json");

    let mut store = StateStore::open(&path).await;
    store.ensure_cursor().await.unwrap();
    store.complete_pass(Some(Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap()));
    store.persist().await.unwrap();

    let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["watermark"], json!("2023-01-02T03:04:05.000000Z"));
    assert_eq!(raw["offset"], json!(0));
    assert!(raw.get("pending_watermark").is_none());

    // No temp file left behind
    assert!(!dir.path().join("storage.json.tmp").exists());
}

#[tokio::test]
async fn test_corrupt_state_file_starts_fresh() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("storage.json");
    fs::write(&path, "{ this is not json").unwrap();

    let mut store = StateStore::open(&path).await;
    assert!(store.cursor().is_none());

    let cursor = store.ensure_cursor().await.unwrap();
    assert_eq!(cursor, Cursor::default());

    // The corrupt file was replaced with a readable one
    let reopened = StateStore::open(&path).await;
    assert_eq!(reopened.cursor(), Some(Cursor::default()));
}

#[tokio::test]
async fn test_unparseable_watermark_is_reset() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("storage.json");
    fs::write(&path, r#"{"watermark": "last tuesday", "offset": 40}"#).unwrap();

    let mut store = StateStore::open(&path).await;
    let cursor = store.ensure_cursor().await.unwrap();
    assert_eq!(cursor, Cursor::default());
}

#[tokio::test]
async fn test_legacy_state_formats_are_accepted() {
    let dir = tempdir().unwrap();

    let bare_date = dir.path().join("bare.json");
    fs::write(&bare_date, r#"{"watermark": "1880-01-01", "offset": 0}"#).unwrap();
    let store = StateStore::open(&bare_date).await;
    assert_eq!(store.cursor(), Some(Cursor::default()));

    let with_offset = dir.path().join("pg.json");
    fs::write(
        &with_offset,
        r#"{"watermark": "2021-06-16 23:14:09.000000+03:00", "offset": 300}"#,
    )
    .unwrap();
    let store = StateStore::open(&with_offset).await;
    assert_eq!(
        store.cursor(),
        Some(Cursor {
            watermark: Utc.with_ymd_and_hms(2021, 6, 16, 20, 14, 9).unwrap(),
            offset: 300
        })
    );
}

#[tokio::test]
async fn test_unknown_keys_are_preserved() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("storage.json");
    fs::write(&path, r#"{"operator_note": "reindexed 2023-05", "offset": 0}"#).unwrap();

    let mut store = StateStore::open(&path).await;
    store.ensure_cursor().await.unwrap();

    let raw = JsonFileStorage::new(&path).retrieve().await.unwrap();
    assert_eq!(raw["operator_note"], json!("reindexed 2023-05"));
    assert!(raw.contains_key("watermark"));
}

#[tokio::test]
async fn test_missing_parent_directories_are_created() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("var/lib/replicator/storage.json");

    let mut store = StateStore::open(&path).await;
    store.ensure_cursor().await.unwrap();

    assert!(path.exists());
}
