// ABOUTME: Durable cursor state for incremental replication
// ABOUTME: Key/value snapshot persisted as JSON, plus typed watermark/offset accessors

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const WATERMARK_KEY: &str = "watermark";
pub const OFFSET_KEY: &str = "offset";
pub const PENDING_WATERMARK_KEY: &str = "pending_watermark";

/// Watermark used before anything has been replicated; older than any film work.
pub fn initial_watermark() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1880, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Position of the replicator in the source change stream.
///
/// Rows with `modified > watermark` are eligible; the first `offset` of them
/// (in change-query order) were already loaded during the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub watermark: DateTime<Utc>,
    pub offset: u64,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            watermark: initial_watermark(),
            offset: 0,
        }
    }
}

/// Reads and writes the whole state snapshot to one JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored snapshot. A missing file is an empty snapshot.
    pub async fn retrieve(&self) -> Result<Map<String, Value>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Map::new());
        }
        let contents = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read sync state from {:?}", self.path))?;
        let state: Map<String, Value> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse sync state from {:?}", self.path))?;
        Ok(state)
    }

    /// Overwrite the stored snapshot via a sibling temp file and rename.
    pub async fn save(&self, state: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let contents =
            serde_json::to_string_pretty(state).context("Failed to serialize sync state")?;
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, contents)
            .await
            .with_context(|| format!("Failed to write sync state to {:?}", tmp_path))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to move sync state into {:?}", self.path))?;
        Ok(())
    }
}

/// In-memory state snapshot backed by a [`JsonFileStorage`].
///
/// Single writer: only the sync loop mutates it, so no locking.
#[derive(Debug)]
pub struct StateStore {
    storage: JsonFileStorage,
    state: Map<String, Value>,
}

impl StateStore {
    /// Open the store. An unreadable or corrupt file is treated as empty state.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let storage = JsonFileStorage::new(path);
        let state = match storage.retrieve().await {
            Ok(state) => {
                tracing::info!("Loaded sync state from {:?}", storage.path());
                state
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load sync state from {:?}: {:#}. Starting fresh.",
                    storage.path(),
                    e
                );
                Map::new()
            }
        };
        Self { storage, state }
    }

    pub fn path(&self) -> &Path {
        self.storage.path()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.state.insert(key.to_string(), value.into());
    }

    fn remove(&mut self, key: &str) {
        self.state.remove(key);
    }

    /// Write the full snapshot, replacing whatever was stored before.
    pub async fn persist(&self) -> Result<()> {
        self.storage.save(&self.state).await
    }

    /// Typed view of the stored cursor, `None` when no usable watermark is stored.
    pub fn cursor(&self) -> Option<Cursor> {
        let watermark = self.timestamp(WATERMARK_KEY)?;
        let offset = self.get(OFFSET_KEY).and_then(Value::as_u64).unwrap_or(0);
        Some(Cursor { watermark, offset })
    }

    /// Highest modification time loaded during the unfinished window, if any.
    pub fn pending_watermark(&self) -> Option<DateTime<Utc>> {
        self.timestamp(PENDING_WATERMARK_KEY)
    }

    /// Return the cursor, initializing and persisting the default one if absent.
    pub async fn ensure_cursor(&mut self) -> Result<Cursor> {
        if let Some(cursor) = self.cursor() {
            return Ok(cursor);
        }
        if self.get(WATERMARK_KEY).is_some() {
            tracing::warn!(
                "Stored watermark {:?} is not a recognizable timestamp; resetting cursor",
                self.get(WATERMARK_KEY)
            );
        }

        let cursor = Cursor::default();
        self.write_cursor(&cursor);
        self.remove(PENDING_WATERMARK_KEY);
        self.persist().await?;
        tracing::info!("Initialized sync cursor at {}", cursor.watermark);
        Ok(cursor)
    }

    /// Record a loaded batch: the window offset moves to `offset` and the
    /// pending watermark to the last row's modification time.
    pub fn record_batch(&mut self, offset: u64, last_modified: Option<DateTime<Utc>>) {
        self.set(OFFSET_KEY, offset);
        if let Some(modified) = last_modified {
            let pending = match self.pending_watermark() {
                Some(current) if current > modified => current,
                _ => modified,
            };
            self.set(PENDING_WATERMARK_KEY, timestamp_value(pending));
        }
    }

    /// Close the current window.
    ///
    /// When anything was loaded in this window (this pass or a resumed one),
    /// the watermark advances to the newest loaded modification time and the
    /// offset resets to 0. With nothing loaded the cursor is left untouched.
    /// The watermark never moves backward.
    pub fn complete_pass(&mut self, observed_max: Option<DateTime<Utc>>) -> Cursor {
        let current = self.cursor().unwrap_or_default();
        let high = match (observed_max, self.pending_watermark()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let Some(high) = high else {
            return current;
        };

        let watermark = if high < current.watermark {
            tracing::warn!(
                "Observed modification time {} is older than watermark {}; keeping watermark",
                high,
                current.watermark
            );
            current.watermark
        } else {
            high
        };

        let cursor = Cursor {
            watermark,
            offset: 0,
        };
        self.write_cursor(&cursor);
        self.remove(PENDING_WATERMARK_KEY);
        cursor
    }

    fn write_cursor(&mut self, cursor: &Cursor) {
        self.set(WATERMARK_KEY, timestamp_value(cursor.watermark));
        self.set(OFFSET_KEY, cursor.offset);
    }

    fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key).and_then(Value::as_str).and_then(parse_timestamp)
    }
}

fn timestamp_value(ts: DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]+HH:MM`, naive
/// `YYYY-MM-DD HH:MM:SS[.f]` (taken as UTC) and a bare `YYYY-MM-DD` date
/// (midnight UTC), so state files written by older loaders keep working.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&ts));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ts| Utc.from_utc_datetime(&ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(
            parse_timestamp("1880-01-01"),
            Some(Utc.with_ymd_and_hms(1880, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("2023-03-01T05:00:00Z"), Some(ts(5)));
        assert_eq!(parse_timestamp("2023-03-01 07:00:00+02:00"), Some(ts(5)));
        assert_eq!(parse_timestamp("2023-03-01 05:00:00.000000"), Some(ts(5)));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[tokio::test]
    async fn test_ensure_cursor_initializes_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = StateStore::open(&path).await;
        assert!(store.cursor().is_none());

        let cursor = store.ensure_cursor().await.unwrap();
        assert_eq!(cursor, Cursor::default());
        assert_eq!(cursor.watermark, initial_watermark());
        assert!(path.exists());

        let reopened = StateStore::open(&path).await;
        assert_eq!(reopened.cursor(), Some(Cursor::default()));
    }

    #[tokio::test]
    async fn test_record_batch_tracks_pending_maximum() {
        let dir = tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json")).await;
        store.ensure_cursor().await.unwrap();

        store.record_batch(2, Some(ts(3)));
        assert_eq!(store.cursor().unwrap().offset, 2);
        assert_eq!(store.pending_watermark(), Some(ts(3)));

        // Empty-document batch keeps the pending mark
        store.record_batch(4, None);
        assert_eq!(store.cursor().unwrap().offset, 4);
        assert_eq!(store.pending_watermark(), Some(ts(3)));
    }

    #[tokio::test]
    async fn test_complete_pass_advances_and_resets_offset() {
        let dir = tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json")).await;
        store.ensure_cursor().await.unwrap();
        store.record_batch(3, Some(ts(4)));

        let cursor = store.complete_pass(Some(ts(4)));
        assert_eq!(cursor.watermark, ts(4));
        assert_eq!(cursor.offset, 0);
        assert!(store.pending_watermark().is_none());
        assert_eq!(store.cursor(), Some(cursor));
    }

    #[tokio::test]
    async fn test_complete_pass_without_rows_keeps_cursor() {
        let dir = tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json")).await;
        let before = store.ensure_cursor().await.unwrap();

        let after = store.complete_pass(None);
        assert_eq!(before, after);
        assert_eq!(store.cursor(), Some(before));
    }

    #[tokio::test]
    async fn test_complete_pass_uses_pending_after_resume() {
        let dir = tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json")).await;
        store.ensure_cursor().await.unwrap();
        store.record_batch(5, Some(ts(9)));

        // Resumed pass saw nothing new, but rows up to ts(9) were loaded earlier
        let cursor = store.complete_pass(None);
        assert_eq!(cursor.watermark, ts(9));
        assert_eq!(cursor.offset, 0);
    }

    #[tokio::test]
    async fn test_watermark_never_moves_backward() {
        let dir = tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json")).await;
        store.ensure_cursor().await.unwrap();
        store.complete_pass(Some(ts(10)));

        let cursor = store.complete_pass(Some(ts(2)));
        assert_eq!(cursor.watermark, ts(10));
        assert_eq!(cursor.offset, 0);
    }

    #[tokio::test]
    async fn test_get_and_set_arbitrary_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/state.json");
        let mut store = StateStore::open(&path).await;

        assert!(store.get("note").is_none());
        store.set("note", "hello");
        assert_eq!(store.get("note"), Some(&Value::from("hello")));
        store.persist().await.unwrap();

        let reopened = StateStore::open(&path).await;
        assert_eq!(reopened.get("note"), Some(&Value::from("hello")));
    }
}
