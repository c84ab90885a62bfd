use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, VecSkipError};
use tracing::{debug, warn};

use crate::ChapterId;

/// Raw string key/value persistence. Every key is independent; there are no
/// multi-key transactions.
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

pub mod keys {
    use crate::ChapterId;

    pub const LAST_READ_CHAPTER: &str = "lastReadChapter";
    pub const VIP_ACCESS_CODE: &str = "vipAccessCode";

    pub fn likes(chapter: ChapterId) -> String {
        format!("likes-ch{}", chapter)
    }

    pub fn comments(chapter: ChapterId) -> String {
        format!("comments-ch{}", chapter)
    }

    pub fn scroll_pos(chapter: ChapterId) -> String {
        format!("scrollPos-{}", chapter)
    }
}

pub struct MemoryKeyValueStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.inner.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// All keys in one JSON object on disk, rewritten through a temp file on every save.
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory at {:?}", parent))?;
        }
        let entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(?path, error = %err, "discarding unreadable store file");
                BTreeMap::new()
            }
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(entries)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp store file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace store file {:?}", self.path))?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let mut file =
        File::open(path).with_context(|| format!("failed to open store file {:?}", path))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    let entries = serde_json::from_str(&buf)
        .with_context(|| format!("failed to decode store file {:?}", path))?;
    Ok(entries)
}

impl KeyValueStore for FileKeyValueStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,
    #[serde(rename = "date")]
    pub date_display: String,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
struct CommentLog(#[serde_as(as = "VecSkipError<_>")] Vec<Comment>);

/// Typed access to everything the reader persists.
///
/// Storage failures never reach callers: reads fall back to defaults and
/// writes are logged and dropped.
#[derive(Clone)]
pub struct ReaderStore {
    backend: Arc<dyn KeyValueStore>,
}

impl ReaderStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.backend.load(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "store read failed");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Err(err) = self.backend.save(key, value) {
            warn!(key, error = %err, "store write failed");
        }
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = %raw, "ignoring malformed stored value");
                None
            }
        }
    }

    pub fn likes(&self, chapter: ChapterId) -> u64 {
        self.get_parsed(&keys::likes(chapter)).unwrap_or(0)
    }

    pub fn add_like(&self, chapter: ChapterId) -> u64 {
        let count = self.likes(chapter).saturating_add(1);
        self.set(&keys::likes(chapter), &count.to_string());
        count
    }

    pub fn comments(&self, chapter: ChapterId) -> Vec<Comment> {
        let key = keys::comments(chapter);
        let Some(raw) = self.get(&key) else {
            return Vec::new();
        };
        match serde_json::from_str::<CommentLog>(&raw) {
            Ok(log) => log.0,
            Err(err) => {
                warn!(key = %key, error = %err, "treating corrupt comment list as empty");
                Vec::new()
            }
        }
    }

    /// Appends a comment; blank text is rejected and nothing is stored.
    pub fn add_comment(
        &self,
        chapter: ChapterId,
        text: &str,
        date_display: &str,
    ) -> Option<Comment> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let comment = Comment {
            text: text.to_string(),
            date_display: date_display.to_string(),
        };
        let mut comments = self.comments(chapter);
        comments.push(comment.clone());
        match serde_json::to_string(&comments) {
            Ok(payload) => self.set(&keys::comments(chapter), &payload),
            Err(err) => warn!(chapter, error = %err, "failed to encode comments"),
        }
        debug!(chapter, "comment stored");
        Some(comment)
    }

    pub fn scroll_position(&self, chapter: ChapterId) -> Option<f32> {
        self.get_parsed::<f32>(&keys::scroll_pos(chapter))
            .filter(|offset| offset.is_finite() && *offset >= 0.0)
    }

    pub fn save_scroll_position(&self, chapter: ChapterId, offset: f32) {
        self.set(&keys::scroll_pos(chapter), &offset.to_string());
    }

    pub fn last_read_chapter(&self) -> Option<ChapterId> {
        self.get_parsed(keys::LAST_READ_CHAPTER)
    }

    pub fn set_last_read_chapter(&self, chapter: ChapterId) {
        self.set(keys::LAST_READ_CHAPTER, &chapter.to_string());
    }

    pub fn vip_code(&self) -> Option<String> {
        self.get(keys::VIP_ACCESS_CODE)
    }

    pub fn set_vip_code(&self, code: &str) {
        self.set(keys::VIP_ACCESS_CODE, code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::anyhow;
    use tempfile::tempdir;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn load(&self, _key: &str) -> Result<Option<String>> {
            Err(anyhow!("disk on fire"))
        }

        fn save(&self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow!("disk on fire"))
        }
    }

    #[test]
    fn keys_are_namespaced_by_chapter() {
        assert_eq!(keys::likes(3), "likes-ch3");
        assert_eq!(keys::comments(12), "comments-ch12");
        assert_eq!(keys::scroll_pos(2), "scrollPos-2");
    }

    #[test]
    fn set_then_get_returns_value() {
        let store = ReaderStore::in_memory();
        assert_eq!(store.get("anything"), None);
        store.set("anything", "value");
        assert_eq!(store.get("anything").as_deref(), Some("value"));
    }

    #[test]
    fn likes_only_go_up() {
        let store = ReaderStore::in_memory();
        assert_eq!(store.likes(1), 0);
        assert_eq!(store.add_like(1), 1);
        assert_eq!(store.add_like(1), 2);
        assert_eq!(store.likes(1), 2);
        assert_eq!(store.likes(2), 0);
    }

    #[test]
    fn malformed_like_count_reads_as_zero() {
        let store = ReaderStore::in_memory();
        store.set(&keys::likes(1), "lots");
        assert_eq!(store.likes(1), 0);
        assert_eq!(store.add_like(1), 1);
    }

    #[test]
    fn comments_keep_insertion_order() {
        let store = ReaderStore::in_memory();
        for i in 0..5 {
            store.add_comment(4, &format!("comment {}", i), "1/2/2025");
        }
        store.add_comment(4, "comment 0", "1/3/2025");

        let comments = store.comments(4);
        assert_eq!(comments.len(), 6);
        assert_eq!(comments[0].text, "comment 0");
        assert_eq!(comments[4].text, "comment 4");
        assert_eq!(comments[5].text, "comment 0");
        assert_eq!(comments[5].date_display, "1/3/2025");
    }

    #[test]
    fn blank_comment_is_rejected() {
        let store = ReaderStore::in_memory();
        assert!(store.add_comment(1, "   ", "today").is_none());
        assert!(store.get(&keys::comments(1)).is_none());
    }

    #[test]
    fn corrupt_comments_read_as_empty() {
        let store = ReaderStore::in_memory();
        store.set(&keys::comments(1), "{not json");
        assert!(store.comments(1).is_empty());

        store.add_comment(1, "fresh start", "today");
        assert_eq!(store.comments(1).len(), 1);
    }

    #[test]
    fn malformed_comment_entries_are_skipped() {
        let store = ReaderStore::in_memory();
        store.set(
            &keys::comments(1),
            r#"[{"text":"kept","date":"d1"},{"oops":true},{"text":"also kept","date":"d2"}]"#,
        );
        let comments = store.comments(1);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[1].text, "also kept");
    }

    #[test]
    fn comments_serialize_with_date_field() {
        let store = ReaderStore::in_memory();
        store.add_comment(1, "hi", "5/6/2025");
        let raw = store.get(&keys::comments(1)).unwrap();
        assert_eq!(raw, r#"[{"text":"hi","date":"5/6/2025"}]"#);
    }

    #[test]
    fn scroll_position_ignores_garbage() {
        let store = ReaderStore::in_memory();
        assert_eq!(store.scroll_position(1), None);
        store.save_scroll_position(1, 1234.5);
        assert_eq!(store.scroll_position(1), Some(1234.5));
        store.set(&keys::scroll_pos(1), "-3");
        assert_eq!(store.scroll_position(1), None);
        store.set(&keys::scroll_pos(1), "NaN");
        assert_eq!(store.scroll_position(1), None);
    }

    #[test]
    fn backend_failures_are_absorbed() {
        let store = ReaderStore::new(Arc::new(BrokenStore));
        assert_eq!(store.likes(1), 0);
        assert_eq!(store.add_like(1), 1);
        assert!(store.comments(1).is_empty());
        assert_eq!(store.last_read_chapter(), None);
        store.save_scroll_position(1, 10.0);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");

        {
            let store = ReaderStore::new(Arc::new(FileKeyValueStore::open(path.clone()).unwrap()));
            store.add_like(2);
            store.add_comment(2, "first", "d1");
            store.add_comment(2, "second", "d2");
            store.set_last_read_chapter(2);
            store.save_scroll_position(2, 88.0);
        }

        let store = ReaderStore::new(Arc::new(FileKeyValueStore::open(path).unwrap()));
        assert_eq!(store.likes(2), 1);
        assert_eq!(store.last_read_chapter(), Some(2));
        assert_eq!(store.scroll_position(2), Some(88.0));
        let comments = store.comments(2);
        assert_eq!(
            comments.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
            vec!["first", "second"]
        );
    }

    #[test]
    fn corrupt_store_file_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"\x00garbage").unwrap();

        let backend = FileKeyValueStore::open(path.clone()).unwrap();
        assert_eq!(backend.load("likes-ch1").unwrap(), None);
        backend.save("likes-ch1", "4").unwrap();

        let reopened = FileKeyValueStore::open(path).unwrap();
        assert_eq!(reopened.load("likes-ch1").unwrap().as_deref(), Some("4"));
    }
}
