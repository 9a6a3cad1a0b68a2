//! Per-workspace tab layout persistence.
//!
//! Layouts live in a flat key-value store under window-scoped keys, one key
//! per facet (open list, pin list, active tab). There is no schema version:
//! anything missing or unreadable loads as an empty layout.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::target::{ChatId, SubChatId};

/// Persisted shape of one workspace's tab strip.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabLayout {
    pub open_sub_chat_ids: Vec<SubChatId>,
    pub pinned_sub_chat_ids: Vec<SubChatId>,
    pub active_sub_chat_id: Option<SubChatId>,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> Result<(), String>;
    fn remove(&self, key: &str) -> Result<(), String>;
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: String) -> Result<(), String> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        self.values.remove(key);
        Ok(())
    }
}

/// Single JSON object on disk, rewritten atomically on every change.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`. A corrupt file is logged
    /// and treated as empty; it gets replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "corrupt layout store, starting empty: {e}");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "could not read layout store: {e}");
                BTreeMap::new()
            }
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), String> {
        write_atomic(&self.path, values)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<(), String> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let mut values = self.values.lock();
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.flush(&values)
    }
}

/// Serialize `value` to `path` via a temp file and rename. Owner-only
/// permissions on unix.
pub(crate) fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create directory {}: {e}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|e| format!("Failed to serialize: {e}"))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("Invalid store path: {}", path.display()))?;
    let temp = path.with_file_name(format!("{file_name}.tmp.{}", std::process::id()));

    std::fs::write(&temp, &json).map_err(|e| format!("Failed to write temp file: {e}"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| format!("Failed to set permissions: {e}"))?;
    }

    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        format!("Failed to commit {}: {e}", path.display())
    })
}

/// Reads and writes `TabLayout`s under `{window_prefix}:...:{chat_id}` keys.
pub struct TabLayoutStore {
    store: Arc<dyn KeyValueStore>,
    window_prefix: String,
}

impl TabLayoutStore {
    pub fn new(store: Arc<dyn KeyValueStore>, window_prefix: impl Into<String>) -> Self {
        Self {
            store,
            window_prefix: window_prefix.into(),
        }
    }

    pub fn window_prefix(&self) -> &str {
        &self.window_prefix
    }

    fn key(&self, facet: &str, chat_id: &ChatId) -> String {
        format!("{}:{facet}:{chat_id}", self.window_prefix)
    }

    pub fn open_key(&self, chat_id: &ChatId) -> String {
        self.key("open-sub-chats", chat_id)
    }

    pub fn pinned_key(&self, chat_id: &ChatId) -> String {
        self.key("pinned-sub-chats", chat_id)
    }

    pub fn active_key(&self, chat_id: &ChatId) -> String {
        self.key("active-sub-chat", chat_id)
    }

    fn read<T: serde::de::DeserializeOwned + Default>(&self, key: &str) -> T {
        let Some(raw) = self.store.get(key) else {
            return T::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(key, "malformed layout entry, using empty value: {e}");
            T::default()
        })
    }

    /// Missing or malformed facets load as empty.
    pub fn load(&self, chat_id: &ChatId) -> TabLayout {
        TabLayout {
            open_sub_chat_ids: self.read(&self.open_key(chat_id)),
            pinned_sub_chat_ids: self.read(&self.pinned_key(chat_id)),
            active_sub_chat_id: self.read(&self.active_key(chat_id)),
        }
    }

    pub fn save(&self, chat_id: &ChatId, layout: &TabLayout) -> Result<(), String> {
        self.store.set(&self.open_key(chat_id), encode(&layout.open_sub_chat_ids)?)?;
        self.store.set(&self.pinned_key(chat_id), encode(&layout.pinned_sub_chat_ids)?)?;
        match &layout.active_sub_chat_id {
            Some(active) => self.store.set(&self.active_key(chat_id), encode(active)?),
            None => self.store.remove(&self.active_key(chat_id)),
        }
    }

    pub fn clear(&self, chat_id: &ChatId) -> Result<(), String> {
        self.store.remove(&self.open_key(chat_id))?;
        self.store.remove(&self.pinned_key(chat_id))?;
        self.store.remove(&self.active_key(chat_id))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("Failed to serialize layout: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ids(values: &[&str]) -> Vec<SubChatId> {
        values.iter().map(|v| SubChatId::new(*v)).collect()
    }

    fn sample() -> TabLayout {
        TabLayout {
            open_sub_chat_ids: ids(&["a", "b", "c"]),
            pinned_sub_chat_ids: ids(&["a"]),
            active_sub_chat_id: Some(SubChatId::new("b")),
        }
    }

    #[test]
    fn keys_are_window_scoped() {
        let store = TabLayoutStore::new(Arc::new(MemoryStore::new()), "win-1");
        let chat = ChatId::new("w1");
        assert_eq!(store.open_key(&chat), "win-1:open-sub-chats:w1");
        assert_eq!(store.pinned_key(&chat), "win-1:pinned-sub-chats:w1");
        assert_eq!(store.active_key(&chat), "win-1:active-sub-chat:w1");
    }

    #[test]
    fn save_then_load_in_memory() {
        let kv = Arc::new(MemoryStore::new());
        let store = TabLayoutStore::new(kv.clone(), "win");
        let chat = ChatId::new("w1");
        store.save(&chat, &sample()).unwrap();
        assert_eq!(store.load(&chat), sample());
        assert_eq!(kv.get("win:open-sub-chats:w1").as_deref(), Some(r#"["a","b","c"]"#));

        // Another window doesn't see it.
        let other = TabLayoutStore::new(kv, "win-2");
        assert_eq!(other.load(&chat), TabLayout::default());
    }

    #[test]
    fn malformed_entries_fall_back_to_empty() {
        let kv = Arc::new(MemoryStore::new());
        kv.set("win:open-sub-chats:w1", "{not json".to_string()).unwrap();
        kv.set("win:pinned-sub-chats:w1", r#"["a"]"#.to_string()).unwrap();
        let store = TabLayoutStore::new(kv, "win");

        let layout = store.load(&ChatId::new("w1"));
        assert!(layout.open_sub_chat_ids.is_empty());
        assert_eq!(layout.pinned_sub_chat_ids, ids(&["a"]));
        assert_eq!(layout.active_sub_chat_id, None);
    }

    #[test]
    fn clearing_active_removes_key() {
        let kv = Arc::new(MemoryStore::new());
        let store = TabLayoutStore::new(kv.clone(), "win");
        let chat = ChatId::new("w1");
        store.save(&chat, &sample()).unwrap();
        store
            .save(
                &chat,
                &TabLayout {
                    active_sub_chat_id: None,
                    ..sample()
                },
            )
            .unwrap();
        assert!(kv.get("win:active-sub-chat:w1").is_none());

        store.clear(&chat).unwrap();
        assert!(kv.is_empty());
    }

    #[test]
    fn json_file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("layouts").join("tabs.json");
        {
            let store = TabLayoutStore::new(Arc::new(JsonFileStore::open(&path)), "win");
            store.save(&ChatId::new("w1"), &sample()).unwrap();
        }
        let reopened = TabLayoutStore::new(Arc::new(JsonFileStore::open(&path)), "win");
        assert_eq!(reopened.load(&ChatId::new("w1")), sample());

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn json_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tabs.json");
        JsonFileStore::open(&path).set("k", "v".to_string()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tabs.json");
        std::fs::write(&path, "garbage").unwrap();
        let store = JsonFileStore::open(&path);
        assert!(store.get("anything").is_none());
        store.set("k", "v".to_string()).unwrap();
        assert_eq!(JsonFileStore::open(&path).get("k").as_deref(), Some("v"));
    }
}
