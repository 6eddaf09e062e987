//! Key-value storage abstraction for local persistence.
//!
//! All local state lives in one flat keyspace with atomic single-key
//! reads and writes, and nothing more: no cross-key transactions, no
//! locking primitive. Concurrent contexts coordinate through
//! last-write-wins on individual record keys.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Key prefix for drawing records (`drawing:<uuid>`).
pub const DRAWING_KEY_PREFIX: &str = "drawing:";

/// Key holding the serialized identifier-mapping table.
pub const MAPPINGS_KEY: &str = "sync:mappings";

/// Key caching the remote container id.
pub const CONTAINER_ID_KEY: &str = "sync:container-id";

/// Key holding the timestamp of the last asset-collection run.
pub const GC_LAST_RUN_KEY: &str = "gc:last-run";

/// Key holding the serialized configuration.
pub const CONFIG_KEY: &str = "config";

/// Trait for local key-value storage backends.
///
/// Object-safe and synchronous: backends are expected to be local and fast
/// (browser storage, an embedded database, a map in tests). Values are
/// stored as strings; structured records go through [`get_json`]/[`set_json`].
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value stored under `key`. Removing a missing key is a no-op.
    fn remove(&self, key: &str) -> Result<()>;

    /// List every key currently present.
    fn keys(&self) -> Result<Vec<String>>;
}

/// Read and deserialize a JSON record.
pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        None => Ok(None),
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
    }
}

/// Serialize and write a JSON record.
pub fn set_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    store.set(key, &serde_json::to_string(value)?)
}

/// In-memory store for tests and development.
///
/// Thread-safe via `RwLock`; data is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: std::sync::RwLock<std::collections::HashMap<String, String>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_set_and_get() {
        let store = MemoryStore::new();

        store.set("key", "value").unwrap();
        assert_eq!(store.get("key").unwrap(), Some("value".to_string()));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = MemoryStore::new();
        store.set("key", "value").unwrap();

        store.remove("key").unwrap();
        store.remove("key").unwrap();

        assert_eq!(store.get("key").unwrap(), None);
    }

    #[test]
    fn test_json_roundtrip() {
        let store = MemoryStore::new();
        let sample = Sample {
            name: "sketch".to_string(),
            count: 3,
        };

        set_json(&store, "sample", &sample).unwrap();
        let loaded: Option<Sample> = get_json(&store, "sample").unwrap();

        assert_eq!(loaded, Some(sample));
    }

    #[test]
    fn test_keys_lists_everything() {
        let store = MemoryStore::new();
        store.set("drawing:1", "{}").unwrap();
        store.set("drawing:2", "{}").unwrap();
        store.set(CONFIG_KEY, "{}").unwrap();

        let mut keys = store.keys().unwrap();
        keys.sort();

        assert_eq!(keys, vec!["config", "drawing:1", "drawing:2"]);
    }
}
