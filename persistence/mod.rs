/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Tree persistence: a redb-backed key-value store with change callbacks.
//!
//! Architecture:
//! - One redb table, string keys, byte values
//! - The tree aggregate lives whole under `TREE_STATE_KEY`; settings under
//!   `SETTINGS_KEY`; reads and writes are whole-object
//! - `on_change` subscribers fire after every committed set/remove, so a UI
//!   surface can re-read without polling

pub mod types;

use std::path::PathBuf;

use parking_lot::Mutex;
use redb::{ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;

const STATE_TABLE: redb::TableDefinition<&str, &[u8]> = redb::TableDefinition::new("state");

/// Storage key for the whole persisted tree aggregate.
pub const TREE_STATE_KEY: &str = "tree_state";

/// Storage key for user settings.
pub const SETTINGS_KEY: &str = "settings";

type ChangeCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Persistent key-value store for the tab tree.
pub struct TreeStore {
    db: redb::Database,
    subscribers: Mutex<Vec<ChangeCallback>>,
}

impl TreeStore {
    /// Open or create a store at the given directory.
    pub fn open(base_dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| StoreError::Io(format!("Failed to create dir: {e}")))?;
        let db = redb::Database::create(base_dir.join("tree.redb"))
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        Ok(Self {
            db,
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Get the default storage directory for tree data.
    pub fn default_data_dir() -> Option<PathBuf> {
        let mut dir = dirs::config_dir()?;
        dir.push("tabgrove");
        Some(dir)
    }

    /// Read raw bytes under a key. `None` when absent or unreadable.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let read_txn = self.db.begin_read().ok()?;
        let table = read_txn.open_table(STATE_TABLE).ok()?;
        let entry = table.get(key).ok()??;
        Some(entry.value().to_vec())
    }

    /// Write raw bytes under a key and notify subscribers.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        {
            let mut table = write_txn
                .open_table(STATE_TABLE)
                .map_err(|e| StoreError::Redb(format!("{e}")))?;
            table
                .insert(key, value)
                .map_err(|e| StoreError::Redb(format!("{e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        self.notify(key);
        Ok(())
    }

    /// Remove a key and notify subscribers. Removing an absent key is a no-op.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        {
            let mut table = write_txn
                .open_table(STATE_TABLE)
                .map_err(|e| StoreError::Redb(format!("{e}")))?;
            let _ = table
                .remove(key)
                .map_err(|e| StoreError::Redb(format!("{e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        self.notify(key);
        Ok(())
    }

    /// Read and deserialize a JSON value under a key. `None` when absent or
    /// when the stored bytes do not parse.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key)?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Serialize and write a JSON value under a key.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| StoreError::Serde(format!("{e}")))?;
        self.set(key, &bytes)
    }

    /// Register a change callback. Callbacks receive the changed key and run
    /// on the writer's thread after the commit.
    pub fn on_change(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.subscribers.lock().push(Box::new(callback));
    }

    fn notify(&self, key: &str) {
        for callback in self.subscribers.lock().iter() {
            callback(key);
        }
    }
}

/// Errors from the tree store.
#[derive(Debug)]
pub enum StoreError {
    Io(String),
    Redb(String),
    Serde(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {e}"),
            StoreError::Redb(e) => write!(f, "Redb error: {e}"),
            StoreError::Serde(e) => write!(f, "Serde error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn create_test_store() -> (TreeStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = TreeStore::open(dir.path().to_path_buf()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_get_missing_key() {
        let (store, _dir) = create_test_store();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn test_set_get_remove_roundtrip() {
        let (store, _dir) = create_test_store();
        store.set("k", b"value").unwrap();
        assert_eq!(store.get("k").as_deref(), Some(&b"value"[..]));

        store.set("k", b"updated").unwrap();
        assert_eq!(store.get("k").as_deref(), Some(&b"updated"[..]));

        store.remove("k").unwrap();
        assert!(store.get("k").is_none());
    }

    #[test]
    fn test_remove_absent_key_is_noop() {
        let (store, _dir) = create_test_store();
        store.remove("absent").unwrap();
    }

    #[test]
    fn test_json_roundtrip() {
        let (store, _dir) = create_test_store();
        let value = vec!["a".to_string(), "b".to_string()];
        store.set_json("list", &value).unwrap();
        assert_eq!(store.get_json::<Vec<String>>("list"), Some(value));
        assert!(store.get_json::<u32>("list").is_none());
    }

    #[test]
    fn test_on_change_fires_for_set_and_remove() {
        let (store, _dir) = create_test_store();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        {
            let hits = hits.clone();
            let seen = seen.clone();
            store.on_change(move |key| {
                hits.fetch_add(1, Ordering::SeqCst);
                seen.lock().push(key.to_string());
            });
        }

        store.set("a", b"1").unwrap();
        store.remove("a").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(seen.lock().as_slice(), &["a".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = TreeStore::open(dir.path().to_path_buf()).unwrap();
            store.set("k", b"survives").unwrap();
        }
        let store = TreeStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.get("k").as_deref(), Some(&b"survives"[..]));
    }
}
