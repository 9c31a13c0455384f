//! ==============================================================================
//! persist.rs - best-effort local snapshot storage
//! ==============================================================================
//!
//! purpose:
//!     a tiny key-value file (a json object of string values) standing in for
//!     browser local storage. the whole reading store lives under one key as a
//!     json-serialized snapshot.
//!
//! failure policy:
//!     persist()/restore() never return errors. a missing file, unreadable
//!     file or malformed snapshot is logged and the caller carries on. the
//!     worst case is a lost background save, never a crash.
//!
//! relationships:
//!     - used by: main.rs (restore at startup, persist at shutdown)
//!     - used by: poll.rs (persist whenever a session ends)
//!     - reads/writes: store.rs snapshots
//!
//! ==============================================================================

use crate::error::PersistenceError;
use crate::store::ReadingStore;

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// json file of key -> string value
#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, PersistenceError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// None when the file or the key does not exist
    pub fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let all = self.read_all()?;
        Ok(all.get(key).and_then(|v| v.as_str()).map(str::to_string))
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut all = self.read_all().unwrap_or_else(|e| {
            tracing::warn!("[PERSIST] replacing unreadable {}: {}", self.path.display(), e);
            Map::new()
        });
        all.insert(key.to_string(), Value::String(value.to_string()));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // write-then-rename so a crash mid-write leaves the old file intact
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&Value::Object(all))?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// the store snapshot under one named key
#[derive(Debug, Clone)]
pub struct SnapshotPersistence {
    storage: LocalStorage,
    key: String,
}

impl SnapshotPersistence {
    pub fn new(storage: LocalStorage, key: impl Into<String>) -> Self {
        Self { storage, key: key.into() }
    }

    fn try_persist(&self, store: &ReadingStore) -> Result<usize, PersistenceError> {
        let snapshot = store.snapshot();
        let raw = serde_json::to_string(&snapshot)?;
        self.storage.set_item(&self.key, &raw)?;
        Ok(snapshot.len())
    }

    /// save the current store; errors are logged and swallowed
    pub fn persist(&self, store: &ReadingStore) {
        match self.try_persist(store) {
            Ok(count) => tracing::debug!("[PERSIST] saved {} readings to {}", count, self.storage.path().display()),
            Err(e) => tracing::warn!("[PERSIST] ⚠ failed to save store data: {}", e),
        }
    }

    /// load the saved snapshot into the store
    ///
    /// returns true only when a snapshot was found and applied. nothing saved
    /// yet, unreadable storage and malformed snapshots all leave the store
    /// untouched.
    pub fn restore(&self, store: &ReadingStore) -> bool {
        match self.storage.get_item(&self.key) {
            Ok(Some(raw)) => store.restore(&raw),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("[PERSIST] ⚠ failed to load store data: {}", e);
                false
            }
        }
    }
}
