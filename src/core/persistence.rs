//! # State Persistence
//!
//! Durable key/value storage for browser state, injected into the resolver
//! as a [`StateStore`] so it can be tested without a real backend.
//!
//! Two JSON blobs are kept per instance, namespaced by the storage key:
//!
//! - `<key>.history`: `{ "history": [HistoryEntry], "cursor": n }`
//! - `<key>.history-list`: `[HistoryListItem]`
//!
//! Writes are best-effort. Callers log and swallow failures.
//!
//! [`FileStateStore`] writes one file per key under `~/.iiif-browser/state/`
//! using atomic rename (write `.tmp`, then `rename()`) for crash safety.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Durable key/value storage port.
pub trait StateStore: Send + Sync {
    fn load(&self, key: &str) -> io::Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> io::Result<()>;
}

pub fn history_key(storage_key: &str) -> String {
    format!("{storage_key}.history")
}

pub fn history_list_key(storage_key: &str) -> String {
    format!("{storage_key}.history-list")
}

/// Serializes and saves `value`, logging (not returning) any failure.
pub fn save_json<T: Serialize>(store: &dyn StateStore, key: &str, value: &T) {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize {}: {}", key, e);
            return;
        }
    };
    match store.save(key, &json) {
        Ok(()) => debug!("Persisted {} ({} bytes)", key, json.len()),
        Err(e) => warn!("Failed to persist {}: {}", key, e),
    }
}

/// Loads and deserializes `key`. Missing, unreadable or malformed blobs all
/// come back as `None`; the latter two are logged.
pub fn load_json<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> Option<T> {
    let json = match store.load(key) {
        Ok(Some(json)) => json,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to read {}: {}", key, e);
            return None;
        }
    };
    match serde_json::from_str(&json) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring malformed {}: {}", key, e);
            None
        }
    }
}

// ============================================================================
// File backend
// ============================================================================

#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns `~/.iiif-browser/state/`, creating it if needed.
    pub fn default_dir() -> io::Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?;
        let dir = home.join(".iiif-browser").join("state");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys become file names; anything outside `[A-Za-z0-9._-]` is replaced.
    fn path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, key: &str) -> io::Result<Option<String>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(path).map(Some)
    }

    fn save(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, value)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

// ============================================================================
// Memory backend
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, value: &str) -> io::Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
