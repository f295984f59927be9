//! Key/value storage backends.
//!
//! - [`MemoryStorage`]: lives as long as the process, which makes it the
//!   session-scoped store.
//! - [`FileStorage`]: JSON files in a directory, by default the platform
//!   cache directory:
//!   - Linux: `~/.cache/bookline/`
//!   - macOS: `~/Library/Caches/bookline/`
//!   - Windows: `%LOCALAPPDATA%\bookline\`

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::SyncError;

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SyncError>;
    fn remove(&self, key: &str) -> Result<(), SyncError>;
}

/// Serialize `value` as JSON and store it under `key`.
pub fn save_json<T: Serialize>(storage: &dyn Storage, key: &str, value: &T) -> Result<(), SyncError> {
    let json = serde_json::to_string(value)?;
    storage.set(key, &json)
}

/// Load and deserialize the JSON stored under `key`.
///
/// A missing key is `Ok(None)`; unreadable or undecodable data is an error.
pub fn load_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>, SyncError> {
    match storage.get(key)? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.entries().remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage under `<platform cache dir>/<app>`, if the platform has one.
    pub fn in_cache_dir(app: &str) -> Option<Self> {
        Some(Self::new(dirs::cache_dir()?.join(app)))
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{safe_key}.json"))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        match std::fs::read_to_string(self.file_path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::Storage(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| SyncError::Storage(e.to_string()))?;
        std::fs::write(self.file_path(key), value).map_err(|e| SyncError::Storage(e.to_string()))
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        match std::fs::remove_file(self.file_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Storage(e.to_string())),
        }
    }
}
