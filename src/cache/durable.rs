//! Durable tier of the response cache.
//!
//! Entries are JSON files in a directory, one per key, named
//! `<namespace>-<hex(key)>.json`. Expiry is wall-clock based so entries survive
//! process restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Durable cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Durable cache entry is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A persisted cache value with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: Value,
    pub expires_at: DateTime<Utc>,
}

impl StoredEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Storage behind the memory tier. Failures are reported to the cache, which
/// logs and ignores them.
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    fn load(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;
    fn store(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    /// Remove every entry in this store's namespace.
    fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    namespace: String,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            namespace: namespace.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn prefix(&self) -> String {
        format!("{}-", self.namespace)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = self.prefix();
        for byte in key.as_bytes() {
            let _ = write!(name, "{byte:02x}");
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

impl DurableStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec(entry)?;
        fs::write(self.path_for(key), bytes)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let prefix = self.prefix();
        for entry in entries {
            let entry = entry?;
            let owned = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".json"));
            if owned {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}
