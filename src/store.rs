//! Shared state store.
//! The only channel between the perception and actuation loops.
//! `FileStore` keeps one file per key under a directory so two processes can
//! share it; each write goes through a temp file + rename, giving per-key
//! last-write-wins without any locking.
//! `MemoryStore` backs tests and single-process runs that don't need durability.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Keys shared between the two loops.
pub mod keys {
    pub const ORIENTATION: &str = "orientation";
    pub const OCCUPANCY_SIDE_A: &str = "occupancy_side_a";
    pub const OCCUPANCY_SIDE_B: &str = "occupancy_side_b";
    pub const PENDING_MOVE: &str = "pending_move";
    pub const MOVE_EXECUTING: &str = "move_executing";
    pub const SERVICE_ACTIVE: &str = "service_active";

    pub const ALL: [&str; 6] = [
        ORIENTATION,
        OCCUPANCY_SIDE_A,
        OCCUPANCY_SIDE_B,
        PENDING_MOVE,
        MOVE_EXECUTING,
        SERVICE_ACTIVE,
    ];
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store key '{0}' (expected [a-z0-9_]+)")]
    InvalidKey(String),
    #[error("store I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// String-to-string mapping shared by both loops.
///
/// Readers treat a missing key and an empty value the same way: "no update yet".
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    fn remove(&self, key: &str) -> StoreResult<()>;
    /// Drops every key. Callers run this before either loop polls a new session.
    fn clear(&self) -> StoreResult<()>;

    /// Non-empty value of `key`, if any.
    fn value(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.get(key)?.filter(|v| !v.trim().is_empty()))
    }

    fn flag(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.as_deref().map(str::trim) == Some("true"))
    }

    fn set_flag(&self, key: &str, on: bool) -> StoreResult<()> {
        self.set(key, if on { "true" } else { "false" })
    }
}

// *************** FileStore ***************

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) the store directory.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

fn io_err(key: &str) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        key: key.to_string(),
        source,
    }
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(key)(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        let tmp = self
            .dir
            .join(format!(".{}.tmp-{}", key, std::process::id()));
        fs::write(&tmp, value).map_err(io_err(key))?;
        fs::rename(&tmp, &path).map_err(io_err(key))
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(key)(e)),
        }
    }

    fn clear(&self) -> StoreResult<()> {
        let dir_key = self.dir.display().to_string();
        for entry in fs::read_dir(&self.dir).map_err(io_err(&dir_key))? {
            let entry = entry.map_err(io_err(&dir_key))?;
            if entry.path().is_file() {
                match fs::remove_file(entry.path()) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err(&dir_key)(e)),
                }
            }
        }
        Ok(())
    }
}

// *************** MemoryStore ***************

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set(keys::PENDING_MOVE, "e2e4").unwrap();
            store.set_flag(keys::SERVICE_ACTIVE, true).unwrap();
        }
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.value(keys::PENDING_MOVE).unwrap().as_deref(), Some("e2e4"));
        assert!(reopened.flag(keys::SERVICE_ACTIVE).unwrap());
    }

    #[test]
    fn test_file_store_missing_key_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get(keys::ORIENTATION).unwrap(), None);
        assert!(!store.flag(keys::MOVE_EXECUTING).unwrap());
        // Removing an absent key is not an error
        store.remove(keys::ORIENTATION).unwrap();
    }

    #[test]
    fn test_file_store_clear_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        for key in keys::ALL {
            store.set(key, "x").unwrap();
        }
        store.remove(keys::PENDING_MOVE).unwrap();
        assert_eq!(store.get(keys::PENDING_MOVE).unwrap(), None);
        store.clear().unwrap();
        for key in keys::ALL {
            assert_eq!(store.get(key).unwrap(), None, "{} survived clear", key);
        }
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(store.set("../escape", "x"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.get(""), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_empty_value_is_no_update() {
        let store = MemoryStore::new();
        store.set(keys::PENDING_MOVE, "").unwrap();
        assert_eq!(store.value(keys::PENDING_MOVE).unwrap(), None);
        store.set(keys::PENDING_MOVE, "  ").unwrap();
        assert_eq!(store.value(keys::PENDING_MOVE).unwrap(), None);
    }
}
