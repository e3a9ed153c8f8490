//! # Credential Store
//!
//! Durable cache for the Sense credentials. A missing or corrupt cache is a normal
//! startup condition and loads as empty credentials; writes go to a temporary file
//! in the same directory and are renamed over the target, so a crash mid-write leaves
//! the previous record readable.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::monitors::sense::model::Credentials;

/// Default location of the credentials file inside the add-on data volume.
pub const DEFAULT_CREDENTIALS_PATH: &str = "/data/sense.conf";

/// Errors raised while persisting credentials. Loading never fails.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The credentials file or its directory could not be written.
    #[error("I/O error on credentials file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The record could not be encoded as JSON.
    #[error("Failed to serialize credentials: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Load/save access to the cached credentials.
pub trait CredentialStore: Send + Sync {
    /// Returns the cached credentials, or empty ones when nothing usable is stored.
    fn load(&self) -> Credentials;

    /// Replaces the cached record.
    fn save(&self, credentials: &Credentials) -> Result<(), StoreError>;
}

/// JSON file backed store.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io { path: self.path.clone(), source }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Credentials {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("No credentials cache at {}: {}", self.path.display(), e);
                return Credentials::default();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::warn!("Ignoring unparsable credentials cache {}: {}", self.path.display(), e);
            Credentials::default()
        })
    }

    fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let body = serde_json::to_vec(credentials)?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&body).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        log::debug!("Credentials saved to {}", self.path.display());
        Ok(())
    }
}

/// Process-local store, used when persistence is not wanted and in tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Credentials>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: Credentials) -> Self {
        Self { inner: Mutex::new(credentials) }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Credentials {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = credentials.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_credentials() -> Credentials {
        Credentials {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            user_id: "12".into(),
            monitor_id: "345".into(),
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("sense.conf"));
        assert_eq!(store.load(), Credentials::default());
    }

    #[test]
    fn test_garbage_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sense.conf");
        fs::write(&path, "{not json").unwrap();

        let store = FileCredentialStore::new(&path);
        assert_eq!(store.load(), Credentials::default());
    }

    #[test]
    fn test_save_then_load_and_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("sense.conf");
        let store = FileCredentialStore::new(&path);

        store.save(&sample_credentials()).unwrap();
        assert_eq!(store.load(), sample_credentials());

        let mut renewed = sample_credentials();
        renewed.access_token = "access-2".into();
        store.save(&renewed).unwrap();
        assert_eq!(store.load().access_token, "access-2");

        // Only the target remains, no stray temp files.
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_memory_store_saves_after_poisoned_lock() {
        let store = std::sync::Arc::new(MemoryCredentialStore::default());
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(store.inner.is_poisoned());

        store.save(&sample_credentials()).unwrap();
        assert_eq!(store.load(), sample_credentials());
    }

    #[test]
    fn test_persisted_record_uses_wire_field_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sense.conf");
        FileCredentialStore::new(&path).save(&sample_credentials()).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["access_token"], "access");
        assert_eq!(raw["refresh_token"], "refresh");
        assert_eq!(raw["user_id"], "12");
        assert_eq!(raw["monitor_id"], "345");
    }
}
