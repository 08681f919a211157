//! Persistent, schema-versioned mapping from specifier to handle record.
//!
//! Mirrors `libretto_lockfile::atomic`'s write-temp-then-rename discipline:
//! every mutation is serialized under one lock and persisted by writing to
//! a sibling temp file and renaming it over the target, so a crash mid
//! write leaves either the fully-prior or fully-new document, never a
//! partial one.

use crate::error::{RepoVaultError, Result};
use crate::handle::HandleStatus;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Current on-disk schema version. Bumping this implies a migration step,
/// not an ad-hoc reparse.
pub const SCHEMA_VERSION: u32 = 1;

/// Callback invoked when the store has to recover from a missing, corrupt,
/// or future-schema file. Never fatal — the store falls back to empty.
pub type WarningHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// One persisted record: on-disk subpath, status, and (for forward
/// compatibility) any fields this version of the schema does not know
/// about, preserved verbatim on round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub subpath: String,
    pub status: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, sonic_rs::Value>,
}

impl StoredRecord {
    #[must_use]
    pub fn new(subpath: impl Into<String>, status: HandleStatus) -> Self {
        Self {
            subpath: subpath.into(),
            status: status.as_store_str().to_string(),
            extra: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn status(&self) -> HandleStatus {
        HandleStatus::from_store_str(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    repositories: BTreeMap<String, StoredRecord>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            repositories: BTreeMap::new(),
        }
    }
}

/// Persistent handle store at `<root>/checkouts-state.json`.
#[derive(Debug)]
pub struct HandleStore {
    path: PathBuf,
    inner: Mutex<StoreDocument>,
}

impl HandleStore {
    /// File name of the store within the manager root.
    pub const FILE_NAME: &'static str = "checkouts-state.json";

    /// Load the store from `path`, or start empty if the file is missing,
    /// corrupt, or from an unknown schema version. Never fails: callers
    /// rely on this not being fatal (§7 "Store load failure").
    pub fn load(path: PathBuf, warn_handler: &WarningHandler) -> Self {
        let document = match fs::read_to_string(&path) {
            Ok(content) => match sonic_rs::from_str::<StoreDocument>(&content) {
                Ok(doc) if doc.version == SCHEMA_VERSION => doc,
                Ok(doc) => {
                    warn_handler(&format!(
                        "unknown repository store schema version {} (expected {}); starting empty",
                        doc.version, SCHEMA_VERSION
                    ));
                    StoreDocument::default()
                }
                Err(err) => {
                    warn_handler(&format!(
                        "repository store at {} is corrupt ({err}); starting empty",
                        path.display()
                    ));
                    StoreDocument::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(err) => {
                warn_handler(&format!(
                    "could not read repository store at {} ({err}); starting empty",
                    path.display()
                ));
                StoreDocument::default()
            }
        };

        Self {
            path,
            inner: Mutex::new(document),
        }
    }

    /// Look up a record by canonical specifier string.
    #[must_use]
    pub fn get(&self, canonical: &str) -> Option<StoredRecord> {
        self.inner.lock().repositories.get(canonical).cloned()
    }

    /// Upsert a record, persisting before returning.
    ///
    /// # Errors
    /// Returns [`RepoVaultError::StoreWriteFailed`] if the write fails; the
    /// in-memory state is rolled back to the previously persisted version.
    pub fn put(&self, canonical: &str, record: StoredRecord) -> Result<()> {
        let mut guard = self.inner.lock();
        let previous = guard.repositories.insert(canonical.to_string(), record);
        if let Err(err) = self.persist(&guard) {
            // Roll back.
            match previous {
                Some(prev) => {
                    guard.repositories.insert(canonical.to_string(), prev);
                }
                None => {
                    guard.repositories.remove(canonical);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Erase a record. The caller is responsible for removing the on-disk
    /// directory beforehand (§4.3).
    ///
    /// # Errors
    /// Returns [`RepoVaultError::StoreWriteFailed`] if the write fails.
    pub fn remove(&self, canonical: &str) -> Result<()> {
        let mut guard = self.inner.lock();
        let previous = guard.repositories.remove(canonical);
        if previous.is_none() {
            return Ok(());
        }
        if let Err(err) = self.persist(&guard) {
            guard
                .repositories
                .insert(canonical.to_string(), previous.unwrap());
            return Err(err);
        }
        Ok(())
    }

    /// Empty the mapping and persist.
    ///
    /// # Errors
    /// Returns [`RepoVaultError::StoreWriteFailed`] if the write fails.
    pub fn reset(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let previous = std::mem::take(&mut guard.repositories);
        if let Err(err) = self.persist(&guard) {
            guard.repositories = previous;
            return Err(err);
        }
        Ok(())
    }

    /// Snapshot of every record, keyed by canonical specifier string. Used
    /// by the manager's startup crash-recovery sweep.
    #[must_use]
    pub fn all(&self) -> Vec<(String, StoredRecord)> {
        self.inner
            .lock()
            .repositories
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn persist(&self, document: &StoreDocument) -> Result<()> {
        let serialized = sonic_rs::to_string(document).map_err(|err| RepoVaultError::StoreWriteFailed {
            path: self.path.clone(),
            message: err.to_string(),
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| RepoVaultError::StoreWriteFailed {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, serialized.as_bytes()).map_err(|err| {
            RepoVaultError::StoreWriteFailed {
                path: temp_path.clone(),
                message: err.to_string(),
            }
        })?;
        fs::rename(&temp_path, &self.path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            RepoVaultError::StoreWriteFailed {
                path: self.path.clone(),
                message: err.to_string(),
            }
        })?;

        debug!(path = %self.path.display(), entries = document.repositories.len(), "persisted repository store");
        Ok(())
    }
}

/// Remove an orphaned temp file left by a crash mid-write, if present.
/// Called once at manager startup alongside the pending-record sweep.
pub fn clean_orphaned_temp(root: &Path) {
    let temp_path = root.join(HandleStore::FILE_NAME).with_extension("json.tmp");
    if temp_path.exists() {
        warn!(path = %temp_path.display(), "removing orphaned store temp file");
        let _ = fs::remove_file(&temp_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn silent_warn() -> WarningHandler {
        Arc::new(|_msg: &str| {})
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let store = HandleStore::load(dir.path().join(HandleStore::FILE_NAME), &silent_warn());
        store
            .put("https://example.com/a", StoredRecord::new("abc-1234", HandleStatus::Available))
            .unwrap();

        let record = store.get("https://example.com/a").unwrap();
        assert_eq!(record.subpath, "abc-1234");
        assert_eq!(record.status(), HandleStatus::Available);
    }

    #[test]
    fn reload_from_disk_sees_prior_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(HandleStore::FILE_NAME);
        let store = HandleStore::load(path.clone(), &silent_warn());
        store
            .put("https://example.com/a", StoredRecord::new("abc-1234", HandleStatus::Available))
            .unwrap();
        drop(store);

        let reloaded = HandleStore::load(path, &silent_warn());
        assert!(reloaded.get("https://example.com/a").is_some());
    }

    #[test]
    fn corrupt_file_falls_back_to_empty_without_panicking() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(HandleStore::FILE_NAME);
        fs::write(&path, b"{ not json").unwrap();

        let warned = Arc::new(Mutex::new(false));
        let warned_clone = Arc::clone(&warned);
        let handler: WarningHandler = Arc::new(move |_msg: &str| {
            *warned_clone.lock() = true;
        });

        let store = HandleStore::load(path, &handler);
        assert!(*warned.lock());
        assert!(store.all().is_empty());
    }

    #[test]
    fn unknown_schema_version_falls_back_to_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(HandleStore::FILE_NAME);
        fs::write(&path, br#"{"version":999,"repositories":{}}"#).unwrap();

        let store = HandleStore::load(path, &silent_warn());
        assert!(store.all().is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = HandleStore::load(dir.path().join(HandleStore::FILE_NAME), &silent_warn());
        store
            .put("https://example.com/a", StoredRecord::new("abc-1234", HandleStatus::Available))
            .unwrap();
        store.remove("https://example.com/a").unwrap();
        store.remove("https://example.com/a").unwrap();
        assert!(store.get("https://example.com/a").is_none());
    }

    #[test]
    fn reset_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = HandleStore::load(dir.path().join(HandleStore::FILE_NAME), &silent_warn());
        store
            .put("https://example.com/a", StoredRecord::new("abc-1234", HandleStatus::Available))
            .unwrap();
        store.reset().unwrap();
        store.reset().unwrap();
        assert!(store.all().is_empty());
    }

    #[test]
    fn unknown_status_value_is_treated_as_error() {
        let record = StoredRecord {
            subpath: "x".to_string(),
            status: "frobnicating".to_string(),
            extra: BTreeMap::new(),
        };
        assert_eq!(record.status(), HandleStatus::Error);
    }
}
