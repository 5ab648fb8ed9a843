//! Durable storage of job snapshots.
//!
//! The registry and the property reconciler persist through [`JobStore`]
//! before they publish a new configuration, so a failed save leaves the
//! in-memory job untouched.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::job::{JobId, JobSnapshot};

/// Errors that can occur while persisting jobs.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Reading or writing the backing storage failed.
    #[error("I/O error at {path}: {reason}")]
    Io {
        /// Location involved.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
    /// A stored snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The backend refused the write.
    #[error("Store rejected write: {0}")]
    Rejected(String),
}

/// Contract for job persistence.
pub trait JobStore: Send + Sync {
    /// Persists `snapshot`, replacing any earlier snapshot of the same job.
    ///
    /// # Errors
    /// Returns `StoreError` if the snapshot could not be made durable.
    fn save(&self, snapshot: &JobSnapshot) -> Result<(), StoreError>;

    /// Removes the stored snapshot of `id`.
    ///
    /// # Errors
    /// Returns `StoreError` if the removal failed.
    fn delete(&self, id: JobId) -> Result<(), StoreError>;

    /// Loads every stored snapshot.
    ///
    /// # Errors
    /// Returns `StoreError` if the storage cannot be read.
    fn load_all(&self) -> Result<Vec<JobSnapshot>, StoreError>;
}

/// Keeps snapshots in memory. Writes can be made to fail for testing
/// rollback paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: RwLock<BTreeMap<JobId, JobSnapshot>>,
    reject_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every `save` fails with `StoreError::Rejected`.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Returns the stored snapshot of `id`.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.snapshots.read().get(&id).cloned()
    }
}

impl JobStore for MemoryStore {
    fn save(&self, snapshot: &JobSnapshot) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(format!("job {}", snapshot.name)));
        }
        self.snapshots.write().insert(snapshot.id, snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, id: JobId) -> Result<(), StoreError> {
        self.snapshots.write().remove(&id);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<JobSnapshot>, StoreError> {
        Ok(self.snapshots.read().values().cloned().collect())
    }
}

/// Stores one JSON document per job in a directory. Writes go to a
/// temporary file in the same directory and are renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Opens (creating if needed) a store in `dir`.
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| io_error(&dir, &e))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

fn io_error(path: &Path, error: &std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

impl JobStore for JsonFileStore {
    fn save(&self, snapshot: &JobSnapshot) -> Result<(), StoreError> {
        let target = self.path_for(snapshot.id);
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| io_error(&self.dir, &e))?;
        tmp.write_all(&json).map_err(|e| io_error(tmp.path(), &e))?;
        tmp.as_file().sync_all().map_err(|e| io_error(tmp.path(), &e))?;
        tmp.persist(&target)
            .map_err(|e| io_error(&target, &e.error))?;

        debug!(job = %snapshot.name, path = %target.display(), "Saved job snapshot");
        Ok(())
    }

    fn delete(&self, id: JobId) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    fn load_all(&self) -> Result<Vec<JobSnapshot>, StoreError> {
        let mut snapshots = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, &e))?;
        for entry in entries {
            let path = entry.map_err(|e| io_error(&self.dir, &e))?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|e| io_error(&path, &e))?;
            match serde_json::from_slice::<JobSnapshot>(&bytes) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable job snapshot"),
            }
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobConfig, JobType, RetentionPolicy};

    fn snapshot() -> JobSnapshot {
        let mut config = JobConfig::default();
        config.properties.replace(RetentionPolicy::default().to_property());
        Job::new("master", JobType::Standalone, config).snapshot()
    }

    #[test]
    fn memory_store_rejects_when_asked() {
        let store = MemoryStore::new();
        store.reject_writes(true);
        assert!(matches!(store.save(&snapshot()), Err(StoreError::Rejected(_))));
        assert_eq!(store.save_count(), 0);

        store.reject_writes(false);
        store.save(&snapshot()).unwrap();
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn json_store_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("jobs")).unwrap();
        let snapshot = snapshot();

        store.save(&snapshot).unwrap();
        store.save(&snapshot).unwrap();

        assert_eq!(store.load_all().unwrap(), vec![snapshot.clone()]);

        store.delete(snapshot.id).unwrap();
        assert!(store.load_all().unwrap().is_empty());
        store.delete(snapshot.id).unwrap();
    }

    #[test]
    fn json_store_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();

        assert!(store.load_all().unwrap().is_empty());
    }
}
