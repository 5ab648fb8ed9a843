//! Workspaces and exclusive workspace leases.
//!
//! A lease grants exclusive use of one workspace path. Acquisition waits
//! without a timeout until the path is free; callers that need bounded
//! waiting wrap the call in `tokio::time::timeout`. The lease is released
//! when the [`WorkspaceLease`] guard is dropped, which covers early returns,
//! errors and cancelled futures alike.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, instrument};

/// Errors that can occur while acquiring a workspace.
#[derive(Debug, Clone, Error)]
pub enum LeaseError {
    /// The node hosting the workspace is offline.
    #[error("Workspace node offline: {0}")]
    Offline(String),
    /// The workspace path could not be prepared.
    #[error("Failed to prepare workspace {path}: {reason}")]
    Prepare {
        /// Path that could not be prepared.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
}

/// Exclusive hold on a workspace path. Dropping it releases the path.
pub struct WorkspaceLease {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl WorkspaceLease {
    /// Returns the leased directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for WorkspaceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceLease")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for WorkspaceLease {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Released workspace lease");
    }
}

/// Contract for handing out workspaces.
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    /// Acquires an exclusive lease on the workspace named `name`.
    ///
    /// # Errors
    /// Returns `LeaseError` if the workspace cannot be provided.
    async fn acquire_lease(&self, name: &str) -> Result<WorkspaceLease, LeaseError>;
}

/// Workspaces laid out as directories under one local root.
pub struct LocalWorkspaces {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    offline: AtomicBool,
}

impl LocalWorkspaces {
    /// Creates a provider rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Marks the provider offline; acquisitions fail until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns true if some lease on `name` is currently held.
    #[must_use]
    pub fn is_leased(&self, name: &str) -> bool {
        let path = self.root.join(name);
        self.locks
            .lock()
            .get(&path)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl WorkspaceProvider for LocalWorkspaces {
    #[instrument(skip(self))]
    async fn acquire_lease(&self, name: &str) -> Result<WorkspaceLease, LeaseError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LeaseError::Offline(self.root.display().to_string()));
        }

        let path = self.root.join(name);
        let guard = self.lock_for(&path).lock_owned().await;

        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| LeaseError::Prepare {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        debug!(path = %path.display(), "Acquired workspace lease");
        Ok(WorkspaceLease {
            path,
            _guard: guard,
        })
    }
}
