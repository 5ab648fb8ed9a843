//! Build requests raised outside a running build.

use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::job::{Job, JobId};

/// Why a build was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildCause {
    /// The registry created a job for a newly discovered branch.
    BranchIndexing,
    /// A user asked for the build.
    User(String),
}

impl fmt::Display for BuildCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BranchIndexing => write!(f, "branch indexing"),
            Self::User(name) => write!(f, "started by {name}"),
        }
    }
}

/// Receives build requests. Implementations queue the build; they must not
/// run it inline.
pub trait BuildScheduler: Send + Sync {
    /// Requests a build of `job`.
    fn request_build(&self, job: &Arc<Job>, cause: BuildCause);
}

/// Scheduler that only remembers what was requested.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    requests: Mutex<Vec<(JobId, BuildCause)>>,
}

impl RecordingScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and clears the pending requests.
    pub fn drain(&self) -> Vec<(JobId, BuildCause)> {
        std::mem::take(&mut *self.requests.lock())
    }
}

impl BuildScheduler for RecordingScheduler {
    fn request_build(&self, job: &Arc<Job>, cause: BuildCause) {
        tracing::debug!(job = %job.name(), %cause, "Build requested");
        self.requests.lock().push((job.id(), cause));
    }
}
