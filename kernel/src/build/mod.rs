//! Build execution: scheduling hooks, the executor seam, and the runner that
//! ties trust resolution, the script and property reconciliation together.

pub mod executor;
pub mod runner;
pub mod scheduler;

use thiserror::Error;

pub use executor::DefinitionExecutor;
pub use runner::BuildRunner;
pub use scheduler::{BuildCause, BuildScheduler, RecordingScheduler};

use crate::branch::RegistryError;

/// Reasons a build could not be started. No build record exists for these.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// The job is unknown or the actor may not build it (for instance because
    /// the branch is dead).
    #[error("Build refused: {0}")]
    Refused(#[source] RegistryError),
    /// The job has no branch, or its branch's source is not configured.
    #[error("Job '{job}' cannot be built: {reason}")]
    NotBuildable {
        /// Job name.
        job: String,
        /// What is missing.
        reason: String,
    },
}
