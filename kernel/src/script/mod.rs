//! Steps exposed to build scripts.
//!
//! A script only ever talks to its [`BuildContext`]; there is no ambient
//! "current build" to look up.

pub mod context;

use thiserror::Error;

pub use context::BuildContext;
pub use crate::properties::legacy::PROPERTIES_STEP;

use crate::job::FailureKind;
use crate::properties::PropertyError;
use crate::scm::SourceId;
use crate::trust::TrustError;

/// Name recorded when a script reads a trusted file.
pub const READ_TRUSTED_STEP: &str = "read-trusted";
/// Name recorded when a script sets the retention policy.
pub const RETENTION_POLICY_STEP: &str = "retention-policy";
/// Name recorded when a script resolves an alternate source.
pub const RESOLVE_SOURCE_STEP: &str = "resolve-source";

/// Errors a step reports back to the script.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// Reading a build-defining file failed.
    #[error(transparent)]
    Trust(#[from] TrustError),
    /// Installing properties failed.
    #[error(transparent)]
    Property(#[from] PropertyError),
    /// `resolve_alternate_source` was called without candidates.
    #[error("no candidate heads given for source '{0}'")]
    NoCandidates(SourceId),
    /// None of the candidate heads has a resolvable tip.
    #[error("none of {candidates:?} could be resolved in source '{source_id}'")]
    NoResolvableCandidate {
        /// Source that was searched.
        source_id: SourceId,
        /// Candidates tried, in order.
        candidates: Vec<String>,
    },
    /// The script itself failed.
    #[error("{0}")]
    Execution(String),
}

impl StepError {
    /// Classification of this error when it ends a build.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Trust(e) => e.failure_kind(),
            Self::Property(PropertyError::InapplicableProperty(_)) => {
                FailureKind::InapplicableProperty
            }
            Self::Property(PropertyError::CommitFailure(_)) => FailureKind::CommitFailure,
            Self::NoCandidates(_) | Self::NoResolvableCandidate { .. } => {
                FailureKind::NoResolvableCandidate
            }
            Self::Execution(_) => FailureKind::Execution,
        }
    }
}
