//! Trust Resolver - decides which revision may define a build and serves
//! files from it.

pub mod definition;
pub mod path;
pub mod resolver;

use thiserror::Error;

pub use definition::{DefinitionBinder, ExecutableDefinition};
pub use resolver::{TrustDecision, TrustResolver};

use crate::job::FailureKind;
use crate::scm::{RevisionRef, ScmError};
use crate::workspace::LeaseError;

/// Errors raised while reading build-defining files.
#[derive(Debug, Clone, Error)]
pub enum TrustError {
    /// The file differs between the tip and the trusted revision.
    #[error("'{path}' has been modified in an untrusted revision ({tip}); using {trusted} is refused")]
    UntrustedModification {
        /// Requested path.
        path: String,
        /// Untrusted tip.
        tip: RevisionRef,
        /// Trusted revision.
        trusted: RevisionRef,
    },
    /// The file does not exist in the trusted revision.
    #[error("'{path}' not found{}", in_revision(.revision.as_ref()))]
    FileNotFound {
        /// Requested path.
        path: String,
        /// Revision that was searched, absent for best-effort checkouts.
        revision: Option<RevisionRef>,
    },
    /// The build-definition script does not exist.
    #[error("build script '{path}' not found{}", in_revision(.revision.as_ref()))]
    ScriptNotFound {
        /// Configured script path.
        path: String,
        /// Revision that was searched, absent for best-effort checkouts.
        revision: Option<RevisionRef>,
    },
    /// The path leaves the checkout.
    #[error("path '{0}' escapes the checkout")]
    PathEscape(String),
    /// No workspace could be leased for the checkout.
    #[error(transparent)]
    Lease(#[from] LeaseError),
    /// The source failed.
    #[error(transparent)]
    Scm(#[from] ScmError),
}

impl TrustError {
    /// Classification of this error when it ends a build.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::UntrustedModification { .. } => FailureKind::UntrustedModification,
            Self::FileNotFound { .. } => FailureKind::FileNotFound,
            Self::ScriptNotFound { .. } => FailureKind::ScriptNotFound,
            Self::PathEscape(_) => FailureKind::PathEscape,
            Self::Lease(_) => FailureKind::LeaseUnavailable,
            Self::Scm(_) => FailureKind::Scm,
        }
    }
}

fn in_revision(revision: Option<&RevisionRef>) -> String {
    revision.map(|r| format!(" in {r}")).unwrap_or_default()
}
