//! Source capability consumed by the registry and the trust resolver.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use super::types::{BranchHead, RevisionRef, SourceId};

/// Errors reported by a source implementation.
#[derive(Debug, Clone, Error)]
pub enum ScmError {
    /// The source could not be reached or refused the request.
    #[error("Source '{source_id}' unavailable: {reason}")]
    Unavailable {
        /// Source that failed.
        source_id: SourceId,
        /// Reason reported by the source.
        reason: String,
    },
    /// The head does not exist (anymore) in the source.
    #[error("Head not found: {0}")]
    HeadNotFound(String),
    /// The revision is unknown to the source.
    #[error("Revision not found: {0}")]
    RevisionNotFound(String),
    /// Materializing a checkout failed.
    #[error("Checkout failed: {0}")]
    CheckoutFailed(String),
}

/// Contract for a version-control source.
///
/// Implementations encapsulate the trust policy: [`ScmSource::classify_trust`]
/// decides which revision may define build behaviour for a given tip.
#[async_trait]
pub trait ScmSource: Send + Sync {
    /// Returns the identifier of this source.
    fn id(&self) -> &SourceId;

    /// Lists the heads currently reported by the source.
    ///
    /// # Errors
    /// Returns `ScmError` if the listing cannot be obtained.
    async fn list_heads(&self) -> Result<Vec<BranchHead>, ScmError>;

    /// Fetches the current tip of `head`, `None` if the head has no tip.
    ///
    /// # Errors
    /// Returns `ScmError` if the source cannot be queried.
    async fn fetch_tip(&self, head: &BranchHead) -> Result<Option<RevisionRef>, ScmError>;

    /// Returns the trusted revision for `tip`, which is `tip` itself when the
    /// tip is trusted.
    ///
    /// # Errors
    /// Returns `ScmError` if the trust policy cannot be evaluated.
    async fn classify_trust(
        &self,
        head: &BranchHead,
        tip: &RevisionRef,
    ) -> Result<RevisionRef, ScmError>;

    /// Replaces the contents of `dest` with a checkout of `revision`, or of
    /// whatever the head currently points at when `revision` is `None`.
    ///
    /// # Errors
    /// Returns `ScmError` if the checkout cannot be materialized.
    async fn checkout(
        &self,
        head: &BranchHead,
        revision: Option<&RevisionRef>,
        dest: &Path,
    ) -> Result<(), ScmError>;
}
