//! SCM identifiers - Newtype wrappers for sources, heads and revisions.
//!
//! These types are immutable once constructed. A [`RevisionRef`] only supports
//! equality: two references are equal iff they denote the same content state.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Identifier of a configured source within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Creates a new `SourceId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named line of development reported by a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchHead {
    name: String,
    source_id: SourceId,
}

impl BranchHead {
    /// Creates a head owned by `source_id`.
    ///
    /// No validation happens here; the registry rejects malformed names when it
    /// materializes jobs.
    #[must_use]
    pub fn new(name: impl Into<String>, source_id: SourceId) -> Self {
        Self {
            name: name.into(),
            source_id,
        }
    }

    /// Returns the head name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the owning source.
    #[must_use]
    pub const fn source_id(&self) -> &SourceId {
        &self.source_id
    }
}

impl fmt::Display for BranchHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.source_id)
    }
}

/// Opaque identifier of one content state of a head (a commit hash, a
/// changeset id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionRef(String);

impl RevisionRef {
    /// Wraps a source-specific revision identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a checkout was pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    /// Pinned to a resolved revision.
    Deterministic,
    /// The head could not be resolved; whatever the source currently has was
    /// checked out.
    BestEffort,
}

/// The buildable configuration a script runs against: which source, which
/// head, and which revision (if one was resolved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfiguration {
    /// The source the configuration came from.
    pub source_id: SourceId,
    /// Head name within the source.
    pub head: String,
    /// Revision pinned for this build, absent in best-effort mode.
    pub revision: Option<RevisionRef>,
    /// Whether the revision is pinned.
    pub mode: CheckoutMode,
}

impl SourceConfiguration {
    /// Configuration pinned to `revision`.
    #[must_use]
    pub fn pinned(head: &BranchHead, revision: RevisionRef) -> Self {
        Self {
            source_id: head.source_id().clone(),
            head: head.name().to_string(),
            revision: Some(revision),
            mode: CheckoutMode::Deterministic,
        }
    }

    /// Configuration without a pinned revision.
    #[must_use]
    pub fn best_effort(head: &BranchHead) -> Self {
        Self {
            source_id: head.source_id().clone(),
            head: head.name().to_string(),
            revision: None,
            mode: CheckoutMode::BestEffort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_equality_is_by_identifier() {
        assert_eq!(RevisionRef::new("abc"), RevisionRef::new("abc"));
        assert_ne!(RevisionRef::new("abc"), RevisionRef::new("abd"));
    }

    #[test]
    fn head_display_includes_source() {
        let head = BranchHead::new("feature/x", SourceId::new("origin"));
        assert_eq!(head.to_string(), "feature/x@origin");
    }

    #[test]
    fn source_configuration_modes() {
        let head = BranchHead::new("master", SourceId::new("origin"));
        let pinned = SourceConfiguration::pinned(&head, RevisionRef::new("r1"));
        assert_eq!(pinned.mode, CheckoutMode::Deterministic);
        assert_eq!(pinned.revision, Some(RevisionRef::new("r1")));

        let loose = SourceConfiguration::best_effort(&head);
        assert_eq!(loose.mode, CheckoutMode::BestEffort);
        assert!(loose.revision.is_none());
    }
}
