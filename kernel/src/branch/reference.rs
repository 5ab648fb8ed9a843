//! Branch Reference - the link between a job and the branch it builds.
//!
//! A reference is a value: transitions return a new reference that the
//! registry swaps into the job's configuration. The job entity and its build
//! history are never replaced.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::RegistryError;
use crate::scm::{BranchHead, SourceId};

/// Identifier of the collection that owns a set of branch jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    /// Creates a collection identifier.
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

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a branch reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchState {
    /// The source reports the head.
    Active,
    /// The source stopped reporting the head; builds are refused.
    Dead,
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// Associates a job with one (source, head) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "BranchReferenceRecord", from = "BranchReferenceRecord")]
pub struct BranchReference {
    collection: CollectionId,
    head: BranchHead,
    state: BranchState,
}

/// Persisted layout: source id, head name and dead flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BranchReferenceRecord {
    collection: CollectionId,
    source_id: SourceId,
    head: String,
    dead: bool,
}

impl From<BranchReference> for BranchReferenceRecord {
    fn from(reference: BranchReference) -> Self {
        Self {
            collection: reference.collection,
            source_id: reference.head.source_id().clone(),
            head: reference.head.name().to_string(),
            dead: reference.state == BranchState::Dead,
        }
    }
}

impl From<BranchReferenceRecord> for BranchReference {
    fn from(record: BranchReferenceRecord) -> Self {
        Self {
            collection: record.collection,
            head: BranchHead::new(record.head, record.source_id),
            state: if record.dead {
                BranchState::Dead
            } else {
                BranchState::Active
            },
        }
    }
}

impl BranchReference {
    /// Creates an active reference.
    #[must_use]
    pub fn new(collection: CollectionId, head: BranchHead) -> Self {
        Self {
            collection,
            head,
            state: BranchState::Active,
        }
    }

    /// Returns the owning collection.
    #[must_use]
    pub const fn collection(&self) -> &CollectionId {
        &self.collection
    }

    /// Returns the referenced head.
    #[must_use]
    pub const fn head(&self) -> &BranchHead {
        &self.head
    }

    /// Returns the source the head belongs to.
    #[must_use]
    pub const fn source_id(&self) -> &SourceId {
        self.head.source_id()
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> BranchState {
        self.state
    }

    /// Returns true if the head is no longer reported.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.state == BranchState::Dead
    }

    /// Validates a state transition.
    ///
    /// # Errors
    /// Returns `RegistryError::InvalidTransition` for same-state transitions.
    pub fn validate_transition(from: BranchState, to: BranchState) -> Result<(), RegistryError> {
        let valid = match (from, to) {
            (BranchState::Active, BranchState::Dead) => true,
            (BranchState::Dead, BranchState::Active) => true,
            (BranchState::Active | BranchState::Dead, _) => false,
        };

        if valid {
            Ok(())
        } else {
            Err(RegistryError::InvalidTransition { from, to })
        }
    }

    /// Returns this reference in state `to`.
    ///
    /// # Errors
    /// Returns `RegistryError::InvalidTransition` if the transition is invalid.
    pub fn transition(&self, to: BranchState) -> Result<Self, RegistryError> {
        Self::validate_transition(self.state, to)?;
        Ok(Self {
            state: to,
            ..self.clone()
        })
    }

    /// Returns this reference pointed at `head`, keeping its state.
    #[must_use]
    pub fn repoint(&self, head: BranchHead) -> Self {
        Self {
            head,
            ..self.clone()
        }
    }
}
