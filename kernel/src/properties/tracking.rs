//! The durable record of which property kinds the reconciler installed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::job::PropertyKindId;

/// Kinds installed on a job by the last successful reconciliation.
///
/// Serialized as a sorted array of kind identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingRecord {
    kinds: BTreeSet<PropertyKindId>,
}

impl TrackingRecord {
    /// Creates a record of `kinds`.
    pub fn from_kinds(kinds: impl IntoIterator<Item = PropertyKindId>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Whether `kind` was installed by the reconciler.
    #[must_use]
    pub fn contains(&self, kind: &PropertyKindId) -> bool {
        self.kinds.contains(kind)
    }

    /// Iterates the recorded kinds in order.
    pub fn iter(&self) -> impl Iterator<Item = &PropertyKindId> {
        self.kinds.iter()
    }

    /// Number of recorded kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// True when the last reconciliation installed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
