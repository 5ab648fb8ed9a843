//! Job properties and the per-job property collection.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Kind of the property the branch registry attaches to every branch job.
pub const BRANCH_KIND: &str = "branch";
/// Build and artifact retention limits.
pub const BUILD_DISCARDER_KIND: &str = "build-discarder";
/// Forbids concurrent builds of one job.
pub const DISABLE_CONCURRENT_BUILDS_KIND: &str = "disable-concurrent-builds";
/// Build parameter definitions.
pub const PARAMETERS_KIND: &str = "parameters";
/// Timer and upstream triggers.
pub const PIPELINE_TRIGGERS_KIND: &str = "pipeline-triggers";
/// Health reporting settings, meaningful on folders only.
pub const FOLDER_HEALTH_METRICS_KIND: &str = "folder-health-metrics";

/// Stable identifier of a property kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyKindId(String);

impl PropertyKindId {
    /// Creates a kind identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the registry-owned branch kind.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.0 == BRANCH_KIND
    }
}

impl fmt::Display for PropertyKindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PropertyKindId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PropertyKindId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One configured property: its kind and kind-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProperty {
    kind: PropertyKindId,
    config: serde_json::Value,
}

impl JobProperty {
    /// Creates a property of `kind` with `config`.
    #[must_use]
    pub fn new(kind: impl Into<PropertyKindId>, config: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }

    /// Returns the property kind.
    #[must_use]
    pub const fn kind(&self) -> &PropertyKindId {
        &self.kind
    }

    /// Returns the raw configuration.
    #[must_use]
    pub const fn config(&self) -> &serde_json::Value {
        &self.config
    }
}

/// Properties installed on a job, at most one per kind, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySet {
    entries: Vec<JobProperty>,
}

impl PropertySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the property of `kind`, if present.
    #[must_use]
    pub fn get(&self, kind: &PropertyKindId) -> Option<&JobProperty> {
        self.entries.iter().find(|p| p.kind() == kind)
    }

    /// Returns true if a property of `kind` is present.
    #[must_use]
    pub fn contains(&self, kind: &PropertyKindId) -> bool {
        self.get(kind).is_some()
    }

    /// Installs `property`, replacing the one of the same kind in place.
    /// Returns the replaced property.
    pub fn replace(&mut self, property: JobProperty) -> Option<JobProperty> {
        match self.entries.iter_mut().find(|p| p.kind() == property.kind()) {
            Some(slot) => Some(std::mem::replace(slot, property)),
            None => {
                self.entries.push(property);
                None
            }
        }
    }

    /// Removes the property of `kind`.
    pub fn remove(&mut self, kind: &PropertyKindId) -> Option<JobProperty> {
        let index = self.entries.iter().position(|p| p.kind() == kind)?;
        Some(self.entries.remove(index))
    }

    /// Iterates over the installed properties.
    pub fn iter(&self) -> impl Iterator<Item = &JobProperty> {
        self.entries.iter()
    }

    /// Returns the installed kinds in insertion order.
    #[must_use]
    pub fn kinds(&self) -> Vec<PropertyKindId> {
        self.entries.iter().map(|p| p.kind().clone()).collect()
    }

    /// Number of installed properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no property is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<JobProperty> for PropertySet {
    fn from_iter<I: IntoIterator<Item = JobProperty>>(iter: I) -> Self {
        let mut set = Self::new();
        for property in iter {
            set.replace(property);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_keeps_one_entry_per_kind() {
        let mut set = PropertySet::new();
        assert!(set
            .replace(JobProperty::new(PARAMETERS_KIND, json!([])))
            .is_none());
        let old = set.replace(JobProperty::new(
            PARAMETERS_KIND,
            json!([{"name": "TARGET"}]),
        ));

        assert_eq!(old.map(|p| p.config().clone()), Some(json!([])));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn replace_preserves_position() {
        let mut set: PropertySet = [
            JobProperty::new(PARAMETERS_KIND, json!([])),
            JobProperty::new(PIPELINE_TRIGGERS_KIND, json!([])),
        ]
        .into_iter()
        .collect();
        set.replace(JobProperty::new(PARAMETERS_KIND, json!([{"name": "X"}])));

        assert_eq!(
            set.kinds(),
            vec![
                PropertyKindId::from(PARAMETERS_KIND),
                PropertyKindId::from(PIPELINE_TRIGGERS_KIND)
            ]
        );
    }

    #[test]
    fn remove_missing_kind_is_noop() {
        let mut set = PropertySet::new();
        assert!(set.remove(&PropertyKindId::from(BUILD_DISCARDER_KIND)).is_none());
        assert!(set.is_empty());
    }
}
