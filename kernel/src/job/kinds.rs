//! Property kind registry.
//!
//! Maps a stable kind identifier to the schema, validator and applicability
//! rules of that kind. The table is assembled once when configuration is
//! loaded; lookups never reflect over types at call time.

use std::collections::{BTreeMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::entity::JobType;
use super::property::{
    JobProperty, PropertyKindId, BRANCH_KIND, BUILD_DISCARDER_KIND,
    DISABLE_CONCURRENT_BUILDS_KIND, FOLDER_HEALTH_METRICS_KIND, PARAMETERS_KIND,
    PIPELINE_TRIGGERS_KIND,
};
use crate::branch::BranchReference;

/// Reasons a property is rejected for a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KindError {
    /// No kind with this identifier is registered.
    #[error("unknown property kind '{0}'")]
    Unknown(PropertyKindId),
    /// The kind is owned by the system and cannot be declared by scripts.
    #[error("property kind '{0}' cannot be declared")]
    NotDeclarable(PropertyKindId),
    /// The kind does not apply to this type of job.
    #[error("property kind '{kind}' is not applicable to {job_type} jobs")]
    NotApplicable {
        /// Rejected kind.
        kind: PropertyKindId,
        /// Type of the target job.
        job_type: JobType,
    },
    /// The configuration does not match the kind's schema.
    #[error("invalid configuration for property kind '{kind}': {reason}")]
    InvalidConfig {
        /// Rejected kind.
        kind: PropertyKindId,
        /// Schema violation.
        reason: String,
    },
}

/// Behaviour attached to one property kind.
pub trait PropertyKindSpec: Send + Sync {
    /// Identifier of the kind.
    fn id(&self) -> &PropertyKindId;

    /// Whether the kind may be installed on jobs of `job_type`.
    fn applies_to(&self, job_type: JobType) -> bool;

    /// Whether build scripts may declare this kind.
    fn declarable(&self) -> bool {
        true
    }

    /// Validates `config` against the kind's schema.
    ///
    /// # Errors
    /// Returns a description of the first schema violation.
    fn validate(&self, config: &serde_json::Value) -> Result<(), String>;
}

/// A kind whose schema is a serde type `T`.
pub struct TypedKind<T> {
    id: PropertyKindId,
    applies_to: Vec<JobType>,
    declarable: bool,
    check: Option<fn(&T) -> Result<(), String>>,
    _schema: PhantomData<fn() -> T>,
}

impl<T> TypedKind<T> {
    /// Creates a declarable kind applicable to the given job types.
    #[must_use]
    pub fn new(id: &str, applies_to: &[JobType]) -> Self {
        Self {
            id: PropertyKindId::new(id),
            applies_to: applies_to.to_vec(),
            declarable: true,
            check: None,
            _schema: PhantomData,
        }
    }

    /// Marks the kind as system-owned.
    #[must_use]
    pub fn system_owned(mut self) -> Self {
        self.declarable = false;
        self
    }

    /// Adds a semantic check that runs after the schema parsed.
    #[must_use]
    pub fn with_check(mut self, check: fn(&T) -> Result<(), String>) -> Self {
        self.check = Some(check);
        self
    }
}

impl<T: DeserializeOwned> PropertyKindSpec for TypedKind<T> {
    fn id(&self) -> &PropertyKindId {
        &self.id
    }

    fn applies_to(&self, job_type: JobType) -> bool {
        self.applies_to.contains(&job_type)
    }

    fn declarable(&self) -> bool {
        self.declarable
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), String> {
        let parsed: T = serde_json::from_value(config.clone()).map_err(|e| e.to_string())?;
        match self.check {
            Some(check) => check(&parsed),
            None => Ok(()),
        }
    }
}

/// Build and artifact retention limits (`build-discarder`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionPolicy {
    /// Builds older than this many days are discarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_to_keep: Option<u32>,
    /// At most this many builds are kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_to_keep: Option<u32>,
    /// Artifacts older than this many days are discarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_days_to_keep: Option<u32>,
    /// Artifacts are kept for at most this many builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_num_to_keep: Option<u32>,
}

impl RetentionPolicy {
    /// Encodes the policy as a `build-discarder` property.
    #[must_use]
    pub fn to_property(&self) -> JobProperty {
        JobProperty::new(
            BUILD_DISCARDER_KIND,
            serde_json::to_value(self).unwrap_or_default(),
        )
    }

    /// Decodes a `build-discarder` property.
    #[must_use]
    pub fn from_property(property: &JobProperty) -> Option<Self> {
        if property.kind().as_str() != BUILD_DISCARDER_KIND {
            return None;
        }
        serde_json::from_value(property.config().clone()).ok()
    }
}

/// Configuration of `disable-concurrent-builds`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrentBuildsPolicy {
    /// Abort the earlier running or queued builds when a new build starts.
    #[serde(default)]
    pub abort_previous: bool,
}

/// One entry of the `parameters` property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterDefinition {
    /// Parameter name, unique within the job.
    pub name: String,
    /// Default value.
    #[serde(default)]
    pub default: Option<String>,
    /// Human readable description.
    #[serde(default)]
    pub description: Option<String>,
}

/// One entry of the `pipeline-triggers` property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum TriggerSpec {
    /// Periodic trigger in cron syntax.
    Cron {
        /// Cron expression.
        spec: String,
    },
    /// Trigger after other jobs complete.
    Upstream {
        /// Upstream job names.
        jobs: Vec<String>,
    },
}

/// Configuration of `folder-health-metrics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FolderHealthMetrics {
    /// Include nested folders.
    #[serde(default)]
    pub recursive: bool,
}

fn check_parameters(parameters: &Vec<ParameterDefinition>) -> Result<(), String> {
    let mut seen = HashSet::new();
    for parameter in parameters {
        if parameter.name.trim().is_empty() {
            return Err("parameter name cannot be empty".to_string());
        }
        if !seen.insert(parameter.name.as_str()) {
            return Err(format!("duplicate parameter '{}'", parameter.name));
        }
    }
    Ok(())
}

fn check_triggers(triggers: &Vec<TriggerSpec>) -> Result<(), String> {
    for trigger in triggers {
        match trigger {
            TriggerSpec::Cron { spec } if spec.split_whitespace().count() != 5 => {
                return Err(format!("cron spec '{spec}' must have five fields"));
            }
            TriggerSpec::Upstream { jobs } if jobs.is_empty() => {
                return Err("upstream trigger needs at least one job".to_string());
            }
            _ => {}
        }
    }
    Ok(())
}

/// Table of known property kinds.
#[derive(Clone, Default)]
pub struct PropertyKindRegistry {
    kinds: BTreeMap<PropertyKindId, Arc<dyn PropertyKindSpec>>,
}

impl PropertyKindRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in kinds.
    #[must_use]
    pub fn builtin() -> Self {
        use JobType::{Branch, Folder, Standalone};

        let mut registry = Self::new();
        registry.register(TypedKind::<BranchReference>::new(BRANCH_KIND, &[Branch]).system_owned());
        registry.register(TypedKind::<RetentionPolicy>::new(
            BUILD_DISCARDER_KIND,
            &[Branch, Standalone],
        ));
        registry.register(TypedKind::<ConcurrentBuildsPolicy>::new(
            DISABLE_CONCURRENT_BUILDS_KIND,
            &[Branch, Standalone],
        ));
        registry.register(
            TypedKind::<Vec<ParameterDefinition>>::new(PARAMETERS_KIND, &[Branch, Standalone])
                .with_check(check_parameters),
        );
        registry.register(
            TypedKind::<Vec<TriggerSpec>>::new(PIPELINE_TRIGGERS_KIND, &[Branch, Standalone])
                .with_check(check_triggers),
        );
        registry.register(TypedKind::<FolderHealthMetrics>::new(
            FOLDER_HEALTH_METRICS_KIND,
            &[Folder],
        ));
        registry
    }

    /// Registers (or replaces) a kind.
    pub fn register(&mut self, spec: impl PropertyKindSpec + 'static) {
        debug!(kind = %spec.id(), "Registering property kind");
        self.kinds.insert(spec.id().clone(), Arc::new(spec));
    }

    /// Looks a kind up.
    #[must_use]
    pub fn get(&self, id: &PropertyKindId) -> Option<Arc<dyn PropertyKindSpec>> {
        self.kinds.get(id).cloned()
    }

    /// Lists the registered kind identifiers.
    #[must_use]
    pub fn ids(&self) -> Vec<PropertyKindId> {
        self.kinds.keys().cloned().collect()
    }

    /// Checks that a script may install `property` on a job of `job_type`.
    ///
    /// # Errors
    /// Returns `KindError` naming the first rule the property breaks.
    pub fn validate_declared(
        &self,
        property: &JobProperty,
        job_type: JobType,
    ) -> Result<(), KindError> {
        let kind = property.kind();
        let spec = self
            .get(kind)
            .ok_or_else(|| KindError::Unknown(kind.clone()))?;
        if !spec.declarable() {
            return Err(KindError::NotDeclarable(kind.clone()));
        }
        if !spec.applies_to(job_type) {
            return Err(KindError::NotApplicable {
                kind: kind.clone(),
                job_type,
            });
        }
        spec.validate(property.config())
            .map_err(|reason| KindError::InvalidConfig {
                kind: kind.clone(),
                reason,
            })
    }
}

impl std::fmt::Debug for PropertyKindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyKindRegistry")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_accepts_valid_retention_policy() {
        let registry = PropertyKindRegistry::builtin();
        let property = RetentionPolicy {
            num_to_keep: Some(10),
            ..RetentionPolicy::default()
        }
        .to_property();
        assert!(registry
            .validate_declared(&property, JobType::Branch)
            .is_ok());
    }

    #[test]
    fn branch_kind_is_not_declarable() {
        let registry = PropertyKindRegistry::builtin();
        let property = JobProperty::new(BRANCH_KIND, json!({}));
        assert!(matches!(
            registry.validate_declared(&property, JobType::Branch),
            Err(KindError::NotDeclarable(_))
        ));
    }

    #[test]
    fn folder_kind_is_not_applicable_to_branch_jobs() {
        let registry = PropertyKindRegistry::builtin();
        let property = JobProperty::new(FOLDER_HEALTH_METRICS_KIND, json!({}));
        assert!(matches!(
            registry.validate_declared(&property, JobType::Branch),
            Err(KindError::NotApplicable { .. })
        ));
        assert!(registry
            .validate_declared(&property, JobType::Folder)
            .is_ok());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let registry = PropertyKindRegistry::builtin();
        let property = JobProperty::new("no-such-kind", json!(null));
        assert!(matches!(
            registry.validate_declared(&property, JobType::Branch),
            Err(KindError::Unknown(_))
        ));
    }

    #[test]
    fn schema_violations_are_reported() {
        let registry = PropertyKindRegistry::builtin();
        let bad_field = JobProperty::new(BUILD_DISCARDER_KIND, json!({"keep": 3}));
        assert!(matches!(
            registry.validate_declared(&bad_field, JobType::Branch),
            Err(KindError::InvalidConfig { .. })
        ));

        let duplicate = JobProperty::new(
            PARAMETERS_KIND,
            json!([{"name": "A"}, {"name": "A"}]),
        );
        assert!(matches!(
            registry.validate_declared(&duplicate, JobType::Branch),
            Err(KindError::InvalidConfig { reason, .. }) if reason.contains("duplicate")
        ));

        let cron = JobProperty::new(
            PIPELINE_TRIGGERS_KIND,
            json!([{"type": "cron", "spec": "H * * *"}]),
        );
        assert!(registry.validate_declared(&cron, JobType::Branch).is_err());
    }

    #[test]
    fn retention_policy_property_round_trip() {
        let policy = RetentionPolicy {
            days_to_keep: Some(7),
            artifact_num_to_keep: Some(2),
            ..RetentionPolicy::default()
        };
        assert_eq!(RetentionPolicy::from_property(&policy.to_property()), Some(policy));
    }
}
