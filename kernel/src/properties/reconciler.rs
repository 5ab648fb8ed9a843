//! Diff-and-commit of declared properties.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::legacy::previous_build_declared_properties;
use super::tracking::TrackingRecord;
use super::PropertyError;
use crate::infrastructure::audit::{log_audit, AuditEvent};
use crate::job::{BuildNumber, Job, JobProperty, PropertyKindId, PropertyKindRegistry, PropertySet};
use crate::store::JobStore;

/// Kinds a reconciliation installed and removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyChange {
    /// Declared kinds, now installed.
    pub added: Vec<PropertyKindId>,
    /// Kinds removed and not declared again.
    pub removed: Vec<PropertyKindId>,
}

impl PropertyChange {
    /// True when nothing was installed or removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Installs declared properties on jobs.
#[derive(Clone)]
pub struct PropertyReconciler {
    kinds: Arc<PropertyKindRegistry>,
    store: Arc<dyn JobStore>,
    legacy_migration: bool,
}

impl PropertyReconciler {
    /// Creates a reconciler validating against `kinds` and committing through
    /// `store`. The legacy migration is enabled.
    #[must_use]
    pub fn new(kinds: Arc<PropertyKindRegistry>, store: Arc<dyn JobStore>) -> Self {
        Self {
            kinds,
            store,
            legacy_migration: true,
        }
    }

    /// Enables or disables the fallback for jobs without a tracking record.
    #[must_use]
    pub fn with_legacy_migration(mut self, enabled: bool) -> Self {
        self.legacy_migration = enabled;
        self
    }

    /// Replaces the properties previously installed by the reconciler with
    /// `declared`.
    ///
    /// Properties the reconciler did not install are kept, and so is the
    /// protected `branch` kind. When several declarations share a kind the
    /// last one wins.
    ///
    /// # Errors
    /// Returns `PropertyError::InapplicableProperty` if any declared property
    /// is rejected, or `PropertyError::CommitFailure` if persisting failed. In
    /// both cases the job is unchanged.
    #[instrument(skip(self, job, declared), fields(job = %job.name(), build = %build_number))]
    pub fn apply(
        &self,
        job: &Job,
        build_number: BuildNumber,
        declared: Vec<JobProperty>,
    ) -> Result<PropertyChange, PropertyError> {
        for property in &declared {
            self.kinds.validate_declared(property, job.job_type())?;
        }
        let declared: PropertySet = declared.into_iter().collect();
        let legacy =
            self.legacy_migration && previous_build_declared_properties(job, build_number);

        let change = job.update_config(
            |current| {
                let mut next = current.clone();
                let mut removed = Vec::new();

                for kind in current.properties.kinds() {
                    if kind.is_branch() {
                        continue;
                    }
                    let owned = match &current.tracking {
                        Some(record) => record.contains(&kind),
                        None => legacy,
                    };
                    if owned {
                        next.properties.remove(&kind);
                        if !declared.contains(&kind) {
                            removed.push(kind);
                        }
                    }
                }

                for property in declared.iter() {
                    next.properties.replace(property.clone());
                }
                let added = declared.kinds();
                next.tracking = Some(TrackingRecord::from_kinds(added.iter().cloned()));

                if current.tracking.is_none() && legacy {
                    debug!("No tracking record, replaced all properties of the previous declaration");
                }
                Ok((next, PropertyChange { added, removed }))
            },
            |snapshot| self.store.save(snapshot).map_err(PropertyError::CommitFailure),
        )?;

        info!(added = change.added.len(), removed = change.removed.len(), "Properties reconciled");
        if !change.is_empty() {
            log_audit(&AuditEvent::PropertiesReplaced {
                job: job.name().to_string(),
                added: change.added.iter().map(ToString::to_string).collect(),
                removed: change.removed.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(change)
    }

    /// Installs `property`, replacing any property of the same kind. The
    /// tracking record is left as it is.
    ///
    /// # Errors
    /// Same as [`Self::apply`].
    #[instrument(skip(self, job, property), fields(job = %job.name(), kind = %property.kind()))]
    pub fn replace_property(&self, job: &Job, property: JobProperty) -> Result<(), PropertyError> {
        self.kinds.validate_declared(&property, job.job_type())?;
        job.update_config(
            |current| {
                let mut next = current.clone();
                next.properties.replace(property);
                Ok((next, ()))
            },
            |snapshot| self.store.save(snapshot).map_err(PropertyError::CommitFailure),
        )?;
        debug!("Property replaced");
        Ok(())
    }
}

impl std::fmt::Debug for PropertyReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyReconciler")
            .field("kinds", &self.kinds)
            .field("legacy_migration", &self.legacy_migration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::job::property::{
        BRANCH_KIND, DISABLE_CONCURRENT_BUILDS_KIND, PARAMETERS_KIND, PIPELINE_TRIGGERS_KIND,
    };
    use crate::job::{BuildRecord, BuildResult, JobConfig, JobType, KindError, RetentionPolicy};
    use crate::properties::legacy::PROPERTIES_STEP;
    use crate::store::MemoryStore;

    fn reconciler(store: &Arc<MemoryStore>) -> PropertyReconciler {
        PropertyReconciler::new(Arc::new(PropertyKindRegistry::builtin()), store.clone())
    }

    fn params(name: &str) -> JobProperty {
        JobProperty::new(PARAMETERS_KIND, json!([{ "name": name }]))
    }

    fn no_concurrency() -> JobProperty {
        JobProperty::new(DISABLE_CONCURRENT_BUILDS_KIND, json!({}))
    }

    fn branch_job(extra: &[JobProperty]) -> Job {
        let mut config = JobConfig::default();
        config
            .properties
            .replace(JobProperty::new(BRANCH_KIND, json!({"protected": true})));
        for property in extra {
            config.properties.replace(property.clone());
        }
        Job::new("master", JobType::Branch, config)
    }

    #[test]
    fn round_trip_keeps_protected_and_untracked_properties() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store);
        let manual = JobProperty::new(
            PIPELINE_TRIGGERS_KIND,
            json!([{ "type": "cron", "spec": "H * * * *" }]),
        );
        let job = branch_job(&[manual.clone()]);

        let change = reconciler
            .apply(&job, BuildNumber::new(1), vec![params("A"), no_concurrency()])
            .unwrap();
        assert_eq!(change.added.len(), 2);
        assert!(change.removed.is_empty());

        let change = reconciler
            .apply(&job, BuildNumber::new(2), vec![params("B")])
            .unwrap();
        assert_eq!(change.removed, vec![PropertyKindId::from(DISABLE_CONCURRENT_BUILDS_KIND)]);

        let config = job.config();
        assert!(config.properties.contains(&BRANCH_KIND.into()));
        assert_eq!(config.properties.get(&PIPELINE_TRIGGERS_KIND.into()), Some(&manual));
        assert_eq!(
            config.properties.get(&PARAMETERS_KIND.into()),
            Some(&params("B"))
        );
        assert!(job.allows_concurrent_builds());
        assert_eq!(
            config.tracking,
            Some(TrackingRecord::from_kinds([PARAMETERS_KIND.into()]))
        );

        reconciler.apply(&job, BuildNumber::new(3), vec![]).unwrap();
        let config = job.config();
        assert_eq!(config.properties.len(), 2);
        assert_eq!(config.tracking, Some(TrackingRecord::default()));
    }

    #[test]
    fn last_declaration_of_a_kind_wins() {
        let store = Arc::new(MemoryStore::new());
        let job = branch_job(&[]);
        reconciler(&store)
            .apply(&job, BuildNumber::new(1), vec![params("first"), params("second")])
            .unwrap();
        assert_eq!(
            job.config().properties.get(&PARAMETERS_KIND.into()),
            Some(&params("second"))
        );
    }

    #[test]
    fn inapplicable_property_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let job = branch_job(&[params("A")]);
        let before = serde_json::to_vec(&job.snapshot()).unwrap();

        let err = reconciler(&store)
            .apply(
                &job,
                BuildNumber::new(1),
                vec![
                    no_concurrency(),
                    JobProperty::new(BRANCH_KIND, json!({})),
                ],
            )
            .unwrap_err();

        assert!(matches!(
            err,
            PropertyError::InapplicableProperty(KindError::NotDeclarable(_))
        ));
        assert_eq!(serde_json::to_vec(&job.snapshot()).unwrap(), before);
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn commit_failure_leaves_state_byte_for_byte_equal() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store);
        let job = branch_job(&[]);
        reconciler
            .apply(&job, BuildNumber::new(1), vec![params("A")])
            .unwrap();
        let before = serde_json::to_vec(&job.snapshot()).unwrap();

        store.reject_writes(true);
        let err = reconciler
            .apply(&job, BuildNumber::new(2), vec![no_concurrency()])
            .unwrap_err();

        assert!(matches!(err, PropertyError::CommitFailure(_)));
        assert_eq!(serde_json::to_vec(&job.snapshot()).unwrap(), before);
    }

    #[test]
    fn legacy_fallback_removes_untracked_properties_once() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store);
        let job = branch_job(&[params("old"), no_concurrency()]);
        job.record_build(
            BuildRecord::finished(BuildNumber::new(1), BuildResult::Success)
                .with_steps([PROPERTIES_STEP.to_string()]),
        );

        let change = reconciler
            .apply(&job, BuildNumber::new(2), vec![params("new")])
            .unwrap();

        assert_eq!(change.removed, vec![PropertyKindId::from(DISABLE_CONCURRENT_BUILDS_KIND)]);
        let config = job.config();
        assert!(config.properties.contains(&BRANCH_KIND.into()));
        assert_eq!(config.properties.len(), 2);
    }

    #[test]
    fn without_record_or_previous_declaration_nothing_is_removed() {
        let store = Arc::new(MemoryStore::new());
        let job = branch_job(&[no_concurrency()]);
        job.record_build(BuildRecord::finished(BuildNumber::new(1), BuildResult::Success));

        let change = reconciler(&store)
            .apply(&job, BuildNumber::new(2), vec![params("A")])
            .unwrap();

        assert!(change.removed.is_empty());
        assert!(!job.allows_concurrent_builds());
    }

    #[test]
    fn legacy_fallback_can_be_disabled() {
        let store = Arc::new(MemoryStore::new());
        let job = branch_job(&[no_concurrency()]);
        job.record_build(
            BuildRecord::finished(BuildNumber::new(1), BuildResult::Success)
                .with_steps([PROPERTIES_STEP.to_string()]),
        );

        reconciler(&store)
            .with_legacy_migration(false)
            .apply(&job, BuildNumber::new(2), vec![])
            .unwrap();

        assert!(!job.allows_concurrent_builds());
    }

    #[test]
    fn replace_property_keeps_tracking_record() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store);
        let job = branch_job(&[]);
        reconciler
            .apply(&job, BuildNumber::new(1), vec![params("A")])
            .unwrap();
        let tracking = job.config().tracking.clone();

        let policy = RetentionPolicy {
            num_to_keep: Some(5),
            ..RetentionPolicy::default()
        };
        reconciler
            .replace_property(&job, policy.to_property())
            .unwrap();

        assert_eq!(job.retention_policy(), Some(policy));
        assert_eq!(job.config().tracking, tracking);
    }
}
