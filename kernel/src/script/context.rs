//! The per-build handle scripts call steps on.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{
    StepError, PROPERTIES_STEP, READ_TRUSTED_STEP, RESOLVE_SOURCE_STEP, RETENTION_POLICY_STEP,
};
use crate::job::{BuildNumber, Job, JobProperty, PropertyKindId, RetentionPolicy};
use crate::properties::{PropertyChange, PropertyReconciler};
use crate::scm::{BranchHead, ScmError, ScmSource, SourceConfiguration};
use crate::trust::TrustResolver;

/// Everything a running script may use.
pub struct BuildContext {
    job: Arc<Job>,
    build_number: BuildNumber,
    source_configuration: SourceConfiguration,
    resolver: Arc<TrustResolver>,
    reconciler: PropertyReconciler,
    steps: Mutex<BTreeSet<String>>,
}

impl BuildContext {
    /// Creates the context of build `build_number` of `job`.
    #[must_use]
    pub fn new(
        job: Arc<Job>,
        build_number: BuildNumber,
        source_configuration: SourceConfiguration,
        resolver: Arc<TrustResolver>,
        reconciler: PropertyReconciler,
    ) -> Self {
        Self {
            job,
            build_number,
            source_configuration,
            resolver,
            reconciler,
            steps: Mutex::new(BTreeSet::new()),
        }
    }

    /// The job being built.
    #[must_use]
    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    /// Number of the running build.
    #[must_use]
    pub const fn build_number(&self) -> BuildNumber {
        self.build_number
    }

    /// Source, head and revision this build runs against.
    #[must_use]
    pub const fn source_configuration(&self) -> &SourceConfiguration {
        &self.source_configuration
    }

    /// Names of the steps invoked so far.
    #[must_use]
    pub fn steps(&self) -> BTreeSet<String> {
        self.steps.lock().clone()
    }

    fn record_step(&self, step: &str) {
        self.steps.lock().insert(step.to_string());
    }

    /// Replaces the job's declared properties with `declared`.
    ///
    /// # Errors
    /// Returns `StepError::Property` if a property is rejected or the change
    /// could not be committed; the job is then unchanged.
    pub fn declare_properties<K: Into<PropertyKindId>>(
        &self,
        declared: impl IntoIterator<Item = (K, serde_json::Value)>,
    ) -> Result<PropertyChange, StepError> {
        self.record_step(PROPERTIES_STEP);
        let declared: Vec<JobProperty> = declared
            .into_iter()
            .map(|(kind, config)| JobProperty::new(kind, config))
            .collect();
        Ok(self
            .reconciler
            .apply(&self.job, self.build_number, declared)?)
    }

    /// Installs the build and artifact retention policy.
    ///
    /// # Errors
    /// Returns `StepError::Property` if the policy could not be installed.
    pub fn declare_retention_policy(&self, policy: RetentionPolicy) -> Result<(), StepError> {
        self.record_step(RETENTION_POLICY_STEP);
        self.reconciler
            .replace_property(&self.job, policy.to_property())?;
        Ok(())
    }

    /// Reads a file from the trusted revision of the branch.
    ///
    /// # Errors
    /// Returns `StepError::Trust` when the file is refused or unavailable.
    pub async fn read_trusted_file(&self, path: &str) -> Result<String, StepError> {
        self.record_step(READ_TRUSTED_STEP);
        Ok(self.resolver.read_trusted_file(path).await?)
    }

    /// Finds the first of `candidates` that `source` can resolve.
    ///
    /// Candidates whose lookup fails are skipped. With `ignore_errors` an
    /// unsuccessful search yields `Ok(None)`.
    ///
    /// # Errors
    /// Returns `StepError::NoCandidates` for an empty candidate list, and
    /// `StepError::NoResolvableCandidate` when nothing resolved and
    /// `ignore_errors` is unset.
    #[instrument(skip(self, source), fields(job = %self.job.name(), source = %source.id()))]
    pub async fn resolve_alternate_source(
        &self,
        source: &Arc<dyn ScmSource>,
        candidates: &[&str],
        ignore_errors: bool,
    ) -> Result<Option<SourceConfiguration>, StepError> {
        self.record_step(RESOLVE_SOURCE_STEP);
        if candidates.is_empty() {
            return Err(StepError::NoCandidates(source.id().clone()));
        }

        for candidate in candidates {
            let head = BranchHead::new(*candidate, source.id().clone());
            match source.fetch_tip(&head).await {
                Ok(Some(tip)) => {
                    info!(%head, %tip, "Resolved alternate source");
                    return Ok(Some(SourceConfiguration::pinned(&head, tip)));
                }
                Ok(None) | Err(ScmError::HeadNotFound(_)) => {
                    debug!(%head, "Candidate not found");
                }
                Err(e) => warn!(%head, error = %e, "Candidate lookup failed"),
            }
        }

        if ignore_errors {
            return Ok(None);
        }
        Err(StepError::NoResolvableCandidate {
            source_id: source.id().clone(),
            candidates: candidates.iter().map(ToString::to_string).collect(),
        })
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("job", &self.job.name())
            .field("build_number", &self.build_number)
            .field("source_configuration", &self.source_configuration)
            .finish_non_exhaustive()
    }
}
