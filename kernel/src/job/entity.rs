//! The job entity.
//!
//! A job's configuration (branch reference, properties, tracking record) is
//! held as one immutable snapshot behind a lock. Writers build a new snapshot
//! and swap it in, so readers always see either the old or the new
//! configuration in full.

use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::history::{BuildNumber, BuildRecord};
use super::kinds::{ConcurrentBuildsPolicy, RetentionPolicy};
use super::property::{
    PropertyKindId, PropertySet, BUILD_DISCARDER_KIND, DISABLE_CONCURRENT_BUILDS_KIND,
};
use crate::branch::BranchReference;
use crate::properties::TrackingRecord;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(uuid::Uuid);

impl JobId {
    /// Creates a new `JobId` with a random UUID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn inner(self) -> uuid::Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a job is, which decides the properties it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Generated from a branch by the registry.
    Branch,
    /// Created directly by an administrator.
    Standalone,
    /// A container of other jobs.
    Folder,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branch => write!(f, "branch"),
            Self::Standalone => write!(f, "standalone"),
            Self::Folder => write!(f, "folder"),
        }
    }
}

/// Durable configuration of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Link to the branch the job was generated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchReference>,
    /// Installed properties.
    #[serde(default)]
    pub properties: PropertySet,
    /// Kinds last installed by the property reconciler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<TrackingRecord>,
}

/// Everything the job store persists for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job identifier.
    pub id: JobId,
    /// Job name within its collection.
    pub name: String,
    /// Job type.
    pub job_type: JobType,
    /// Configuration at the time of the snapshot.
    pub config: JobConfig,
    /// Number the next build will get.
    pub next_build_number: u32,
}

/// A job owned by a collection.
pub struct Job {
    id: JobId,
    name: String,
    job_type: JobType,
    config: RwLock<Arc<JobConfig>>,
    builds: RwLock<Vec<BuildRecord>>,
    next_build: AtomicU32,
    build_gate: Arc<tokio::sync::Mutex<()>>,
}

impl Job {
    /// Creates a job with an empty history.
    #[must_use]
    pub fn new(name: impl Into<String>, job_type: JobType, config: JobConfig) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            job_type,
            config: RwLock::new(Arc::new(config)),
            builds: RwLock::new(Vec::new()),
            next_build: AtomicU32::new(1),
            build_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Recreates a job from a persisted snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: JobSnapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name,
            job_type: snapshot.job_type,
            config: RwLock::new(Arc::new(snapshot.config)),
            builds: RwLock::new(Vec::new()),
            next_build: AtomicU32::new(snapshot.next_build_number.max(1)),
            build_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Returns the job ID.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Returns the job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the job type.
    #[must_use]
    pub const fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Returns the current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<JobConfig> {
        Arc::clone(&self.config.read())
    }

    /// Returns the branch reference, if this is a branch job.
    #[must_use]
    pub fn branch(&self) -> Option<BranchReference> {
        self.config.read().branch.clone()
    }

    /// Returns a persistable snapshot built from `config`.
    #[must_use]
    pub fn snapshot_with(&self, config: JobConfig) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            name: self.name.clone(),
            job_type: self.job_type,
            config,
            next_build_number: self.next_build.load(Ordering::SeqCst),
        }
    }

    /// Returns a persistable snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        self.snapshot_with(JobConfig::clone(&self.config()))
    }

    /// Replaces the configuration after `commit` accepted the candidate.
    ///
    /// `update` derives the candidate from the current snapshot. Concurrent
    /// updates are serialized; readers keep seeing the old snapshot until
    /// `commit` succeeds, and keep it for good if `commit` fails.
    ///
    /// # Errors
    /// Returns whatever `update` or `commit` returns; the job is left untouched.
    pub fn update_config<T, E>(
        &self,
        update: impl FnOnce(&JobConfig) -> Result<(JobConfig, T), E>,
        commit: impl FnOnce(&JobSnapshot) -> Result<(), E>,
    ) -> Result<T, E> {
        let guard = self.config.upgradable_read();
        let (candidate, outcome) = update(&guard)?;
        let snapshot = self.snapshot_with(candidate);
        commit(&snapshot)?;

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        *guard = Arc::new(snapshot.config);
        Ok(outcome)
    }

    /// Whether two builds of this job may run at the same time.
    #[must_use]
    pub fn allows_concurrent_builds(&self) -> bool {
        self.concurrency_policy().is_none()
    }

    /// Returns the installed concurrency policy, if concurrent builds are disabled.
    #[must_use]
    pub fn concurrency_policy(&self) -> Option<ConcurrentBuildsPolicy> {
        let config = self.config();
        let property = config
            .properties
            .get(&PropertyKindId::from(DISABLE_CONCURRENT_BUILDS_KIND))?;
        Some(serde_json::from_value(property.config().clone()).unwrap_or_default())
    }

    /// Returns the installed retention policy.
    #[must_use]
    pub fn retention_policy(&self) -> Option<RetentionPolicy> {
        let config = self.config();
        config
            .properties
            .get(&PropertyKindId::from(BUILD_DISCARDER_KIND))
            .and_then(RetentionPolicy::from_property)
    }

    /// Gate held by builds when concurrent builds are disabled.
    #[must_use]
    pub fn build_gate(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.build_gate)
    }

    /// Allocates the next build number.
    pub fn next_build_number(&self) -> BuildNumber {
        BuildNumber::new(self.next_build.fetch_add(1, Ordering::SeqCst))
    }

    /// Appends a finished build and applies the retention policy.
    pub fn record_build(&self, record: BuildRecord) {
        let policy = self.retention_policy();
        let mut builds = self.builds.write();
        builds.push(record);
        builds.sort_by_key(BuildRecord::number);

        if let Some(policy) = policy {
            if let Some(days) = policy.days_to_keep {
                let cutoff = Duration::try_days(i64::from(days))
                    .and_then(|age| Utc::now().checked_sub_signed(age));
                match cutoff {
                    Some(cutoff) => builds.retain(|b| b.finished_at() >= cutoff),
                    None => debug!(job = %self.name, days, "Day limit out of range, keeping builds"),
                }
            }
            if let Some(keep) = policy.num_to_keep {
                let keep = usize::try_from(keep).unwrap_or(usize::MAX);
                if builds.len() > keep {
                    let excess = builds.len() - keep;
                    builds.drain(..excess);
                    debug!(job = %self.name, discarded = excess, "Discarded old builds");
                }
            }
        }
    }

    /// Returns the build history, oldest first.
    #[must_use]
    pub fn builds(&self) -> Vec<BuildRecord> {
        self.builds.read().clone()
    }

    /// Returns the most recent build.
    #[must_use]
    pub fn last_build(&self) -> Option<BuildRecord> {
        self.builds.read().last().cloned()
    }

    /// Returns the latest completed build numbered before `before`.
    #[must_use]
    pub fn previous_completed_build(&self, before: BuildNumber) -> Option<BuildRecord> {
        self.builds
            .read()
            .iter()
            .rev()
            .find(|b| b.number() < before)
            .cloned()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("job_type", &self.job_type)
            .field("config", &self.config())
            .finish_non_exhaustive()
    }
}
