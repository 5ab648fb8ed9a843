//! The branch registry.
//!
//! Owns the jobs of one collection (by `JobId`) and keeps the branch jobs in
//! step with what the configured sources report.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use super::naming::{encode_job_name, validate_head_name};
use super::permissions::{Actor, AllowAll, Authorizer, BranchAwareAuthorizer, Permission};
use super::reference::{BranchReference, BranchState, CollectionId};
use super::RegistryError;
use crate::build::{BuildCause, BuildScheduler};
use crate::infrastructure::audit::{log_audit, AuditEvent};
use crate::job::property::BRANCH_KIND;
use crate::job::{Job, JobConfig, JobId, JobProperty, JobType};
use crate::scm::{BranchHead, ScmSource, SourceId};
use crate::store::{JobStore, StoreError};

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Jobs created for newly reported heads.
    pub created: Vec<JobId>,
    /// Jobs re-pointed to another source or revived.
    pub updated: Vec<JobId>,
    /// Jobs whose head disappeared and that were marked dead.
    pub orphaned: Vec<JobId>,
    /// Per-branch and per-source failures; none of them aborted the pass.
    pub errors: Vec<RegistryError>,
}

impl ReconcileReport {
    /// True when the pass changed nothing.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.orphaned.is_empty()
    }
}

/// Returns `config` carrying `reference`, both as the job's branch link and as
/// the protected `branch` property.
fn with_reference(config: &JobConfig, reference: BranchReference) -> Result<JobConfig, StoreError> {
    let value =
        serde_json::to_value(&reference).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let mut next = config.clone();
    next.properties.replace(JobProperty::new(BRANCH_KIND, value));
    next.branch = Some(reference);
    Ok(next)
}

/// Registry of the jobs in one collection.
pub struct BranchRegistry {
    id: CollectionId,
    jobs: RwLock<BTreeMap<JobId, Arc<Job>>>,
    store: Arc<dyn JobStore>,
    authorizer: BranchAwareAuthorizer<Arc<dyn Authorizer>>,
    scheduler: Option<Arc<dyn BuildScheduler>>,
    build_on_create: bool,
    reconcile_lock: tokio::sync::Mutex<()>,
}

impl BranchRegistry {
    /// Creates an empty registry persisting through `store`.
    #[must_use]
    pub fn new(id: CollectionId, store: Arc<dyn JobStore>) -> Self {
        Self {
            id,
            jobs: RwLock::new(BTreeMap::new()),
            store,
            authorizer: BranchAwareAuthorizer::new(Arc::new(AllowAll)),
            scheduler: None,
            build_on_create: true,
            reconcile_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Uses `authorizer` as the base permission check.
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = BranchAwareAuthorizer::new(authorizer);
        self
    }

    /// Sends build requests for new branch jobs to `scheduler`.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn BuildScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Whether new branch jobs get an initial build request.
    #[must_use]
    pub fn with_initial_builds(mut self, enabled: bool) -> Self {
        self.build_on_create = enabled;
        self
    }

    /// Returns the collection identifier.
    #[must_use]
    pub const fn id(&self) -> &CollectionId {
        &self.id
    }

    /// Returns a job by id.
    #[must_use]
    pub fn job(&self, id: JobId) -> Option<Arc<Job>> {
        self.jobs.read().get(&id).cloned()
    }

    /// Returns a job by its name.
    #[must_use]
    pub fn job_by_name(&self, name: &str) -> Option<Arc<Job>> {
        self.jobs.read().values().find(|j| j.name() == name).cloned()
    }

    /// Returns every job, ordered by id.
    #[must_use]
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.jobs.read().values().cloned().collect()
    }

    /// Returns the branch jobs whose reference is dead.
    #[must_use]
    pub fn dead_jobs(&self) -> Vec<Arc<Job>> {
        self.jobs
            .read()
            .values()
            .filter(|j| j.branch().is_some_and(|r| r.is_dead()))
            .cloned()
            .collect()
    }

    fn branch_job_for(&self, head_name: &str) -> Option<Arc<Job>> {
        self.jobs
            .read()
            .values()
            .find(|j| j.branch().is_some_and(|r| r.head().name() == head_name))
            .cloned()
    }

    /// Reloads the persisted jobs of this collection.
    ///
    /// Branch jobs owned by another collection are skipped. Returns the number
    /// of jobs loaded.
    ///
    /// # Errors
    /// Returns `RegistryError::Store` if the store cannot be read.
    #[instrument(skip(self), fields(collection = %self.id))]
    pub fn restore(&self) -> Result<usize, RegistryError> {
        let snapshots = self.store.load_all()?;
        let mut jobs = self.jobs.write();
        let mut loaded = 0;
        for snapshot in snapshots {
            if let Some(reference) = &snapshot.config.branch {
                if reference.collection() != &self.id {
                    debug!(job = %snapshot.name, owner = %reference.collection(), "Skipping job of another collection");
                    continue;
                }
            }
            let job = Job::from_snapshot(snapshot);
            jobs.insert(job.id(), Arc::new(job));
            loaded += 1;
        }
        info!(loaded, "Restored jobs");
        Ok(loaded)
    }

    /// Creates a job that is not generated from a branch.
    ///
    /// # Errors
    /// Returns `RegistryError::JobAlreadyExists` if the name is taken, or
    /// `RegistryError::Store` if the job could not be persisted.
    pub fn add_standalone_job(
        &self,
        name: &str,
        job_type: JobType,
    ) -> Result<Arc<Job>, RegistryError> {
        if self.job_by_name(name).is_some() {
            return Err(RegistryError::JobAlreadyExists(name.to_string()));
        }
        let job = Arc::new(Job::new(name, job_type, JobConfig::default()));
        self.store.save(&job.snapshot())?;
        self.jobs.write().insert(job.id(), Arc::clone(&job));
        info!(job = %name, %job_type, "Created job");
        Ok(job)
    }

    fn authorize(&self, job: &Job, actor: &Actor, permission: Permission) -> Result<(), RegistryError> {
        let state = job.branch().map(|r| r.state());
        self.authorizer
            .check(actor, permission, state)
            .map_err(|e| {
                warn!(job = %job.name(), %actor, %permission, "Access denied");
                log_audit(&AuditEvent::AccessDenied {
                    user: actor.to_string(),
                    resource: job.name().to_string(),
                    permission: permission.to_string(),
                });
                RegistryError::from(e)
            })
    }

    /// Returns the job if `actor` may build it.
    ///
    /// # Errors
    /// Returns `RegistryError::JobNotFound` or `RegistryError::Permission`
    /// (for instance when the branch is dead).
    pub fn check_build_permitted(&self, id: JobId, actor: &Actor) -> Result<Arc<Job>, RegistryError> {
        let job = self.job(id).ok_or(RegistryError::JobNotFound(id))?;
        self.authorize(&job, actor, Permission::Build)?;
        Ok(job)
    }

    /// Deletes a job. Branch jobs can only be deleted once dead.
    ///
    /// Waits for a running reconciliation, so a branch it revives is checked
    /// in its revived state.
    ///
    /// # Errors
    /// Returns `RegistryError::JobNotFound`, `RegistryError::Permission`, or
    /// `RegistryError::Store` if the stored snapshot could not be removed.
    #[instrument(skip(self), fields(collection = %self.id))]
    pub async fn delete_job(&self, id: JobId, actor: &Actor) -> Result<(), RegistryError> {
        let _pass = self.reconcile_lock.lock().await;
        let job = self.job(id).ok_or(RegistryError::JobNotFound(id))?;
        self.authorize(&job, actor, Permission::Delete)?;
        self.store.delete(id)?;
        self.jobs.write().remove(&id);

        info!(job = %job.name(), "Deleted job");
        log_audit(&AuditEvent::JobDeleted {
            job: job.name().to_string(),
            user: actor.to_string(),
        });
        Ok(())
    }

    /// Brings the branch jobs in line with what `sources` report.
    ///
    /// Sources are consulted in order; the first source reporting a head name
    /// owns it. Failures are collected in the report and never abort the pass.
    /// Concurrent calls are serialized.
    #[instrument(skip(self, sources), fields(collection = %self.id, sources = sources.len()))]
    pub async fn reconcile(&self, sources: &[Arc<dyn ScmSource>]) -> ReconcileReport {
        let _pass = self.reconcile_lock.lock().await;
        let mut report = ReconcileReport::default();

        let mut listing: BTreeMap<String, BranchHead> = BTreeMap::new();
        let mut failed: HashSet<SourceId> = HashSet::new();
        for source in sources {
            let heads = match source.list_heads().await {
                Ok(heads) => heads,
                Err(e) => {
                    warn!(source = %source.id(), error = %e, "Source listing failed");
                    failed.insert(source.id().clone());
                    report.errors.push(RegistryError::SourceUnavailable {
                        source_id: source.id().clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            for head in heads {
                if let Err(e) = validate_head_name(head.name()) {
                    warn!(source = %source.id(), error = %e, "Skipping malformed head");
                    report.errors.push(e);
                    continue;
                }
                match listing.entry(head.name().to_string()) {
                    Entry::Vacant(slot) => {
                        slot.insert(head);
                    }
                    Entry::Occupied(owner) => {
                        debug!(head = %head, owner = %owner.get(), "Head already reported by an earlier source");
                    }
                }
            }
        }

        for head in listing.values() {
            if let Err(e) = self.materialize(head, &failed, &mut report) {
                warn!(head = %head, error = %e, "Failed to reconcile branch");
                report.errors.push(e);
            }
        }

        for job in self.jobs() {
            let Some(reference) = job.branch() else {
                continue;
            };
            if reference.is_dead()
                || listing.contains_key(reference.head().name())
                || failed.contains(reference.source_id())
            {
                continue;
            }
            match self.orphan(&job, &reference) {
                Ok(()) => report.orphaned.push(job.id()),
                Err(e) => {
                    warn!(job = %job.name(), error = %e, "Failed to mark branch dead");
                    report.errors.push(e);
                }
            }
        }

        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            orphaned = report.orphaned.len(),
            errors = report.errors.len(),
            "Reconciliation finished"
        );
        report
    }

    fn materialize(
        &self,
        head: &BranchHead,
        failed: &HashSet<SourceId>,
        report: &mut ReconcileReport,
    ) -> Result<(), RegistryError> {
        if let Some(job) = self.branch_job_for(head.name()) {
            let Some(current) = job.branch() else {
                return Ok(());
            };
            if current.source_id() != head.source_id() && failed.contains(current.source_id()) {
                debug!(job = %job.name(), "Owning source unavailable, leaving job untouched");
                return Ok(());
            }

            let mut next = current.clone();
            if next.head() != head {
                debug!(job = %job.name(), from = %current.head(), to = %head, "Re-pointing branch");
                next = next.repoint(head.clone());
            }
            let revived = next.is_dead();
            if revived {
                next = next.transition(BranchState::Active)?;
            }
            if next == current {
                return Ok(());
            }

            self.store_reference(&job, next)?;
            report.updated.push(job.id());
            if revived {
                info!(job = %job.name(), "Branch reappeared");
                log_audit(&AuditEvent::BranchRevived {
                    collection: self.id.to_string(),
                    job: job.name().to_string(),
                    head: head.name().to_string(),
                });
            }
            return Ok(());
        }

        let name = encode_job_name(head.name());
        if let Some(occupant) = self.job_by_name(&name) {
            return Err(RegistryError::BranchNameCollision {
                head: head.name().to_string(),
                job: occupant.name().to_string(),
            });
        }

        let config = with_reference(
            &JobConfig::default(),
            BranchReference::new(self.id.clone(), head.clone()),
        )?;
        let job = Arc::new(Job::new(name, JobType::Branch, config));
        self.store.save(&job.snapshot())?;
        self.jobs.write().insert(job.id(), Arc::clone(&job));
        report.created.push(job.id());
        info!(job = %job.name(), head = %head, "Created branch job");

        if self.build_on_create {
            if let Some(scheduler) = &self.scheduler {
                scheduler.request_build(&job, BuildCause::BranchIndexing);
            }
        }
        Ok(())
    }

    fn orphan(&self, job: &Job, reference: &BranchReference) -> Result<(), RegistryError> {
        let dead = reference.transition(BranchState::Dead)?;
        self.store_reference(job, dead)?;
        info!(job = %job.name(), head = %reference.head(), "Branch disappeared");
        log_audit(&AuditEvent::BranchOrphaned {
            collection: self.id.to_string(),
            job: job.name().to_string(),
            head: reference.head().name().to_string(),
        });
        Ok(())
    }

    fn store_reference(&self, job: &Job, reference: BranchReference) -> Result<(), RegistryError> {
        job.update_config(
            |current| Ok((with_reference(current, reference)?, ())),
            |snapshot| self.store.save(snapshot),
        )
        .map_err(RegistryError::from)
    }
}

impl std::fmt::Debug for BranchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchRegistry")
            .field("id", &self.id)
            .field("jobs", &self.jobs.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::RecordingScheduler;
    use crate::scm::InMemorySource;
    use crate::store::MemoryStore;

    fn setup() -> (BranchRegistry, Arc<MemoryStore>, Arc<RecordingScheduler>) {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(RecordingScheduler::new());
        let registry = BranchRegistry::new(CollectionId::new("project"), store.clone())
            .with_scheduler(scheduler.clone());
        (registry, store, scheduler)
    }

    fn origin(heads: &[&str]) -> Arc<InMemorySource> {
        let source = Arc::new(InMemorySource::new("origin"));
        for (i, head) in heads.iter().enumerate() {
            source.push_revision(head, &format!("r{i}"), &[("Jenkinsfile", "build()")]);
        }
        source
    }

    fn sources(list: &[&Arc<InMemorySource>]) -> Vec<Arc<dyn ScmSource>> {
        list.iter()
            .map(|s| Arc::clone(*s) as Arc<dyn ScmSource>)
            .collect()
    }

    #[tokio::test]
    async fn creates_jobs_and_requests_initial_builds() {
        let (registry, store, scheduler) = setup();
        let source = origin(&["master", "feature/login"]);

        let report = registry.reconcile(&sources(&[&source])).await;

        assert_eq!(report.created.len(), 2);
        assert!(report.errors.is_empty());
        let job = registry.job_by_name("feature%2Flogin").unwrap();
        assert_eq!(job.job_type(), JobType::Branch);
        assert!(job.config().properties.contains(&BRANCH_KIND.into()));
        assert!(store.get(job.id()).is_some());
        assert_eq!(scheduler.drain().len(), 2);
    }

    #[tokio::test]
    async fn second_pass_is_unchanged() {
        let (registry, _, _) = setup();
        let source = origin(&["master"]);
        registry.reconcile(&sources(&[&source])).await;

        let report = registry.reconcile(&sources(&[&source])).await;
        assert!(report.is_unchanged());
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn disappearing_head_is_orphaned_once_and_revived() {
        let (registry, _, _) = setup();
        let source = origin(&["master", "feature"]);
        registry.reconcile(&sources(&[&source])).await;
        let feature = registry.job_by_name("feature").unwrap();

        source.remove_head("feature");
        let report = registry.reconcile(&sources(&[&source])).await;
        assert_eq!(report.orphaned, vec![feature.id()]);
        assert_eq!(registry.dead_jobs().len(), 1);

        let report = registry.reconcile(&sources(&[&source])).await;
        assert!(report.is_unchanged());

        source.push_revision("feature", "r9", &[]);
        let report = registry.reconcile(&sources(&[&source])).await;
        assert_eq!(report.updated, vec![feature.id()]);
        assert!(!feature.branch().unwrap().is_dead());
    }

    #[tokio::test]
    async fn unavailable_source_does_not_orphan() {
        let (registry, _, _) = setup();
        let source = origin(&["master"]);
        registry.reconcile(&sources(&[&source])).await;

        source.set_unavailable(Some("connection refused"));
        let report = registry.reconcile(&sources(&[&source])).await;

        assert!(report.is_unchanged());
        assert!(matches!(
            report.errors.as_slice(),
            [RegistryError::SourceUnavailable { .. }]
        ));
        assert!(registry.dead_jobs().is_empty());
    }

    #[tokio::test]
    async fn collision_and_malformed_heads_do_not_abort_the_pass() {
        let (registry, _, _) = setup();
        registry
            .add_standalone_job("release", JobType::Standalone)
            .unwrap();
        let source = origin(&["release", "bad\u{7}name", "master"]);

        let report = registry.reconcile(&sources(&[&source])).await;

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, RegistryError::BranchNameCollision { .. })));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, RegistryError::MalformedHead { .. })));
    }

    #[tokio::test]
    async fn first_source_wins_and_repoints_on_change() {
        let (registry, _, _) = setup();
        let primary = origin(&["master"]);
        let fork = Arc::new(InMemorySource::new("fork"));
        fork.push_revision("master", "f1", &[]);

        registry.reconcile(&sources(&[&primary, &fork])).await;
        let job = registry.job_by_name("master").unwrap();
        assert_eq!(job.branch().unwrap().source_id().as_str(), "origin");

        primary.remove_head("master");
        let report = registry.reconcile(&sources(&[&primary, &fork])).await;
        assert_eq!(report.updated, vec![job.id()]);
        assert!(report.orphaned.is_empty());
        assert_eq!(job.branch().unwrap().source_id().as_str(), "fork");
    }

    #[tokio::test]
    async fn store_failure_leaves_job_untouched() {
        let (registry, store, _) = setup();
        let source = origin(&["master"]);
        registry.reconcile(&sources(&[&source])).await;
        let job = registry.job_by_name("master").unwrap();

        store.reject_writes(true);
        source.remove_head("master");
        let report = registry.reconcile(&sources(&[&source])).await;

        assert!(report.orphaned.is_empty());
        assert!(matches!(report.errors.as_slice(), [RegistryError::Store(_)]));
        assert!(!job.branch().unwrap().is_dead());
    }

    #[tokio::test]
    async fn dead_branch_refuses_build_and_allows_delete() {
        let (registry, store, _) = setup();
        let source = origin(&["feature"]);
        registry.reconcile(&sources(&[&source])).await;
        let job = registry.job_by_name("feature").unwrap();
        let alice = Actor::User("alice".into());

        assert!(registry.check_build_permitted(job.id(), &alice).is_ok());
        assert!(matches!(
            registry.delete_job(job.id(), &alice).await,
            Err(RegistryError::Permission(_))
        ));

        source.remove_head("feature");
        registry.reconcile(&sources(&[&source])).await;

        assert!(matches!(
            registry.check_build_permitted(job.id(), &alice),
            Err(RegistryError::Permission(_))
        ));
        assert!(registry.check_build_permitted(job.id(), &Actor::System).is_ok());

        registry.delete_job(job.id(), &alice).await.unwrap();
        assert!(registry.job(job.id()).is_none());
        assert!(store.get(job.id()).is_none());
    }

    /// Source whose listing blocks until released.
    struct HeldListing {
        inner: Arc<InMemorySource>,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl ScmSource for HeldListing {
        fn id(&self) -> &SourceId {
            self.inner.id()
        }

        async fn list_heads(&self) -> Result<Vec<BranchHead>, crate::scm::ScmError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.list_heads().await
        }

        async fn fetch_tip(
            &self,
            head: &BranchHead,
        ) -> Result<Option<crate::scm::RevisionRef>, crate::scm::ScmError> {
            self.inner.fetch_tip(head).await
        }

        async fn classify_trust(
            &self,
            head: &BranchHead,
            tip: &crate::scm::RevisionRef,
        ) -> Result<crate::scm::RevisionRef, crate::scm::ScmError> {
            self.inner.classify_trust(head, tip).await
        }

        async fn checkout(
            &self,
            head: &BranchHead,
            revision: Option<&crate::scm::RevisionRef>,
            dest: &std::path::Path,
        ) -> Result<(), crate::scm::ScmError> {
            self.inner.checkout(head, revision, dest).await
        }
    }

    #[tokio::test]
    async fn delete_waits_for_running_reconciliation() {
        let (registry, store, _) = setup();
        let registry = Arc::new(registry);
        let source = origin(&["feature"]);
        registry.reconcile(&sources(&[&source])).await;
        let job = registry.job_by_name("feature").unwrap();
        source.remove_head("feature");
        registry.reconcile(&sources(&[&source])).await;
        assert!(job.branch().unwrap().is_dead());

        source.push_revision("feature", "r9", &[]);
        let held = Arc::new(HeldListing {
            inner: source.clone(),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let reconcile = {
            let registry = Arc::clone(&registry);
            let sources: Vec<Arc<dyn ScmSource>> = vec![held.clone() as Arc<dyn ScmSource>];
            tokio::spawn(async move { registry.reconcile(&sources).await })
        };
        held.entered.notified().await;

        let delete = {
            let registry = Arc::clone(&registry);
            let id = job.id();
            tokio::spawn(async move { registry.delete_job(id, &Actor::User("alice".into())).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!delete.is_finished());

        held.release.notify_one();
        assert_eq!(reconcile.await.unwrap().updated, vec![job.id()]);
        assert!(matches!(
            delete.await.unwrap(),
            Err(RegistryError::Permission(_))
        ));
        assert!(registry.job(job.id()).is_some());
        assert!(store.get(job.id()).is_some());
    }

    #[tokio::test]
    async fn restore_reloads_persisted_jobs() {
        let (registry, store, _) = setup();
        let source = origin(&["master", "feature"]);
        registry.reconcile(&sources(&[&source])).await;

        let reloaded = BranchRegistry::new(CollectionId::new("project"), store.clone());
        assert_eq!(reloaded.restore().unwrap(), 2);
        let report = reloaded.reconcile(&sources(&[&source])).await;
        assert!(report.is_unchanged());

        let other = BranchRegistry::new(CollectionId::new("elsewhere"), store);
        assert_eq!(other.restore().unwrap(), 0);
    }
}
