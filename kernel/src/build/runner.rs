//! Runs one build of a branch job from permission check to build record.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{oneshot, OnceCell};
use tracing::{debug, info, instrument, warn};

use super::executor::DefinitionExecutor;
use super::BuildError;
use crate::branch::{Actor, BranchRegistry};
use crate::infrastructure::config::Settings;
use crate::job::{
    BuildNumber, BuildRecord, BuildResult, FailureKind, FailureReport, Job, JobId,
    PropertyKindRegistry,
};
use crate::properties::PropertyReconciler;
use crate::scm::{ScmSource, SourceId};
use crate::script::{BuildContext, StepError};
use crate::store::JobStore;
use crate::trust::{DefinitionBinder, TrustResolver};
use crate::workspace::{LocalWorkspaces, WorkspaceProvider};

type Interrupts = Mutex<HashMap<JobId, Vec<(BuildNumber, oneshot::Sender<()>)>>>;

enum Outcome {
    Finished(Result<(), StepError>),
    Interrupted(&'static str),
}

/// Keeps a build's interrupt handle registered while the build runs.
struct Registration<'a> {
    interrupts: &'a Interrupts,
    job: JobId,
    number: BuildNumber,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut interrupts = self.interrupts.lock();
        if let Some(running) = interrupts.get_mut(&self.job) {
            running.retain(|(number, _)| *number != self.number);
            if running.is_empty() {
                interrupts.remove(&self.job);
            }
        }
    }
}

/// Runs builds of the jobs in one registry.
pub struct BuildRunner {
    registry: Arc<BranchRegistry>,
    sources: BTreeMap<SourceId, Arc<dyn ScmSource>>,
    workspaces: Arc<dyn WorkspaceProvider>,
    reconciler: PropertyReconciler,
    binder: DefinitionBinder,
    executor: Arc<dyn DefinitionExecutor>,
    interrupts: Interrupts,
}

impl BuildRunner {
    /// Creates a runner. Branch jobs are built from whichever of `sources`
    /// their branch belongs to.
    #[must_use]
    pub fn new(
        registry: Arc<BranchRegistry>,
        sources: &[Arc<dyn ScmSource>],
        workspaces: Arc<dyn WorkspaceProvider>,
        reconciler: PropertyReconciler,
        executor: Arc<dyn DefinitionExecutor>,
    ) -> Self {
        Self {
            registry,
            sources: sources
                .iter()
                .map(|s| (s.id().clone(), Arc::clone(s)))
                .collect(),
            workspaces,
            reconciler,
            binder: DefinitionBinder::default(),
            executor,
            interrupts: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a runner whose script path, workspace root and legacy
    /// migration come from `settings`.
    #[must_use]
    pub fn from_settings(
        settings: &Settings,
        registry: Arc<BranchRegistry>,
        sources: &[Arc<dyn ScmSource>],
        store: Arc<dyn JobStore>,
        executor: Arc<dyn DefinitionExecutor>,
    ) -> Self {
        let reconciler = PropertyReconciler::new(Arc::new(PropertyKindRegistry::builtin()), store)
            .with_legacy_migration(settings.properties.legacy_migration);
        Self::new(
            registry,
            sources,
            Arc::new(LocalWorkspaces::new(settings.trust.workspace_root.clone())),
            reconciler,
            executor,
        )
        .with_binder(DefinitionBinder::new(settings.trust.script_path.clone()))
    }

    /// Uses `binder` to locate the build script.
    #[must_use]
    pub fn with_binder(mut self, binder: DefinitionBinder) -> Self {
        self.binder = binder;
        self
    }

    /// Builds job `id` on behalf of `actor` and returns the recorded build.
    ///
    /// # Errors
    /// Returns `BuildError` if the build could not be started; a build that
    /// started and failed is returned as a record with a failure report.
    pub async fn run(&self, id: JobId, actor: &Actor) -> Result<BuildRecord, BuildError> {
        self.run_until(id, actor, std::future::pending::<()>()).await
    }

    /// Like [`Self::run`], but the build is aborted when `abort` fires.
    ///
    /// Dropping the sender without sending does not abort.
    ///
    /// # Errors
    /// Same as [`Self::run`].
    pub async fn run_abortable(
        &self,
        id: JobId,
        actor: &Actor,
        abort: oneshot::Receiver<()>,
    ) -> Result<BuildRecord, BuildError> {
        self.run_until(id, actor, fired(abort)).await
    }

    #[instrument(skip_all, fields(job = %id, %actor))]
    async fn run_until(
        &self,
        id: JobId,
        actor: &Actor,
        abort: impl Future<Output = ()> + Send,
    ) -> Result<BuildRecord, BuildError> {
        let job = self
            .registry
            .check_build_permitted(id, actor)
            .map_err(BuildError::Refused)?;
        let not_buildable = |reason: &str| BuildError::NotBuildable {
            job: job.name().to_string(),
            reason: reason.to_string(),
        };
        let reference = job.branch().ok_or_else(|| not_buildable("not a branch job"))?;
        let source = self
            .sources
            .get(reference.source_id())
            .cloned()
            .ok_or_else(|| not_buildable("source is not configured"))?;

        let number = job.next_build_number();
        let started = Utc::now();
        let superseded = fired(self.supersede(&job, number));
        let _registration = Registration {
            interrupts: &self.interrupts,
            job: id,
            number,
        };
        let resolver = Arc::new(TrustResolver::new(
            job.name(),
            reference.head().clone(),
            source,
            Arc::clone(&self.workspaces),
        ));
        let context = OnceCell::new();
        info!(build = %number, "Build started");

        let gated = async {
            let gate = if job.allows_concurrent_builds() {
                None
            } else {
                debug!("Waiting for running build");
                Some(job.build_gate().lock_owned().await)
            };
            if gate.is_some() {
                self.registry
                    .check_build_permitted(id, actor)
                    .map_err(BuildError::Refused)?;
            }
            Ok::<_, BuildError>(self.attempt(&job, number, &resolver, &context).await)
        };

        let outcome = tokio::select! {
            result = gated => Outcome::Finished(result?),
            () = abort => Outcome::Interrupted("build was aborted"),
            () = superseded => Outcome::Interrupted("build was superseded by a newer build"),
        };

        let (result, failure) = match outcome {
            Outcome::Finished(Ok(())) => (BuildResult::Success, None),
            Outcome::Finished(Err(e)) => (
                BuildResult::Failure,
                Some(FailureReport::new(e.failure_kind(), e)),
            ),
            Outcome::Interrupted(reason) => (
                BuildResult::Aborted,
                Some(FailureReport::new(FailureKind::Aborted, reason)),
            ),
        };

        let context: Option<&Arc<BuildContext>> = context.get();
        let record = BuildRecord::finished(number, result)
            .started_at(started)
            .with_steps(context.map(|c| c.steps()).unwrap_or_default())
            .with_source(context.map(|c| c.source_configuration().clone()))
            .with_trust(resolver.audit())
            .with_failure(failure);
        job.record_build(record.clone());

        match record.failure() {
            None => info!(build = %number, "Build succeeded"),
            Some(report) => warn!(build = %number, kind = %report.kind, "{}", report.message),
        }
        Ok(record)
    }

    /// Interrupts the job's earlier builds if its policy asks for it, then
    /// registers `number` so later builds can interrupt it.
    fn supersede(&self, job: &Job, number: BuildNumber) -> oneshot::Receiver<()> {
        let abort_previous = job
            .concurrency_policy()
            .is_some_and(|policy| policy.abort_previous);
        let (interrupt, interrupted) = oneshot::channel();

        let mut interrupts = self.interrupts.lock();
        let running = interrupts.entry(job.id()).or_default();
        if abort_previous {
            for (previous, handle) in running.drain(..) {
                info!(build = %previous, by = %number, "Aborting superseded build");
                let _ = handle.send(());
            }
        }
        running.push((number, interrupt));
        interrupted
    }

    async fn attempt(
        &self,
        job: &Arc<Job>,
        number: BuildNumber,
        resolver: &Arc<TrustResolver>,
        slot: &OnceCell<Arc<BuildContext>>,
    ) -> Result<(), StepError> {
        let definition = self.binder.build_definition(resolver).await?;
        let context = Arc::new(BuildContext::new(
            Arc::clone(job),
            number,
            definition.source_configuration.clone(),
            Arc::clone(resolver),
            self.reconciler.clone(),
        ));
        let _ = slot.set(Arc::clone(&context));

        self.executor.execute(definition, &context).await
    }
}

/// Resolves when `signal` fires; never resolves if its sender is dropped.
async fn fired(signal: oneshot::Receiver<()>) {
    if signal.await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl std::fmt::Debug for BuildRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildRunner")
            .field("registry", &self.registry)
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("binder", &self.binder)
            .finish_non_exhaustive()
    }
}
