//! Shared test utilities for integration tests.
//!
//! Provides a wired-up collection (in-memory source, store, workspaces,
//! registry and runner) and a small line-oriented script executor.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use branchyard_kernel::branch::{Actor, BranchRegistry, CollectionId, ReconcileReport};
use branchyard_kernel::build::{BuildRunner, DefinitionExecutor, RecordingScheduler};
use branchyard_kernel::job::{Job, PropertyKindRegistry, RetentionPolicy};
use branchyard_kernel::properties::PropertyReconciler;
use branchyard_kernel::scm::{InMemorySource, ScmSource};
use branchyard_kernel::script::{BuildContext, StepError};
use branchyard_kernel::store::MemoryStore;
use branchyard_kernel::trust::ExecutableDefinition;
use branchyard_kernel::workspace::LocalWorkspaces;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Executes scripts made of one step per line:
///
/// - `properties <json>`: declares `[[kind, config], ...]`
/// - `read <path>`: reads a trusted file and remembers its content
/// - `retain <n>`: keeps the last `n` builds
/// - `wait`: blocks until [`ScriptedExecutor::release`] is notified
/// - `fail <message>`: fails the script
#[derive(Default)]
pub struct ScriptedExecutor {
    /// Contents returned by `read` steps, in order.
    pub reads: Mutex<Vec<String>>,
    /// Wakes one script blocked in `wait`.
    pub release: Notify,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedExecutor {
    /// Number of scripts currently executing.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of scripts that ran at the same time.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DefinitionExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        definition: ExecutableDefinition,
        context: &BuildContext,
    ) -> Result<(), StepError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.running);

        for line in definition.script.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (step, argument) = line.split_once(' ').unwrap_or((line, ""));
            match step {
                "properties" => {
                    let declared: Vec<(String, serde_json::Value)> =
                        serde_json::from_str(argument)
                            .map_err(|e| StepError::Execution(e.to_string()))?;
                    context.declare_properties(declared)?;
                }
                "read" => {
                    let content = context.read_trusted_file(argument).await?;
                    self.reads.lock().push(content);
                }
                "retain" => {
                    let keep = argument
                        .parse()
                        .map_err(|_| StepError::Execution(format!("bad count '{argument}'")))?;
                    context.declare_retention_policy(RetentionPolicy {
                        num_to_keep: Some(keep),
                        ..RetentionPolicy::default()
                    })?;
                }
                "wait" => self.release.notified().await,
                "fail" => return Err(StepError::Execution(argument.to_string())),
                other => return Err(StepError::Execution(format!("unknown step '{other}'"))),
            }
        }
        Ok(())
    }
}

/// One collection fed by one in-memory source.
pub struct Harness {
    /// Root of the workspaces.
    pub temp_dir: TempDir,
    /// The source.
    pub source: Arc<InMemorySource>,
    /// Job store.
    pub store: Arc<MemoryStore>,
    /// Workspaces.
    pub workspaces: Arc<LocalWorkspaces>,
    /// Build requests raised by the registry.
    pub scheduler: Arc<RecordingScheduler>,
    /// The registry.
    pub registry: Arc<BranchRegistry>,
    /// Script executor.
    pub executor: Arc<ScriptedExecutor>,
    /// Runner wired to all of the above.
    pub runner: Arc<BuildRunner>,
}

impl Harness {
    /// Creates an empty collection named `project` fed by source `origin`.
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let source = Arc::new(InMemorySource::new("origin"));
        let store = Arc::new(MemoryStore::new());
        let workspaces = Arc::new(LocalWorkspaces::new(temp_dir.path().join("workspaces")));
        let scheduler = Arc::new(RecordingScheduler::new());
        let registry = Arc::new(
            BranchRegistry::new(CollectionId::new("project"), store.clone())
                .with_scheduler(scheduler.clone()),
        );
        let executor = Arc::new(ScriptedExecutor::default());
        let reconciler =
            PropertyReconciler::new(Arc::new(PropertyKindRegistry::builtin()), store.clone());
        let runner = Arc::new(BuildRunner::new(
            registry.clone(),
            &[source.clone() as Arc<dyn ScmSource>],
            workspaces.clone(),
            reconciler,
            executor.clone(),
        ));

        Ok(Self {
            temp_dir,
            source,
            store,
            workspaces,
            scheduler,
            registry,
            executor,
            runner,
        })
    }

    /// Runs one reconciliation pass against the source.
    pub async fn reconcile(&self) -> ReconcileReport {
        let sources: Vec<Arc<dyn ScmSource>> = vec![self.source.clone()];
        self.registry.reconcile(&sources).await
    }

    /// Returns the job named `name`.
    pub fn job(&self, name: &str) -> Arc<Job> {
        self.registry
            .job_by_name(name)
            .unwrap_or_else(|| panic!("job '{name}' should exist"))
    }

    /// A user without special rights.
    pub fn alice() -> Actor {
        Actor::User("alice".to_string())
    }
}
