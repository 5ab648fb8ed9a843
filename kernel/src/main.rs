//! Branchyard Kernel binary entry point.

use std::sync::Arc;

use branchyard_kernel::branch::{BranchRegistry, CollectionId};
use branchyard_kernel::infrastructure::{config::Settings, telemetry::TelemetryBuilder};
use branchyard_kernel::job::PropertyKindRegistry;
use branchyard_kernel::store::{JobStore, JsonFileStore, MemoryStore};
use tracing::info;

fn main() -> anyhow::Result<()> {
    let config = Settings::new()?;
    TelemetryBuilder::from_settings(&config.telemetry).init()?;

    info!("Branchyard starting...");

    let store: Arc<dyn JobStore> = match &config.store.dir {
        Some(dir) => Arc::new(JsonFileStore::open(dir)?),
        None => Arc::new(MemoryStore::new()),
    };
    let registry = BranchRegistry::new(CollectionId::new(config.registry.collection.clone()), store)
        .with_initial_builds(config.registry.build_on_create);
    let loaded = registry.restore()?;

    let kinds = PropertyKindRegistry::builtin();
    info!(
        collection = %registry.id(),
        jobs = loaded,
        dead = registry.dead_jobs().len(),
        property_kinds = kinds.ids().len(),
        script_path = %config.trust.script_path,
        workspace_root = %config.trust.workspace_root.display(),
        legacy_migration = config.properties.legacy_migration,
        "Collection loaded"
    );

    for job in registry.jobs() {
        let state = job
            .branch()
            .map_or_else(|| "standalone".to_string(), |r| r.state().to_string());
        info!(job = %job.name(), job_type = %job.job_type(), %state, "Job");
    }

    Ok(())
}
