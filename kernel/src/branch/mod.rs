//! Branch Registry - keeps branch jobs in step with the branches sources report.

pub mod naming;
pub mod permissions;
pub mod reference;
pub mod registry;

use thiserror::Error;

pub use permissions::{
    decide_branch_permission, Actor, AllowAll, Authorizer, BranchAwareAuthorizer, Decision,
    Permission, PermissionError, RestrictedPermissions,
};
pub use reference::{BranchReference, BranchState, CollectionId};
pub use registry::{BranchRegistry, ReconcileReport};

use crate::job::JobId;
use crate::scm::SourceId;
use crate::store::StoreError;

/// Errors raised by the branch registry.
///
/// During reconciliation these are collected per branch instead of aborting
/// the pass.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// A job that is not a branch job already uses the branch's name.
    #[error("Branch '{head}' collides with existing job '{job}'")]
    BranchNameCollision {
        /// Head name reported by the source.
        head: String,
        /// Name of the occupying job.
        job: String,
    },
    /// The head cannot be materialized as a job.
    #[error("Malformed head '{head}': {reason}")]
    MalformedHead {
        /// Offending head name (escaped).
        head: String,
        /// What is wrong with it.
        reason: String,
    },
    /// A source could not list its heads; its jobs were left untouched.
    #[error("Source '{source_id}' unavailable: {reason}")]
    SourceUnavailable {
        /// Source that failed.
        source_id: SourceId,
        /// Failure reported by the source.
        reason: String,
    },
    /// Invalid branch state transition.
    #[error("Cannot transition branch from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: BranchState,
        /// Requested state.
        to: BranchState,
    },
    /// No job with this id exists in the collection.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),
    /// A job with this name already exists.
    #[error("Job already exists: {0}")]
    JobAlreadyExists(String),
    /// The actor may not perform the operation.
    #[error(transparent)]
    Permission(#[from] PermissionError),
    /// Persisting the change failed.
    #[error("Failed to persist job: {0}")]
    Store(#[from] StoreError),
}
