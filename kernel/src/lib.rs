//! Branchyard Kernel - per-branch build jobs with trusted build definitions.
//!
//! This crate keeps one build job per branch reported by a set of sources,
//! loads each build's definition only from a revision the source trusts, and
//! installs the properties a build declares as one atomic change.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Branch registry, branch references and branch-aware permissions.
pub mod branch;
/// Build scheduling and execution.
pub mod build;
/// Infrastructure components (audit, config, telemetry).
pub mod infrastructure;
/// Jobs, property kinds and build history.
pub mod job;
/// Property reconciliation.
pub mod properties;
/// Version-control source capability.
pub mod scm;
/// Steps exposed to build scripts.
pub mod script;
/// Job persistence.
pub mod store;
/// Trusted revision resolution and definition loading.
pub mod trust;
/// Exclusive workspace leases.
pub mod workspace;
