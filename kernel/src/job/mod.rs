//! Jobs, their properties, and their build history.

pub mod entity;
pub mod history;
pub mod kinds;
pub mod property;

pub use entity::{Job, JobConfig, JobId, JobSnapshot, JobType};
pub use history::{
    BuildNumber, BuildRecord, BuildResult, FailureKind, FailureReport, TrustAudit,
};
pub use kinds::{
    ConcurrentBuildsPolicy, FolderHealthMetrics, KindError, ParameterDefinition,
    PropertyKindRegistry, PropertyKindSpec, RetentionPolicy, TriggerSpec, TypedKind,
};
pub use property::{JobProperty, PropertyKindId, PropertySet};
