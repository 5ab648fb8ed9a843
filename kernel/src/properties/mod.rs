//! Property Reconciler - installs the properties a build declares.

pub mod legacy;
pub mod reconciler;
pub mod tracking;

use thiserror::Error;

pub use reconciler::{PropertyChange, PropertyReconciler};
pub use tracking::TrackingRecord;

use crate::job::KindError;
use crate::store::StoreError;

/// Errors raised while installing declared properties.
#[derive(Debug, Clone, Error)]
pub enum PropertyError {
    /// A declared property was rejected; nothing was changed.
    #[error("{0}")]
    InapplicableProperty(#[from] KindError),
    /// The new configuration could not be persisted; nothing was changed.
    #[error("failed to commit job properties: {0}")]
    CommitFailure(#[from] StoreError),
}
