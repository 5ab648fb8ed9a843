//! Job store configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Where job snapshots are persisted.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreSettings {
    /// Directory for JSON job snapshots; jobs are kept in memory when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}
