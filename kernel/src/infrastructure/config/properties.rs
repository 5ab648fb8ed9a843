//! Property reconciliation configuration.

use serde::Deserialize;

/// Settings for the property reconciler.
#[derive(Debug, Deserialize, Clone)]
pub struct PropertiesSettings {
    /// Treat jobs without a tracking record whose previous build declared
    /// properties as if every property had been declared (default: true)
    #[serde(default = "default_true")]
    pub legacy_migration: bool,
}

impl Default for PropertiesSettings {
    fn default() -> Self {
        Self {
            legacy_migration: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}
