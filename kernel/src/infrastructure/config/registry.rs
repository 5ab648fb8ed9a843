//! Branch registry configuration.

use serde::Deserialize;

/// Settings for the branch registry.
#[derive(Debug, Deserialize, Clone)]
pub struct RegistrySettings {
    /// Identifier of the collection the registry manages (default: "default")
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Request a build when a branch job is created (default: true)
    #[serde(default = "default_true")]
    pub build_on_create: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            build_on_create: default_true(),
        }
    }
}

fn default_collection() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}
