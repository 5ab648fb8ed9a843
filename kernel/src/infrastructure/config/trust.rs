//! Trusted revision and workspace configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Settings for loading build definitions.
#[derive(Debug, Deserialize, Clone)]
pub struct TrustSettings {
    /// Path of the build-definition script within the checkout (default: "Jenkinsfile")
    #[serde(default = "default_script_path")]
    pub script_path: String,

    /// Directory under which job workspaces are created
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            script_path: default_script_path(),
            workspace_root: default_workspace_root(),
        }
    }
}

fn default_script_path() -> String {
    "Jenkinsfile".to_string()
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("branchyard").join("workspaces")
}
