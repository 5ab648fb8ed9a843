//! Telemetry configuration.

use serde::Deserialize;

/// Logging settings.
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetrySettings {
    /// Service name attached to log records.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            json: false,
        }
    }
}

fn default_service_name() -> String {
    "branchyard".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
