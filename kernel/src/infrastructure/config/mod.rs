//! Configuration management for the branchyard kernel.
//!
//! Settings are grouped by concern: the branch registry, trusted file
//! loading, property reconciliation, job storage and telemetry.
//!
//! # Example
//!
//! ```
//! use branchyard_kernel::infrastructure::config::Settings;
//!
//! let settings = Settings::new().expect("Failed to load configuration");
//! assert_eq!(settings.trust.script_path, "Jenkinsfile");
//! ```

pub mod properties;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod trust;

pub use properties::PropertiesSettings;
pub use registry::RegistrySettings;
pub use store::StoreSettings;
pub use telemetry::TelemetrySettings;
pub use trust::TrustSettings;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Top-level configuration for the branchyard kernel.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Branch registry settings.
    #[serde(default)]
    pub registry: RegistrySettings,
    /// Trusted file and workspace settings.
    #[serde(default)]
    pub trust: TrustSettings,
    /// Property reconciliation settings.
    #[serde(default)]
    pub properties: PropertiesSettings,
    /// Job store settings.
    #[serde(default)]
    pub store: StoreSettings,
    /// Telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl Settings {
    /// Creates a new settings instance from environment variables and defaults.
    ///
    /// Variables use the `BRANCHYARD` prefix and `__` between section and key,
    /// e.g. `BRANCHYARD_TRUST__SCRIPT_PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built or deserialized.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix("BRANCHYARD").separator("__"))
    }

    fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("telemetry.service_name", "branchyard")?
            .set_default("trust.script_path", "Jenkinsfile")?
            .add_source(environment)
            .build()?;

        s.try_deserialize()
    }
}
