//! Loads the build-definition script from the trusted revision.

use tracing::{instrument, warn};

use super::resolver::TrustResolver;
use super::TrustError;
use crate::scm::SourceConfiguration;

/// A script ready to run, together with what it runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableDefinition {
    /// Script text read from the trusted revision.
    pub script: String,
    /// Source configuration of the build.
    pub source_configuration: SourceConfiguration,
}

/// Binds a job to the script at a fixed path in its branch.
#[derive(Debug, Clone)]
pub struct DefinitionBinder {
    script_path: String,
}

impl DefinitionBinder {
    /// Creates a binder reading `script_path`.
    #[must_use]
    pub fn new(script_path: impl Into<String>) -> Self {
        Self {
            script_path: script_path.into(),
        }
    }

    /// Returns the configured script path.
    #[must_use]
    pub fn script_path(&self) -> &str {
        &self.script_path
    }

    /// Reads the script from the trusted revision.
    ///
    /// An untrusted tip does not fail the build: its own version of the
    /// script is ignored and the trusted one is used.
    ///
    /// # Errors
    /// Returns `TrustError::ScriptNotFound` if the script is missing, or the
    /// resolver's error if the revision cannot be checked out.
    #[instrument(skip(self, resolver), fields(head = %resolver.head(), script = %self.script_path))]
    pub async fn build_definition(
        &self,
        resolver: &TrustResolver,
    ) -> Result<ExecutableDefinition, TrustError> {
        let decision = resolver.resolve_definition_revision().await?.clone();
        if decision.tip_untrusted() {
            if let (Some(tip), Some(trusted)) = (&decision.tip, &decision.trusted) {
                warn!(%tip, %trusted, "Tip is not trusted, loading the script from the trusted revision");
            }
        }

        let script = resolver
            .read_from_trusted(&self.script_path)
            .await?
            .ok_or_else(|| TrustError::ScriptNotFound {
                path: self.script_path.clone(),
                revision: decision.trusted.clone(),
            })?;

        Ok(ExecutableDefinition {
            script,
            source_configuration: decision.source_configuration(resolver.head()),
        })
    }
}

impl Default for DefinitionBinder {
    fn default() -> Self {
        Self::new("Jenkinsfile")
    }
}
