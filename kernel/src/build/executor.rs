//! The seam to whatever interprets build scripts.

use async_trait::async_trait;

use crate::script::{BuildContext, StepError};
use crate::trust::ExecutableDefinition;

/// Runs a build-definition script.
///
/// The executor calls back into `context` for every step the script invokes.
/// Dropping the returned future cancels the script.
#[async_trait]
pub trait DefinitionExecutor: Send + Sync {
    /// Executes `definition`.
    ///
    /// # Errors
    /// Returns the error of the step that ended the script, or
    /// `StepError::Execution` if the script itself failed.
    async fn execute(
        &self,
        definition: ExecutableDefinition,
        context: &BuildContext,
    ) -> Result<(), StepError>;
}
