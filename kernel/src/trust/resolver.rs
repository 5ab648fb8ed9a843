//! Per-build trust resolution.
//!
//! A [`TrustResolver`] lives for one build. It asks the source once which
//! revision is trusted for the current tip and serves build-defining files
//! from that revision only, refusing files that the tip changed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use super::path::{check_relative, resolve_within};
use super::TrustError;
use crate::infrastructure::audit::{log_audit, AuditEvent};
use crate::job::TrustAudit;
use crate::scm::{
    BranchHead, CheckoutMode, RevisionRef, ScmError, ScmSource, SourceConfiguration,
};
use crate::workspace::WorkspaceProvider;

/// Which revisions a build may trust.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustDecision {
    /// Current tip, absent when the head could not be resolved.
    pub tip: Option<RevisionRef>,
    /// Revision allowed to define the build.
    pub trusted: Option<RevisionRef>,
    /// Whether checkouts are pinned.
    pub mode: CheckoutMode,
}

impl TrustDecision {
    fn best_effort() -> Self {
        Self {
            tip: None,
            trusted: None,
            mode: CheckoutMode::BestEffort,
        }
    }

    /// True when the tip is not the trusted revision.
    #[must_use]
    pub fn tip_untrusted(&self) -> bool {
        self.tip != self.trusted
    }

    /// The configuration the build runs against.
    #[must_use]
    pub fn source_configuration(&self, head: &BranchHead) -> SourceConfiguration {
        match (&self.mode, &self.tip) {
            (CheckoutMode::Deterministic, Some(tip)) => SourceConfiguration::pinned(head, tip.clone()),
            _ => SourceConfiguration::best_effort(head),
        }
    }
}

fn digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

fn decode(path: &str, content: Vec<u8>) -> Result<String, TrustError> {
    String::from_utf8(content)
        .map_err(|_| ScmError::CheckoutFailed(format!("{path}: not valid UTF-8")).into())
}

/// Build-local resolver for one job's branch.
pub struct TrustResolver {
    job_name: String,
    head: BranchHead,
    source: Arc<dyn ScmSource>,
    workspaces: Arc<dyn WorkspaceProvider>,
    decision: OnceCell<TrustDecision>,
    reads: tokio::sync::Mutex<HashMap<PathBuf, Result<String, TrustError>>>,
    diverged: Mutex<Option<bool>>,
}

impl TrustResolver {
    /// Creates a resolver for a build of `job_name` on `head`.
    #[must_use]
    pub fn new(
        job_name: impl Into<String>,
        head: BranchHead,
        source: Arc<dyn ScmSource>,
        workspaces: Arc<dyn WorkspaceProvider>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            head,
            source,
            workspaces,
            decision: OnceCell::new(),
            reads: tokio::sync::Mutex::new(HashMap::new()),
            diverged: Mutex::new(None),
        }
    }

    /// Returns the head being built.
    #[must_use]
    pub const fn head(&self) -> &BranchHead {
        &self.head
    }

    /// Returns the source of the head.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn ScmSource> {
        &self.source
    }

    /// Resolves the tip and the trusted revision. Computed once per build.
    ///
    /// A head without a tip yields a best-effort decision instead of an error.
    ///
    /// # Errors
    /// Returns `TrustError::Scm` if the source cannot be queried.
    pub async fn resolve_definition_revision(&self) -> Result<&TrustDecision, TrustError> {
        self.decision.get_or_try_init(|| self.resolve()).await
    }

    #[instrument(skip(self), fields(job = %self.job_name, head = %self.head))]
    async fn resolve(&self) -> Result<TrustDecision, TrustError> {
        let tip = match self.source.fetch_tip(&self.head).await {
            Ok(Some(tip)) => tip,
            Ok(None) | Err(ScmError::HeadNotFound(_)) => {
                warn!("Head unresolvable, falling back to a best-effort checkout");
                return Ok(TrustDecision::best_effort());
            }
            Err(e) => return Err(e.into()),
        };
        let trusted = self.source.classify_trust(&self.head, &tip).await?;
        if trusted == tip {
            debug!(%tip, "Tip is trusted");
        } else {
            info!(%tip, %trusted, "Tip is not trusted, build definition comes from the trusted revision");
        }
        Ok(TrustDecision {
            tip: Some(tip),
            trusted: Some(trusted),
            mode: CheckoutMode::Deterministic,
        })
    }

    /// Reads a file that influences the build, from the trusted revision.
    ///
    /// When the tip is untrusted the file is also read at the tip and must be
    /// identical there. Results, failures included, are remembered for the
    /// rest of the build.
    ///
    /// # Errors
    /// - `TrustError::PathEscape` if `path` leaves the checkout (checked before
    ///   any checkout happens)
    /// - `TrustError::FileNotFound` if the trusted revision lacks the file
    /// - `TrustError::UntrustedModification` if the tip changed or removed it
    /// - `TrustError::Lease` / `TrustError::Scm` on infrastructure failures
    #[instrument(skip(self), fields(job = %self.job_name))]
    pub async fn read_trusted_file(&self, path: &str) -> Result<String, TrustError> {
        let relative = check_relative(path)?;
        let mut reads = self.reads.lock().await;
        if let Some(result) = reads.get(&relative) {
            debug!("Serving remembered read");
            return result.clone();
        }
        let result = self.read_compared(path, &relative).await;
        reads.insert(relative, result.clone());
        result
    }

    async fn read_compared(&self, path: &str, relative: &Path) -> Result<String, TrustError> {
        let decision = self.resolve_definition_revision().await?.clone();
        let not_found = |revision: Option<RevisionRef>| TrustError::FileNotFound {
            path: path.to_string(),
            revision,
        };

        match (decision.tip, decision.trusted) {
            (Some(tip), Some(trusted)) if tip == trusted => {
                let content = self
                    .read_at(Some(&trusted), relative)
                    .await?
                    .ok_or_else(|| not_found(Some(trusted.clone())))?;
                decode(path, content)
            }
            (Some(tip), Some(trusted)) => {
                let candidate = self.read_at(Some(&tip), relative).await?;
                let content = self
                    .read_at(Some(&trusted), relative)
                    .await?
                    .ok_or_else(|| not_found(Some(trusted.clone())))?;

                let unchanged = candidate
                    .as_deref()
                    .is_some_and(|candidate| digest(candidate) == digest(&content));
                self.record_comparison(!unchanged);
                if unchanged {
                    return decode(path, content);
                }

                warn!(path, %tip, %trusted, "Trusted file modified in untrusted revision");
                log_audit(&AuditEvent::UntrustedModification {
                    job: self.job_name.clone(),
                    path: path.to_string(),
                    tip: tip.to_string(),
                    trusted: trusted.to_string(),
                });
                Err(TrustError::UntrustedModification {
                    path: path.to_string(),
                    tip,
                    trusted,
                })
            }
            _ => {
                let content = self
                    .read_at(None, relative)
                    .await?
                    .ok_or_else(|| not_found(None))?;
                decode(path, content)
            }
        }
    }

    /// Reads `path` from the trusted revision (or the best-effort checkout)
    /// without comparing it against the tip.
    ///
    /// # Errors
    /// Returns `TrustError::PathEscape`, `TrustError::Lease` or
    /// `TrustError::Scm`. A missing file is `Ok(None)`.
    pub async fn read_from_trusted(&self, path: &str) -> Result<Option<String>, TrustError> {
        let relative = check_relative(path)?;
        let decision = self.resolve_definition_revision().await?;
        self.read_at(decision.trusted.as_ref(), &relative)
            .await?
            .map(|content| decode(path, content))
            .transpose()
    }

    async fn read_at(
        &self,
        revision: Option<&RevisionRef>,
        relative: &Path,
    ) -> Result<Option<Vec<u8>>, TrustError> {
        let lease = self
            .workspaces
            .acquire_lease(&format!("{}@definition", self.job_name))
            .await?;
        self.source
            .checkout(&self.head, revision, lease.path())
            .await?;

        let Some(file) = resolve_within(lease.path(), relative)? else {
            return Ok(None);
        };
        let content = tokio::fs::read(&file).await.map_err(|e| {
            ScmError::CheckoutFailed(format!("{}: {e}", file.display()))
        })?;
        Ok(Some(content))
    }

    fn record_comparison(&self, diverged: bool) {
        let mut flag = self.diverged.lock();
        *flag = Some(flag.unwrap_or(false) || diverged);
    }

    /// Summary kept with the build record, `None` if resolution never ran.
    #[must_use]
    pub fn audit(&self) -> Option<TrustAudit> {
        self.decision.get().map(|decision| TrustAudit {
            tip: decision.tip.clone(),
            trusted: decision.trusted.clone(),
            diverged: *self.diverged.lock(),
        })
    }
}

impl std::fmt::Debug for TrustResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustResolver")
            .field("job", &self.job_name)
            .field("head", &self.head)
            .field("decision", &self.decision.get())
            .finish_non_exhaustive()
    }
}
