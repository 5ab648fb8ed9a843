//! Build records kept in a job's history.

use core::fmt;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scm::{RevisionRef, SourceConfiguration};

/// Sequential number of a build within its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildNumber(u32);

impl BuildNumber {
    /// Wraps a raw build number.
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    /// Returns the raw number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BuildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Final status of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    /// The script ran to completion.
    Success,
    /// A fatal error ended the build.
    Failure,
    /// The build was cancelled.
    Aborted,
}

/// Classification of a fatal build failure, shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// A trusted file differs between the tip and the trusted revision.
    UntrustedModification,
    /// A requested trusted file is missing at the trusted revision.
    FileNotFound,
    /// The build-definition script is missing at the trusted revision.
    ScriptNotFound,
    /// A requested path escapes the checkout root.
    PathEscape,
    /// A declared property is not applicable to the job.
    InapplicableProperty,
    /// Persisting job properties failed.
    CommitFailure,
    /// No workspace could be leased.
    LeaseUnavailable,
    /// No alternate source candidate could be resolved.
    NoResolvableCandidate,
    /// The source failed.
    Scm,
    /// The build was aborted.
    Aborted,
    /// The script itself failed.
    Execution,
}

impl FailureKind {
    /// Stable name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UntrustedModification => "UntrustedModification",
            Self::FileNotFound => "FileNotFound",
            Self::ScriptNotFound => "ScriptNotFound",
            Self::PathEscape => "PathEscape",
            Self::InapplicableProperty => "InapplicableProperty",
            Self::CommitFailure => "CommitFailure",
            Self::LeaseUnavailable => "LeaseUnavailable",
            Self::NoResolvableCandidate => "NoResolvableCandidate",
            Self::Scm => "Scm",
            Self::Aborted => "Aborted",
            Self::Execution => "Execution",
        }
    }

    /// True for failures caused by a policy decision the user must act on.
    #[must_use]
    pub const fn is_policy(self) -> bool {
        matches!(
            self,
            Self::UntrustedModification | Self::InapplicableProperty | Self::PathEscape
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-visible description of why a build failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Failure classification.
    pub kind: FailureKind,
    /// Message, prefixed with the kind name.
    pub message: String,
}

impl FailureReport {
    /// Creates a report; the message is prefixed with the kind name.
    #[must_use]
    pub fn new(kind: FailureKind, detail: impl fmt::Display) -> Self {
        Self {
            kind,
            message: format!("{kind}: {detail}"),
        }
    }
}

/// Trust resolution outcome kept with the build for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAudit {
    /// Tip revision, absent when the head could not be resolved.
    pub tip: Option<RevisionRef>,
    /// Trusted revision, absent when the head could not be resolved.
    pub trusted: Option<RevisionRef>,
    /// Whether any compared file differed between tip and trusted.
    pub diverged: Option<bool>,
}

/// One finished build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    number: BuildNumber,
    result: BuildResult,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    #[serde(default)]
    steps: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<SourceConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trust: Option<TrustAudit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<FailureReport>,
}

impl BuildRecord {
    /// Creates a record of a build that finished now.
    #[must_use]
    pub fn finished(number: BuildNumber, result: BuildResult) -> Self {
        let now = Utc::now();
        Self {
            number,
            result,
            started_at: now,
            finished_at: now,
            steps: BTreeSet::new(),
            source: None,
            trust: None,
            failure: None,
        }
    }

    /// Sets the start timestamp.
    #[must_use]
    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Sets the finish timestamp.
    #[must_use]
    pub fn with_finished_at(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = finished_at;
        self
    }

    /// Sets the steps the script invoked.
    #[must_use]
    pub fn with_steps(mut self, steps: impl IntoIterator<Item = String>) -> Self {
        self.steps = steps.into_iter().collect();
        self
    }

    /// Sets the source configuration the build ran against.
    #[must_use]
    pub fn with_source(mut self, source: Option<SourceConfiguration>) -> Self {
        self.source = source;
        self
    }

    /// Sets the trust audit.
    #[must_use]
    pub fn with_trust(mut self, trust: Option<TrustAudit>) -> Self {
        self.trust = trust;
        self
    }

    /// Sets the failure report.
    #[must_use]
    pub fn with_failure(mut self, failure: Option<FailureReport>) -> Self {
        self.failure = failure;
        self
    }

    /// Returns the build number.
    #[must_use]
    pub const fn number(&self) -> BuildNumber {
        self.number
    }

    /// Returns the result.
    #[must_use]
    pub const fn result(&self) -> BuildResult {
        self.result
    }

    /// Returns when the build finished.
    #[must_use]
    pub const fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Returns when the build started.
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns true if the script invoked `step`.
    #[must_use]
    pub fn ran_step(&self, step: &str) -> bool {
        self.steps.contains(step)
    }

    /// Returns the steps the script invoked.
    #[must_use]
    pub fn steps(&self) -> &BTreeSet<String> {
        &self.steps
    }

    /// Returns the source configuration.
    #[must_use]
    pub fn source(&self) -> Option<&SourceConfiguration> {
        self.source.as_ref()
    }

    /// Returns the trust audit.
    #[must_use]
    pub fn trust(&self) -> Option<&TrustAudit> {
        self.trust.as_ref()
    }

    /// Returns the failure report.
    #[must_use]
    pub fn failure(&self) -> Option<&FailureReport> {
        self.failure.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_names_kind() {
        let report = FailureReport::new(FailureKind::UntrustedModification, "Jenkinsfile");
        assert_eq!(report.message, "UntrustedModification: Jenkinsfile");
        assert!(report.kind.is_policy());
        assert!(!FailureKind::Scm.is_policy());
    }

    #[test]
    fn ran_step_matches_recorded_steps() {
        let record = BuildRecord::finished(BuildNumber::new(1), BuildResult::Success)
            .with_steps(["properties".to_string()]);
        assert!(record.ran_step("properties"));
        assert!(!record.ran_step("readTrusted"));
    }
}
