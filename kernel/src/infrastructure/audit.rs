use serde::Serialize;
use tracing::{info, info_span};

/// Security-relevant event for the audit log.
/// Structured for JSON serialization to enable machine-readable audit trails.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// An actor was refused an operation on a job.
    AccessDenied {
        /// Refused actor.
        user: String,
        /// Job the operation targeted.
        resource: String,
        /// Refused permission.
        permission: String,
    },
    /// A branch disappeared from its source and its job was marked dead.
    BranchOrphaned {
        /// Owning collection.
        collection: String,
        /// Job name.
        job: String,
        /// Head that disappeared.
        head: String,
    },
    /// A dead branch reappeared and its job became active again.
    BranchRevived {
        /// Owning collection.
        collection: String,
        /// Job name.
        job: String,
        /// Head that reappeared.
        head: String,
    },
    /// A trusted file was modified in an untrusted revision.
    UntrustedModification {
        /// Job whose build read the file.
        job: String,
        /// Path of the file.
        path: String,
        /// Tip revision.
        tip: String,
        /// Trusted revision.
        trusted: String,
    },
    /// A build replaced the job's declared properties.
    PropertiesReplaced {
        /// Job name.
        job: String,
        /// Kinds installed.
        added: Vec<String>,
        /// Kinds removed.
        removed: Vec<String>,
    },
    /// A job was deleted.
    JobDeleted {
        /// Job name.
        job: String,
        /// Actor that deleted it.
        user: String,
    },
}

/// Logs an audit event to the dedicated audit channel as structured JSON.
/// This uses a specific `target` which can be filtered by the subscriber to redirect to a secure file.
pub fn log_audit(event: &AuditEvent) {
    let span = info_span!(target: "audit", "audit_event");
    let _enter = span.enter();

    let json = serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
    info!(target: "audit", audit_json = %json, "Security Audit Event");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_audit_variants() {
        log_audit(&AuditEvent::AccessDenied {
            user: "bob".into(),
            resource: "feature".into(),
            permission: "build".into(),
        });
        log_audit(&AuditEvent::UntrustedModification {
            job: "pr-1".into(),
            path: "Jenkinsfile".into(),
            tip: "r2".into(),
            trusted: "r1".into(),
        });
        log_audit(&AuditEvent::PropertiesReplaced {
            job: "master".into(),
            added: vec!["parameters".into()],
            removed: vec![],
        });
    }

    #[test]
    fn audit_events_are_tagged() {
        let json = serde_json::to_value(AuditEvent::BranchOrphaned {
            collection: "project".into(),
            job: "feature".into(),
            head: "feature".into(),
        })
        .unwrap();
        assert_eq!(json["event_type"], "branch_orphaned");
    }
}
