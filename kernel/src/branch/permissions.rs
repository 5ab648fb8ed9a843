//! Permission checks for branch jobs.
//!
//! Branch rules are an explicit decision function composed in front of the
//! base authorizer: [`decide_branch_permission`] either settles the request or
//! defers to the base check.

use core::fmt;
use std::collections::HashSet;

use thiserror::Error;

use super::reference::BranchState;

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Actor {
    /// A named user.
    User(String),
    /// The system itself, used for administrative cleanup.
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(name) => write!(f, "{name}"),
            Self::System => write!(f, "SYSTEM"),
        }
    }
}

/// Operations guarded on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// View the job.
    Read,
    /// Trigger a build.
    Build,
    /// Change the job configuration directly.
    Configure,
    /// Delete the job.
    Delete,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Build => write!(f, "build"),
            Self::Configure => write!(f, "configure"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The operation may proceed.
    Allow,
    /// The operation is refused.
    Deny,
}

/// Errors related to permission checks.
#[derive(Debug, Clone, Error)]
pub enum PermissionError {
    /// The required permission was not granted.
    #[error("Permission denied: {actor} lacks '{permission}'")]
    PermissionDenied {
        /// Actor that was refused.
        actor: String,
        /// The permission that was denied.
        permission: Permission,
    },
}

/// Base authorization check.
pub trait Authorizer: Send + Sync {
    /// Decides whether `actor` holds `permission`.
    fn decide(&self, actor: &Actor, permission: Permission) -> Decision;
}

impl<A: Authorizer + ?Sized> Authorizer for std::sync::Arc<A> {
    fn decide(&self, actor: &Actor, permission: Permission) -> Decision {
        (**self).decide(actor, permission)
    }
}

/// Authorizer that grants everything.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn decide(&self, _actor: &Actor, _permission: Permission) -> Decision {
        Decision::Allow
    }
}

/// Authorizer granting a fixed set of permissions to every user.
#[derive(Debug, Clone)]
pub struct RestrictedPermissions {
    allowed: HashSet<Permission>,
}

impl RestrictedPermissions {
    /// Creates a checker allowing `allowed`.
    #[must_use]
    pub fn new(allowed: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl Authorizer for RestrictedPermissions {
    fn decide(&self, actor: &Actor, permission: Permission) -> Decision {
        if *actor == Actor::System || self.allowed.contains(&permission) {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Branch-specific rules. `None` defers to the base authorizer.
///
/// `branch` is `None` for jobs that are not generated from a branch.
#[must_use]
pub fn decide_branch_permission(
    actor: &Actor,
    permission: Permission,
    branch: Option<BranchState>,
) -> Option<Decision> {
    let state = branch?;
    if *actor == Actor::System {
        return Some(Decision::Allow);
    }
    match (permission, state) {
        (Permission::Build, BranchState::Dead)
        | (Permission::Delete, BranchState::Active)
        | (Permission::Configure, _) => Some(Decision::Deny),
        _ => None,
    }
}

/// Base authorizer with the branch rules in front of it.
#[derive(Debug, Clone, Default)]
pub struct BranchAwareAuthorizer<A> {
    base: A,
}

impl<A: Authorizer> BranchAwareAuthorizer<A> {
    /// Wraps `base`.
    #[must_use]
    pub const fn new(base: A) -> Self {
        Self { base }
    }

    /// Decides `permission` for a job in branch state `branch`.
    #[must_use]
    pub fn decide(&self, actor: &Actor, permission: Permission, branch: Option<BranchState>) -> Decision {
        decide_branch_permission(actor, permission, branch)
            .unwrap_or_else(|| self.base.decide(actor, permission))
    }

    /// Like [`Self::decide`] but as a `Result`.
    ///
    /// # Errors
    /// Returns `PermissionError::PermissionDenied` when the decision is `Deny`.
    pub fn check(
        &self,
        actor: &Actor,
        permission: Permission,
        branch: Option<BranchState>,
    ) -> Result<(), PermissionError> {
        match self.decide(actor, permission, branch) {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(PermissionError::PermissionDenied {
                actor: actor.to_string(),
                permission,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Actor {
        Actor::User("alice".to_string())
    }

    #[test]
    fn dead_branch_refuses_builds_for_users() {
        let auth = BranchAwareAuthorizer::new(AllowAll);
        assert_eq!(
            auth.decide(&alice(), Permission::Build, Some(BranchState::Dead)),
            Decision::Deny
        );
        assert_eq!(
            auth.decide(&alice(), Permission::Build, Some(BranchState::Active)),
            Decision::Allow
        );
    }

    #[test]
    fn system_bypasses_branch_rules() {
        let auth = BranchAwareAuthorizer::new(AllowAll);
        assert_eq!(
            auth.decide(&Actor::System, Permission::Build, Some(BranchState::Dead)),
            Decision::Allow
        );
    }

    #[test]
    fn delete_only_from_dead() {
        let auth = BranchAwareAuthorizer::new(AllowAll);
        assert!(auth
            .check(&alice(), Permission::Delete, Some(BranchState::Active))
            .is_err());
        assert!(auth
            .check(&alice(), Permission::Delete, Some(BranchState::Dead))
            .is_ok());
    }

    #[test]
    fn configure_denied_on_branch_jobs_but_not_others() {
        let auth = BranchAwareAuthorizer::new(AllowAll);
        assert!(auth
            .check(&alice(), Permission::Configure, Some(BranchState::Active))
            .is_err());
        assert!(auth.check(&alice(), Permission::Configure, None).is_ok());
    }

    #[test]
    fn base_authorizer_still_applies() {
        let auth = BranchAwareAuthorizer::new(RestrictedPermissions::new([Permission::Read]));
        assert!(auth
            .check(&alice(), Permission::Build, Some(BranchState::Active))
            .is_err());
        assert!(auth
            .check(&alice(), Permission::Read, Some(BranchState::Dead))
            .is_ok());
    }
}
