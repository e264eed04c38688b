//! Error taxonomy for the engine
//!
//! Errors fall in two groups:
//! - Fatal setup/topology errors ([`RegistryError`], [`TenantError`],
//!   [`AuthenticationError`]) that stop a run before anything is removed.
//! - Errors scoped to one resource type in one scope ([`HandlerError`]),
//!   which the scanner records and contains.

use azure_nuke_common::{ItemState, ResourceScope};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or querying the resource-type registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A registration with the same name already exists
    #[error("resource type '{0}' is already registered")]
    DuplicateName(String),

    /// The registration is incomplete
    #[error("invalid registration for resource type '{name}': {reason}")]
    InvalidRegistration { name: String, reason: &'static str },

    /// The requested dependency graph contains at least one cycle
    #[error("dependency cycle between resource types: {}", members.join(", "))]
    DependencyCycle { members: Vec<String> },

    /// A requested name is not registered
    #[error("resource type '{0}' is not registered")]
    UnknownType(String),

    /// A registration depends on a name that is not registered
    #[error("resource type '{name}' depends on unregistered type '{dependency}'")]
    UnknownDependency { name: String, dependency: String },

    /// A scan list places a type before one of its dependencies
    #[error("resource type '{name}' is listed before its dependency '{dependency}'")]
    NotOrdered { name: String, dependency: String },

    /// A scan list names a type registered at another scope
    #[error("resource type '{name}' is registered at {registered} scope, not {requested}")]
    WrongScope {
        name: String,
        registered: ResourceScope,
        requested: ResourceScope,
    },
}

impl RegistryError {
    /// Members of the cycle, if this is a cycle error
    pub fn cycle_members(&self) -> Option<&[String]> {
        match self {
            RegistryError::DependencyCycle { members } => Some(members),
            _ => None,
        }
    }
}

/// Errors raised while resolving the tenant hierarchy
#[derive(Debug, Error)]
pub enum TenantError {
    /// The credential cannot see any tenant at all
    #[error("no tenants visible to the current credential (expected '{tenant_id}')")]
    NotFound { tenant_id: String },

    /// The credential belongs to a different tenant than requested
    #[error("tenant mismatch: requested '{expected}' but credential resolves to '{actual}'")]
    Mismatch { expected: String, actual: String },

    /// A paged listing call failed
    #[error("failed to list {what}")]
    Pagination {
        what: String,
        #[source]
        source: anyhow::Error,
    },

    /// The whole enumeration exceeded its deadline
    #[error("tenant enumeration did not finish within {0:?}")]
    Timeout(Duration),
}

impl TenantError {
    pub fn pagination(what: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Pagination {
            what: what.into(),
            source,
        }
    }
}

/// Errors acquiring bearer credentials
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// Not enough configuration to build any credential
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// The token endpoint could not be reached or returned garbage
    #[error("token request for {audience} failed")]
    TokenRequest {
        audience: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The token endpoint answered with an error status
    #[error("token request for {audience} rejected with HTTP {status}: {body}")]
    Rejected {
        audience: &'static str,
        status: u16,
        body: String,
    },
}

/// Failure reported by a resource handler's `list` call.
///
/// Handlers classify their own failures: a [`Skipped`](HandlerError::Skipped)
/// result means "this type does not apply here" and counts as zero resources.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Benign: unsupported region, unregistered provider, ...
    #[error("skipped: {reason}")]
    Skipped { reason: String },

    /// Anything else
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, HandlerError::Skipped { .. })
    }
}

/// Illegal item state change
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal item state transition {from} -> {to}")]
pub struct ItemError {
    pub from: ItemState,
    pub to: ItemState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_every_member() {
        let err = RegistryError::DependencyCycle {
            members: vec!["Disk".to_string(), "VirtualMachine".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle between resource types: Disk, VirtualMachine"
        );
        assert_eq!(err.cycle_members().map(<[String]>::len), Some(2));
        assert!(RegistryError::UnknownType("x".into()).cycle_members().is_none());
    }

    #[test]
    fn test_handler_error_classification() {
        assert!(HandlerError::skip("region not supported").is_skip());
        let hard: HandlerError = anyhow::anyhow!("boom").into();
        assert!(!hard.is_skip());
        assert_eq!(hard.to_string(), "boom");
    }

    #[test]
    fn test_tenant_error_display() {
        let err = TenantError::Mismatch {
            expected: "a".into(),
            actual: "b".into(),
        };
        assert!(err.to_string().contains("requested 'a'"));

        let err = TenantError::pagination("subscriptions", anyhow::anyhow!("503"));
        assert_eq!(err.to_string(), "failed to list subscriptions");
        assert_eq!(
            std::error::Error::source(&err).map(|s| s.to_string()),
            Some("503".to_string())
        );
    }

    #[test]
    fn test_item_error_display() {
        let err = ItemError {
            from: ItemState::Finished,
            to: ItemState::Pending,
        };
        assert_eq!(
            err.to_string(),
            "illegal item state transition finished -> pending"
        );
    }
}
