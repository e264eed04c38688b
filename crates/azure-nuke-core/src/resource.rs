//! Handler and resource contracts
//!
//! A [`ResourceHandler`] lists the resources of one type inside one
//! [`ScopeContext`]. Each listed resource is a [`Resource`] the removal loop
//! can describe and delete.

use crate::error::HandlerError;
use async_trait::async_trait;
use azure_nuke_common::ResourceScope;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Human-readable attributes of a resource (name, location, tags, ...)
pub type Properties = BTreeMap<String, String>;

/// Addressing tuple handed to every handler invocation.
///
/// Which optional fields are set depends on the scope being scanned. A context
/// built without [`with_regions`](Self::with_regions) places no restriction on
/// resource locations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeContext {
    tenant_id: String,
    subscription_id: Option<String>,
    resource_group: Option<String>,
    regions: Option<BTreeSet<String>>,
}

/// Pseudo-location of resources that live outside any region
pub const GLOBAL_LOCATION: &str = "global";

impl ScopeContext {
    /// Tenant-level context
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            subscription_id: None,
            resource_group: None,
            regions: None,
        }
    }

    /// Subscription-level context
    pub fn subscription(tenant_id: impl Into<String>, subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: Some(subscription_id.into()),
            ..Self::tenant(tenant_id)
        }
    }

    /// Resource-group-level context
    pub fn resource_group(
        tenant_id: impl Into<String>,
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: Some(resource_group.into()),
            ..Self::subscription(tenant_id, subscription_id)
        }
    }

    /// Restrict the context to `regions`. An empty set admits only
    /// region-less resources.
    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions = Some(regions.into_iter().map(Into::into).collect());
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    pub fn resource_group_name(&self) -> Option<&str> {
        self.resource_group.as_deref()
    }

    /// The allowed regions, `None` when unrestricted
    pub fn regions(&self) -> Option<&BTreeSet<String>> {
        self.regions.as_ref()
    }

    /// The level this context addresses
    pub fn scope(&self) -> ResourceScope {
        match (&self.subscription_id, &self.resource_group) {
            (Some(_), Some(_)) => ResourceScope::ResourceGroup,
            (Some(_), None) => ResourceScope::Subscription,
            _ => ResourceScope::Tenant,
        }
    }

    /// True if a resource at `location` belongs to this context.
    ///
    /// Locations are compared case-insensitively with spaces removed, so
    /// `"West Europe"` matches `"westeurope"`. `global` is always included.
    pub fn includes_region(&self, location: &str) -> bool {
        let Some(regions) = &self.regions else {
            return true;
        };
        let wanted = normalize_region(location);
        wanted == GLOBAL_LOCATION || regions.iter().any(|r| normalize_region(r) == wanted)
    }
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tenant/{}", self.tenant_id)?;
        if let Some(sub) = &self.subscription_id {
            write!(f, "/subscriptions/{sub}")?;
        }
        if let Some(rg) = &self.resource_group {
            write!(f, "/resourceGroups/{rg}")?;
        }
        Ok(())
    }
}

/// Canonical spelling of a region name: lowercase, no whitespace
pub(crate) fn normalize_region(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A single discovered cloud resource
#[async_trait]
pub trait Resource: Send + Sync {
    /// Request deletion of the resource
    async fn remove(&self) -> anyhow::Result<()>;

    /// Short name for operator output
    fn display_name(&self) -> String;

    /// Attributes shown in reports
    fn properties(&self) -> Properties {
        Properties::new()
    }

    /// Resource-specific veto: `Some(reason)` means "never remove this".
    ///
    /// Consulted by the filter stage, not by the scanner.
    fn filter(&self) -> Option<String> {
        None
    }
}

impl fmt::Debug for dyn Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.display_name())
            .finish_non_exhaustive()
    }
}

/// Listing logic for one resource type.
///
/// Handlers are shared across every concurrent scan of their type. Any cache
/// a handler keeps between invocations (role names, principal lookups, ...)
/// is read and written from several tasks at once and must be guarded by the
/// handler itself, e.g. with a `tokio::sync::Mutex` or `RwLock`.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// List every resource of this type inside `ctx`.
    ///
    /// Return [`HandlerError::Skipped`] when the type does not apply to the
    /// scope (unsupported region, unregistered provider, ...).
    async fn list(&self, ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_from_fields() {
        assert_eq!(ScopeContext::tenant("t").scope(), ResourceScope::Tenant);
        assert_eq!(
            ScopeContext::subscription("t", "s").scope(),
            ResourceScope::Subscription
        );
        assert_eq!(
            ScopeContext::resource_group("t", "s", "rg").scope(),
            ResourceScope::ResourceGroup
        );
    }

    #[test]
    fn test_display_path() {
        let ctx = ScopeContext::resource_group("t1", "s1", "rg1");
        assert_eq!(ctx.to_string(), "tenant/t1/subscriptions/s1/resourceGroups/rg1");
    }

    #[test]
    fn test_region_matching_normalizes() {
        let ctx = ScopeContext::subscription("t", "s").with_regions(["westeurope"]);
        assert!(ctx.includes_region("West Europe"));
        assert!(!ctx.includes_region("eastus"));
    }

    #[test]
    fn test_unrestricted_allows_everything() {
        let ctx = ScopeContext::tenant("t");
        assert!(ctx.regions().is_none());
        assert!(ctx.includes_region("anywhere"));
    }

    #[test]
    fn test_empty_region_set_allows_only_global() {
        let ctx = ScopeContext::subscription("t", "s").with_regions(Vec::<String>::new());
        assert!(!ctx.includes_region("eastus"));
        assert!(ctx.includes_region("global"));
        assert!(ctx.includes_region("Global"));
    }

    #[test]
    fn test_global_passes_any_region_set() {
        let ctx = ScopeContext::resource_group("t", "s", "rg").with_regions(["northeurope"]);
        assert!(ctx.includes_region("global"));
        assert!(!ctx.includes_region("westeurope"));
    }
}
