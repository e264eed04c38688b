//! Hierarchy levels for resource discovery
//!
//! Every resource type is listed at exactly one level of the
//! tenant → subscription → resource-group hierarchy.

use std::fmt;

/// Level of the organizational hierarchy a resource type is discovered at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceScope {
    /// Directory-wide resources (applications, service principals, ...)
    Tenant,
    /// Resources addressed directly under a subscription
    Subscription,
    /// Resources living inside a resource group
    ResourceGroup,
}

impl ResourceScope {
    /// All scopes, outermost first
    pub const ALL: [ResourceScope; 3] = [
        ResourceScope::Tenant,
        ResourceScope::Subscription,
        ResourceScope::ResourceGroup,
    ];

    /// Scan order for a destructive run: innermost containers are emptied
    /// before the containers themselves are visited.
    pub const INNERMOST_FIRST: [ResourceScope; 3] = [
        ResourceScope::ResourceGroup,
        ResourceScope::Subscription,
        ResourceScope::Tenant,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceScope::Tenant => "tenant",
            ResourceScope::Subscription => "subscription",
            ResourceScope::ResourceGroup => "resource-group",
        }
    }

    /// Parse from the string form produced by [`as_str`](Self::as_str).
    ///
    /// Also accepts `resourcegroup` and `resource_group`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tenant" => Some(ResourceScope::Tenant),
            "subscription" => Some(ResourceScope::Subscription),
            "resource-group" | "resourcegroup" | "resource_group" => {
                Some(ResourceScope::ResourceGroup)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
