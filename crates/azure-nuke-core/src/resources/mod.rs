//! Built-in resource handlers backed by ARM collection listings

pub mod catalog;

pub use catalog::{BUILTIN, BuiltinType, register_builtin};

use crate::arm::{ArmClient, GenericResource};
use crate::error::HandlerError;
use crate::resource::{Properties, Resource, ResourceHandler, ScopeContext};
use anyhow::Context;
use async_trait::async_trait;
use azure_nuke_common::ResourceScope;
use tracing::debug;

const RESOURCE_GROUP_KIND: &str = "Microsoft.Resources/resourceGroups";

/// Where a collection lives relative to the scope being scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionPath {
    /// `.../providers/{provider type}` under the scope
    Provider(&'static str),
    /// The subscription's resource groups
    ResourceGroups,
}

impl CollectionPath {
    /// ARM path for this collection in `ctx`, or `None` if it has no meaning there
    pub fn resolve(self, ctx: &ScopeContext) -> Option<String> {
        let subscription = ctx.subscription_id()?;
        match (self, ctx.resource_group_name()) {
            (CollectionPath::Provider(kind), Some(rg)) => Some(format!(
                "/subscriptions/{subscription}/resourceGroups/{rg}/providers/{kind}"
            )),
            (CollectionPath::Provider(kind), None) => {
                Some(format!("/subscriptions/{subscription}/providers/{kind}"))
            }
            (CollectionPath::ResourceGroups, None) => {
                Some(format!("/subscriptions/{subscription}/resourcegroups"))
            }
            (CollectionPath::ResourceGroups, Some(_)) => None,
        }
    }
}

/// Lists one ARM collection and turns each entry into a removable resource
pub struct ArmCollectionHandler {
    client: ArmClient,
    collection: CollectionPath,
    api_version: &'static str,
}

impl ArmCollectionHandler {
    pub fn new(client: ArmClient, collection: CollectionPath, api_version: &'static str) -> Self {
        Self {
            client,
            collection,
            api_version,
        }
    }
}

#[async_trait]
impl ResourceHandler for ArmCollectionHandler {
    async fn list(&self, ctx: &ScopeContext) -> Result<Vec<Box<dyn Resource>>, HandlerError> {
        let Some(path) = self.collection.resolve(ctx) else {
            return Err(HandlerError::skip(format!(
                "collection not addressable at {} scope",
                ctx.scope()
            )));
        };

        let listed = match self
            .client
            .list_all::<GenericResource>(&path, self.api_version)
            .await
        {
            Ok(listed) => listed,
            Err(e) if e.is_benign() => return Err(HandlerError::skip(e.to_string())),
            Err(e) => return Err(HandlerError::Failed(anyhow::Error::new(e).context(path))),
        };

        let total = listed.len();
        let resources: Vec<Box<dyn Resource>> = listed
            .into_iter()
            .filter(|r| in_region(ctx, r))
            .map(|r| {
                Box::new(ArmResource {
                    client: self.client.clone(),
                    api_version: self.api_version,
                    inner: r,
                }) as Box<dyn Resource>
            })
            .collect();

        if resources.len() < total {
            debug!(
                scope = %ctx,
                count = resources.len(),
                excluded = total - resources.len(),
                "Dropped resources outside the region filter"
            );
        }
        Ok(resources)
    }
}

/// Region-less and `global` resources always belong to the context
fn in_region(ctx: &ScopeContext, resource: &GenericResource) -> bool {
    resource
        .location
        .as_deref()
        .is_none_or(|l| ctx.includes_region(l))
}

/// A listed ARM resource
pub struct ArmResource {
    client: ArmClient,
    api_version: &'static str,
    inner: GenericResource,
}

impl ArmResource {
    pub fn resource(&self) -> &GenericResource {
        &self.inner
    }
}

#[async_trait]
impl Resource for ArmResource {
    async fn remove(&self) -> anyhow::Result<()> {
        self.client
            .delete(&self.inner.id, self.api_version)
            .await
            .with_context(|| format!("failed to delete {}", self.inner.id))
    }

    fn display_name(&self) -> String {
        self.inner.name.clone()
    }

    fn properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("Name".to_string(), self.inner.name.clone());
        props.insert("Id".to_string(), self.inner.id.to_string());
        if let Some(location) = &self.inner.location {
            props.insert("Location".to_string(), location.clone());
        }
        for (key, value) in self.inner.tags.iter().flatten() {
            props.insert(format!("tag:{key}"), value.clone());
        }
        props
    }

    /// Managed resource groups (AKS node groups, ...) go away with their owner.
    fn filter(&self) -> Option<String> {
        if !self.inner.kind.eq_ignore_ascii_case(RESOURCE_GROUP_KIND) {
            return None;
        }
        self.inner
            .managed_by
            .as_ref()
            .filter(|owner| !owner.is_empty())
            .map(|owner| format!("managed by {owner}"))
    }
}

/// Scope a collection is scanned at
pub fn collection_scope(collection: CollectionPath) -> ResourceScope {
    match collection {
        CollectionPath::Provider(_) => ResourceScope::ResourceGroup,
        CollectionPath::ResourceGroups => ResourceScope::Subscription,
    }
}
