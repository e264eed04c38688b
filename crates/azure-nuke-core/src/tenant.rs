//! Tenant hierarchy enumeration
//!
//! Resolves the tenant → subscription → (regions, resource groups) tree once
//! per run into an immutable [`TenantSnapshot`] that every scan reads.

use crate::error::TenantError;
use crate::resource::{ScopeContext, normalize_region};
use anyhow::Result;
use azure_nuke_common::ResourceScope;
use azure_nuke_common::defaults::DEFAULT_ENUMERATION_TIMEOUT_SECS;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One page of a paged listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Continuation token for the next page, `None` on the last page
    pub next: Option<String>,
}

impl<T> Page<T> {
    /// A single, final page
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Paged management-plane calls the enumerator needs.
///
/// Each call returns one page; `next` is the continuation from the previous
/// page (`None` for the first).
///
/// Note: parameters use `Option<String>` instead of `Option<&str>` to work
/// around mockall lifetime limitations.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait ManagementOperations: Send + Sync {
    /// Tenant IDs visible to the credential
    async fn list_tenants(&self, next: Option<String>) -> Result<Page<String>>;

    /// Subscription IDs visible to the credential
    async fn list_subscriptions(&self, next: Option<String>) -> Result<Page<String>>;

    /// Region names available to a subscription
    async fn list_locations(
        &self,
        subscription_id: &str,
        next: Option<String>,
    ) -> Result<Page<String>>;

    /// Resource group names in a subscription
    async fn list_resource_groups(
        &self,
        subscription_id: &str,
        next: Option<String>,
    ) -> Result<Page<String>>;
}

/// Drain every page of a listing. Any page error aborts the whole listing.
async fn drain<F, Fut>(what: &str, mut fetch: F) -> Result<Vec<String>, TenantError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<String>>>,
{
    let mut items = Vec::new();
    let mut next = None;
    let mut pages = 0u32;
    loop {
        let page = fetch(next.take())
            .await
            .map_err(|e| TenantError::pagination(what, e))?;
        pages += 1;
        items.extend(page.items);
        match page.next {
            Some(token) => next = Some(token),
            None => break,
        }
    }
    debug!(what, pages, count = items.len(), "Drained paged listing");
    Ok(items)
}

/// Immutable view of a tenant's hierarchy for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantSnapshot {
    id: String,
    subscription_ids: Vec<String>,
    regions_by_subscription: BTreeMap<String, BTreeSet<String>>,
    resource_groups_by_subscription: BTreeMap<String, BTreeSet<String>>,
    skipped_subscriptions: Vec<String>,
    /// Whether a region filter narrowed the region sets
    region_filtered: bool,
}

impl TenantSnapshot {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Accepted subscriptions, in discovery order
    pub fn subscription_ids(&self) -> &[String] {
        &self.subscription_ids
    }

    /// Subscriptions that were visible but excluded by the filter
    pub fn skipped_subscriptions(&self) -> &[String] {
        &self.skipped_subscriptions
    }

    pub fn regions(&self, subscription_id: &str) -> Option<&BTreeSet<String>> {
        self.regions_by_subscription.get(subscription_id)
    }

    pub fn resource_groups(&self, subscription_id: &str) -> Option<&BTreeSet<String>> {
        self.resource_groups_by_subscription.get(subscription_id)
    }

    /// Union of every accepted subscription's regions
    pub fn all_regions(&self) -> BTreeSet<String> {
        self.regions_by_subscription
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    /// True if the run was narrowed to a set of regions
    pub fn is_region_filtered(&self) -> bool {
        self.region_filtered
    }

    /// Scope contexts to scan at `scope`
    ///
    /// - Tenant: one context
    /// - Subscription: one per accepted subscription
    /// - ResourceGroup: one per resource group of every accepted subscription
    ///
    /// Without a region filter the contexts are unrestricted. With one, each
    /// context only admits its subscription's matching regions, which may be
    /// none at all.
    pub fn contexts(&self, scope: ResourceScope) -> Vec<ScopeContext> {
        match scope {
            ResourceScope::Tenant => {
                let ctx = ScopeContext::tenant(&self.id);
                vec![self.restrict(ctx, self.all_regions())]
            }
            ResourceScope::Subscription => self
                .subscription_ids
                .iter()
                .map(|sub| {
                    let ctx = ScopeContext::subscription(&self.id, sub);
                    self.restrict(ctx, self.regions_of(sub))
                })
                .collect(),
            ResourceScope::ResourceGroup => self
                .subscription_ids
                .iter()
                .flat_map(|sub| {
                    self.resource_groups_by_subscription
                        .get(sub)
                        .into_iter()
                        .flatten()
                        .map(move |rg| {
                            let ctx = ScopeContext::resource_group(&self.id, sub, rg);
                            self.restrict(ctx, self.regions_of(sub))
                        })
                })
                .collect(),
        }
    }

    fn restrict(&self, ctx: ScopeContext, regions: BTreeSet<String>) -> ScopeContext {
        if self.region_filtered {
            ctx.with_regions(regions)
        } else {
            ctx
        }
    }

    fn regions_of(&self, subscription_id: &str) -> BTreeSet<String> {
        self.regions_by_subscription
            .get(subscription_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Walks the tenant hierarchy under an overall deadline
#[derive(Debug)]
pub struct ScopeEnumerator<M> {
    ops: M,
    timeout: Duration,
}

impl<M: ManagementOperations> ScopeEnumerator<M> {
    pub fn new(ops: M) -> Self {
        Self {
            ops,
            timeout: Duration::from_secs(DEFAULT_ENUMERATION_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve `tenant_id` into a complete snapshot.
    ///
    /// An empty `subscription_filter` accepts every subscription; an empty
    /// `region_filter` keeps every region.
    pub async fn resolve_tenant(
        &self,
        tenant_id: &str,
        subscription_filter: &[String],
        region_filter: &[String],
    ) -> Result<TenantSnapshot, TenantError> {
        tokio::time::timeout(
            self.timeout,
            self.resolve_inner(tenant_id, subscription_filter, region_filter),
        )
        .await
        .map_err(|_| TenantError::Timeout(self.timeout))?
    }

    async fn resolve_inner(
        &self,
        tenant_id: &str,
        subscription_filter: &[String],
        region_filter: &[String],
    ) -> Result<TenantSnapshot, TenantError> {
        let tenants = drain("tenants", |next| self.ops.list_tenants(next)).await?;
        let Some(primary) = tenants.first() else {
            return Err(TenantError::NotFound {
                tenant_id: tenant_id.to_string(),
            });
        };
        if primary != tenant_id {
            return Err(TenantError::Mismatch {
                expected: tenant_id.to_string(),
                actual: primary.clone(),
            });
        }

        let wanted_regions: BTreeSet<String> =
            region_filter.iter().map(|r| normalize_region(r)).collect();
        let mut snapshot = TenantSnapshot {
            id: tenant_id.to_string(),
            region_filtered: !wanted_regions.is_empty(),
            ..Default::default()
        };

        let subscriptions = drain("subscriptions", |next| self.ops.list_subscriptions(next)).await?;
        for subscription_id in subscriptions {
            if snapshot.subscription_ids.contains(&subscription_id) {
                continue;
            }
            if !subscription_filter.is_empty() && !subscription_filter.contains(&subscription_id) {
                warn!(subscription_id = %subscription_id, "Skipping subscription not in filter");
                snapshot.skipped_subscriptions.push(subscription_id);
                continue;
            }

            let what = format!("locations of subscription {subscription_id}");
            let regions: BTreeSet<String> =
                drain(&what, |next| self.ops.list_locations(&subscription_id, next))
                    .await?
                    .into_iter()
                    .filter(|r| {
                        wanted_regions.is_empty() || wanted_regions.contains(&normalize_region(r))
                    })
                    .collect();
            if snapshot.region_filtered && regions.is_empty() {
                warn!(
                    subscription_id = %subscription_id,
                    "No requested region is available, only global resources will be listed"
                );
            }

            let what = format!("resource groups of subscription {subscription_id}");
            let groups: BTreeSet<String> =
                drain(&what, |next| self.ops.list_resource_groups(&subscription_id, next))
                    .await?
                    .into_iter()
                    .collect();

            debug!(
                subscription_id = %subscription_id,
                regions = regions.len(),
                resource_groups = groups.len(),
                "Resolved subscription"
            );
            snapshot
                .regions_by_subscription
                .insert(subscription_id.clone(), regions);
            snapshot
                .resource_groups_by_subscription
                .insert(subscription_id.clone(), groups);
            snapshot.subscription_ids.push(subscription_id);
        }

        for wanted in subscription_filter {
            if !snapshot.subscription_ids.contains(wanted) {
                warn!(subscription_id = %wanted, "Requested subscription not visible in tenant");
            }
        }

        info!(
            tenant_id = %snapshot.id,
            subscriptions = snapshot.subscription_ids.len(),
            skipped = snapshot.skipped_subscriptions.len(),
            "Tenant resolved"
        );
        Ok(snapshot)
    }
}
