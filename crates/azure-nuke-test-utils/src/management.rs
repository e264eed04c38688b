//! In-memory management plane

use anyhow::{Result, anyhow, bail};
use azure_nuke_core::{ManagementOperations, Page};
use std::collections::HashMap;
use std::time::Duration;

/// Serves a fixed tenant hierarchy, optionally split into small pages.
///
/// Continuation tokens are the stringified offset of the next page.
#[derive(Debug, Clone, Default)]
pub struct FakeManagement {
    tenants: Vec<String>,
    subscriptions: Vec<String>,
    locations: HashMap<String, Vec<String>>,
    resource_groups: HashMap<String, Vec<String>>,
    failing_subscriptions: Vec<String>,
    page_size: Option<usize>,
    latency: Option<Duration>,
}

impl FakeManagement {
    /// A credential that sees exactly `tenant_id`
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenants: vec![tenant_id.into()],
            ..Default::default()
        }
    }

    /// A credential that sees no tenant at all
    pub fn without_tenants() -> Self {
        Self::default()
    }

    pub fn with_subscription(
        mut self,
        subscription_id: &str,
        regions: &[&str],
        resource_groups: &[&str],
    ) -> Self {
        self.subscriptions.push(subscription_id.to_string());
        self.locations.insert(
            subscription_id.to_string(),
            regions.iter().map(|r| r.to_string()).collect(),
        );
        self.resource_groups.insert(
            subscription_id.to_string(),
            resource_groups.iter().map(|g| g.to_string()).collect(),
        );
        self
    }

    /// Fail resource-group listing for `subscription_id`
    pub fn with_failing_subscription(mut self, subscription_id: &str) -> Self {
        self.failing_subscriptions.push(subscription_id.to_string());
        self
    }

    /// Split every listing into pages of `size` items
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn page(&self, items: &[String], next: Option<String>) -> Result<Page<String>> {
        let start = match next {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| anyhow!("invalid continuation token '{token}'"))?,
            None => 0,
        };
        let size = self.page_size.unwrap_or(usize::MAX);
        let end = start.saturating_add(size).min(items.len());
        Ok(Page {
            items: items.get(start..end).unwrap_or_default().to_vec(),
            next: (end < items.len()).then(|| end.to_string()),
        })
    }

    fn known(&self, subscription_id: &str) -> Result<()> {
        if !self.subscriptions.iter().any(|s| s == subscription_id) {
            bail!("SubscriptionNotFound: {subscription_id}");
        }
        Ok(())
    }
}

impl ManagementOperations for FakeManagement {
    async fn list_tenants(&self, next: Option<String>) -> Result<Page<String>> {
        self.delay().await;
        self.page(&self.tenants, next)
    }

    async fn list_subscriptions(&self, next: Option<String>) -> Result<Page<String>> {
        self.delay().await;
        self.page(&self.subscriptions, next)
    }

    async fn list_locations(&self, subscription_id: &str, next: Option<String>) -> Result<Page<String>> {
        self.delay().await;
        self.known(subscription_id)?;
        let regions = self.locations.get(subscription_id).cloned().unwrap_or_default();
        self.page(&regions, next)
    }

    async fn list_resource_groups(
        &self,
        subscription_id: &str,
        next: Option<String>,
    ) -> Result<Page<String>> {
        self.delay().await;
        self.known(subscription_id)?;
        if self.failing_subscriptions.iter().any(|s| s == subscription_id) {
            bail!("HTTP 503 listing resource groups of {subscription_id}");
        }
        let groups = self
            .resource_groups
            .get(subscription_id)
            .cloned()
            .unwrap_or_default();
        self.page(&groups, next)
    }
}
