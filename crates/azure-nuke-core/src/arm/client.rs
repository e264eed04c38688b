//! ARM REST client

use super::error::{ArmError, classify_response};
use crate::auth::{Audience, AuthorizerProvider};
use crate::tenant::{ManagementOperations, Page};
use azure_nuke_common::defaults::{
    DEFAULT_MANAGEMENT_ENDPOINT, RESOURCE_GROUPS_API_VERSION, SUBSCRIPTIONS_API_VERSION,
};
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retries after the first attempt while ARM throttles a request
const THROTTLE_RETRIES: usize = 3;

fn throttle_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(30))
        .with_max_times(THROTTLE_RETRIES)
}

/// Run `op` until it stops being throttled or the retries run out.
///
/// A `Retry-After` sent by the server replaces the computed backoff delay.
async fn retry_throttled<T, F, Fut>(url: &str, op: F) -> Result<T, ArmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ArmError>>,
{
    op.retry(throttle_backoff())
        .when(ArmError::is_throttled)
        .adjust(|e, delay| delay.map(|d| e.retry_after().unwrap_or(d)))
        .notify(|e, delay| {
            warn!(url, delay = ?delay, error = %e, "ARM throttled request, retrying...");
        })
        .await
}

/// Fully-qualified ARM resource ID
/// (`/subscriptions/{sub}/resourceGroups/{rg}/providers/{type}/{name}`)
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Deserialize, derive_more::Display, derive_more::Deref,
)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        ResourceId(id.into())
    }
}

/// One page of an ARM collection
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct ListPage<T> {
    #[serde(default)]
    pub value: Vec<T>,
    #[serde(rename = "nextLink")]
    pub next_link: Option<String>,
}

/// The envelope shared by every tracked ARM resource
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericResource {
    pub id: ResourceId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    pub managed_by: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantEntry {
    tenant_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionEntry {
    subscription_id: String,
}

#[derive(Deserialize)]
struct NamedEntry {
    name: String,
}

/// Thin client over the management endpoint.
///
/// Cloning is cheap; clones share the connection pool and the authorizer.
#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    auth: Arc<dyn AuthorizerProvider>,
}

impl ArmClient {
    pub fn new(auth: Arc<dyn AuthorizerProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: DEFAULT_MANAGEMENT_ENDPOINT.to_string(),
            auth,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Absolute URL for an ARM path
    pub fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, api_version)
    }

    /// Send a request, retrying while ARM throttles. Returns status and body
    /// of the final response.
    async fn execute(&self, method: Method, url: &str) -> Result<(StatusCode, String), ArmError> {
        retry_throttled(url, || self.send(method.clone(), url)).await
    }

    /// One attempt. Throttled responses come back as errors so they can be
    /// retried; every other response is returned as is.
    async fn send(&self, method: Method, url: &str) -> Result<(StatusCode, String), ArmError> {
        let token = self.auth.authorizer(Audience::Management).await?;
        let http_err = |source| ArmError::Http {
            url: url.to_string(),
            source,
        };

        let response = self
            .http
            .request(method, url)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(http_err)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.map_err(http_err)?;

        if !status.is_success() {
            let err = classify_response(status.as_u16(), &body).with_retry_after(retry_after);
            if err.is_throttled() {
                return Err(err);
            }
        }
        Ok((status, body))
    }

    /// Fetch one page from an absolute URL (first page or a `nextLink`)
    pub async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<ListPage<T>, ArmError> {
        let (status, body) = self.execute(Method::GET, url).await?;
        if !status.is_success() {
            return Err(classify_response(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|source| ArmError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Fetch every page of a collection
    pub async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        api_version: &str,
    ) -> Result<Vec<T>, ArmError> {
        let mut items = Vec::new();
        let mut url = self.url(path, api_version);
        loop {
            let page: ListPage<T> = self.get_page(&url).await?;
            items.extend(page.value);
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }
        debug!(path, count = items.len(), "Listed ARM collection");
        Ok(items)
    }

    /// Request deletion of a resource. A resource that is already gone counts
    /// as deleted.
    pub async fn delete(&self, id: &ResourceId, api_version: &str) -> Result<(), ArmError> {
        let url = self.url(id, api_version);
        let (status, body) = self.execute(Method::DELETE, &url).await?;
        if status.is_success() {
            debug!(resource_id = %id, status = status.as_u16(), "Delete accepted");
            return Ok(());
        }

        let err = classify_response(status.as_u16(), &body);
        if err.is_not_found() {
            debug!(resource_id = %id, "Resource already deleted");
            return Ok(());
        }
        Err(err)
    }

    async fn page<E, F>(
        &self,
        next: Option<String>,
        path: &str,
        api_version: &str,
        project: F,
    ) -> anyhow::Result<Page<String>>
    where
        E: DeserializeOwned,
        F: Fn(E) -> String,
    {
        let url = next.unwrap_or_else(|| self.url(path, api_version));
        let page: ListPage<E> = self.get_page(&url).await?;
        Ok(Page {
            items: page.value.into_iter().map(project).collect(),
            next: page.next_link,
        })
    }
}

impl ManagementOperations for ArmClient {
    async fn list_tenants(&self, next: Option<String>) -> anyhow::Result<Page<String>> {
        self.page(next, "/tenants", SUBSCRIPTIONS_API_VERSION, |t: TenantEntry| {
            t.tenant_id
        })
        .await
    }

    async fn list_subscriptions(&self, next: Option<String>) -> anyhow::Result<Page<String>> {
        self.page(
            next,
            "/subscriptions",
            SUBSCRIPTIONS_API_VERSION,
            |s: SubscriptionEntry| s.subscription_id,
        )
        .await
    }

    async fn list_locations(
        &self,
        subscription_id: &str,
        next: Option<String>,
    ) -> anyhow::Result<Page<String>> {
        let path = format!("/subscriptions/{subscription_id}/locations");
        self.page(next, &path, SUBSCRIPTIONS_API_VERSION, |l: NamedEntry| l.name)
            .await
    }

    async fn list_resource_groups(
        &self,
        subscription_id: &str,
        next: Option<String>,
    ) -> anyhow::Result<Page<String>> {
        let path = format!("/subscriptions/{subscription_id}/resourcegroups");
        self.page(next, &path, RESOURCE_GROUPS_API_VERSION, |g: NamedEntry| g.name)
            .await
    }
}
