//! Bearer credentials per audience
//!
//! Handlers and the management client ask an [`AuthorizerProvider`] for a
//! token scoped to the API they call. Failures are fatal and surface before
//! any scan starts.

use crate::error::AuthenticationError;
use async_trait::async_trait;
use azure_nuke_common::defaults::DEFAULT_LOGIN_ENDPOINT;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// API a credential is requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    /// Azure Resource Manager
    Management,
    /// Microsoft Graph (directory objects)
    Directory,
}

impl Audience {
    pub fn as_str(self) -> &'static str {
        match self {
            Audience::Management => "management",
            Audience::Directory => "directory",
        }
    }

    /// OAuth2 scope requested from the identity platform
    pub fn oauth_scope(self) -> &'static str {
        match self {
            Audience::Management => "https://management.azure.com/.default",
            Audience::Directory => "https://graph.microsoft.com/.default",
        }
    }
}

/// An access token. `Debug` never prints the secret.
#[derive(Clone)]
pub struct BearerToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl BearerToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True once `now` is within the refresh margin of expiry
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| now + Duration::minutes(REFRESH_MARGIN_MINUTES) >= at)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of bearer credentials
#[async_trait]
pub trait AuthorizerProvider: Send + Sync {
    async fn authorizer(&self, audience: Audience) -> Result<BearerToken, AuthenticationError>;
}

/// Pre-acquired tokens, e.g. from `az account get-access-token`
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<Audience, BearerToken>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, audience: Audience, token: impl Into<String>) -> Self {
        self.tokens.insert(audience, BearerToken::new(token, None));
        self
    }
}

#[async_trait]
impl AuthorizerProvider for StaticTokenProvider {
    async fn authorizer(&self, audience: Audience) -> Result<BearerToken, AuthenticationError> {
        self.tokens.get(&audience).cloned().ok_or_else(|| {
            AuthenticationError::MissingCredentials(format!(
                "no static token configured for the {} audience",
                audience.as_str()
            ))
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// OAuth2 client-credentials flow with an application secret.
///
/// Tokens are cached per audience; the cache is shared by every concurrent
/// caller and guarded by a mutex.
pub struct ClientSecretProvider {
    http: reqwest::Client,
    login_endpoint: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cache: Mutex<HashMap<Audience, BearerToken>>,
}

impl ClientSecretProvider {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            login_endpoint: DEFAULT_LOGIN_ENDPOINT.to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_login_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.login_endpoint = endpoint.into();
        self
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_endpoint.trim_end_matches('/'),
            self.tenant_id
        )
    }

    async fn request_token(&self, audience: Audience) -> Result<BearerToken, AuthenticationError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", audience.oauth_scope()),
        ];

        let response = self
            .http
            .post(self.token_url())
            .form(&form)
            .send()
            .await
            .map_err(|source| AuthenticationError::TokenRequest {
                audience: audience.as_str(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthenticationError::Rejected {
                audience: audience.as_str(),
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|source| AuthenticationError::TokenRequest {
                    audience: audience.as_str(),
                    source,
                })?;

        info!(audience = audience.as_str(), expires_in = token.expires_in, "Acquired access token");
        Ok(BearerToken::new(
            token.access_token,
            Some(Utc::now() + Duration::seconds(token.expires_in)),
        ))
    }
}

impl fmt::Debug for ClientSecretProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretProvider")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthorizerProvider for ClientSecretProvider {
    async fn authorizer(&self, audience: Audience) -> Result<BearerToken, AuthenticationError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(&audience) {
            if !token.needs_refresh(Utc::now()) {
                return Ok(token.clone());
            }
            debug!(audience = audience.as_str(), "Refreshing access token");
        }

        let token = self.request_token(audience).await?;
        cache.insert(audience, token.clone());
        Ok(token)
    }
}
