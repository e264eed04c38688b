//! ARM error classification
//!
//! Classifies management-plane failures by the `error.code` field of the
//! response body instead of matching on message text.

use crate::error::AuthenticationError;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors from the ARM REST client
#[derive(Debug, Error)]
pub enum ArmError {
    /// Transport failure: DNS, TLS, connection reset, ...
    #[error("request to {url} failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// ARM answered with a non-success status
    #[error("{code} (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        /// Server-requested wait before retrying (`Retry-After`)
        retry_after: Option<Duration>,
    },

    /// Response body did not match the expected shape
    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// No credential for the management audience
    #[error(transparent)]
    Auth(#[from] AuthenticationError),
}

/// Codes meaning the addressed resource does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFound",
    "ResourceGroupNotFound",
    "SubscriptionNotFound",
    "NotFound",
];

/// Codes meaning "this resource type does not apply here"
const BENIGN_CODES: &[&str] = &[
    "NoRegisteredProviderFound",
    "MissingSubscriptionRegistration",
    "SubscriptionNotRegistered",
    "InvalidResourceType",
    "LocationNotAvailableForResourceType",
    "DisallowedOperation",
];

/// Codes for rate limiting
const THROTTLING_CODES: &[&str] = &[
    "TooManyRequests",
    "SubscriptionRequestsThrottled",
    "ResourceRequestsThrottled",
    "TenantRequestsThrottled",
];

impl ArmError {
    /// ARM error code, if the service returned one
    pub fn code(&self) -> Option<&str> {
        match self {
            ArmError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ArmError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ArmError::Api { status, code, .. } => {
                *status == 404 || NOT_FOUND_CODES.contains(&code.as_str())
            }
            _ => false,
        }
    }

    /// Failures that mean a listing should count as zero resources
    pub fn is_benign(&self) -> bool {
        self.is_not_found() || self.code().is_some_and(|c| BENIGN_CODES.contains(&c))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ArmError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Attach the `Retry-After` delay the server sent with the response
    pub fn with_retry_after(mut self, delay: Option<Duration>) -> Self {
        if let ArmError::Api { retry_after, .. } = &mut self {
            *retry_after = delay;
        }
        self
    }

    /// Rate limited by ARM, by status or by code (ARM also throttles with 409/503)
    pub fn is_throttled(&self) -> bool {
        match self {
            ArmError::Api { status, code, .. } => {
                *status == 429 || THROTTLING_CODES.contains(&code.as_str())
            }
            _ => false,
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

/// Build an [`ArmError::Api`] from a failed response.
///
/// Bodies that are not the standard `{"error": {...}}` envelope keep the HTTP
/// reason phrase as the code and the raw body as the message.
pub fn classify_response(status: u16, body: &str) -> ArmError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => ArmError::Api {
            status,
            code: envelope.error.code,
            message: envelope.error.message,
            retry_after: None,
        },
        Err(_) => ArmError::Api {
            status,
            code: reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown")
                .replace(' ', ""),
            message: body.trim().to_string(),
            retry_after: None,
        },
    }
}
