//! Profile-lookup errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while resolving a profile through the endpoint pool.
///
/// A 404 is deliberately NOT represented here: "not found" is a valid lookup
/// verdict, not a failure (see `Verdict::NotFound`).
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum LookupError {
    /// The error-cooldown breaker is open; no request was attempted.
    #[error("lookup breaker open, retry in {retry_in_secs}s")]
    Cooldown { retry_in_secs: u64 },

    /// Timeout or connection failure with no endpoint-specific blame.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// Failure attributable to the specific endpoint or proxy in use.
    /// Triggers a health-score penalty and same-request failover.
    #[error("endpoint {endpoint} failed: {message}")]
    Endpoint { endpoint: String, message: String },

    /// HTTP 200 with an unparseable body.
    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    /// A status code outside the classified set (200, 404, 403, 429).
    /// `message` carries the upstream error text when the body had one.
    #[error("endpoint {endpoint} returned status {status}: {message}")]
    UnexpectedStatus { endpoint: String, status: u16, message: String },

    /// The configured endpoint pool is empty.
    #[error("no lookup endpoints configured")]
    NoEndpoints,
}

impl LookupError {
    /// Whether this failure blames the endpoint/proxy that served the request.
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            LookupError::Endpoint { .. } | LookupError::UnexpectedStatus { .. }
        )
    }
}
