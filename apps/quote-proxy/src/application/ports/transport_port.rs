//! Transport Port (Driven Port)
//!
//! Performs one outbound HTTP request. The adapter is responsible for the
//! timeout; a timed-out request is reported as [`TransportError::Timeout`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::endpoint::HttpMethod;

/// Upstream call failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Upstream answered with a non-success status.
    #[error("upstream returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Upstream body or reason phrase.
        message: String,
    },

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// No response within the request timeout.
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    /// Response body could not be read.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    /// Request could not be built (bad URL or header).
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

/// A fully built outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL including query string.
    pub url: String,
    /// Headers in application order.
    pub headers: Vec<(String, String)>,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Upstream response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed body. Non-JSON bodies arrive as a JSON string.
    pub body: Value,
}

impl TransportResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Port for outbound HTTP.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportPort: Send + Sync {
    /// Send `request` and return the upstream status and body.
    ///
    /// Non-success statuses are returned as responses, not errors.
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}
