//! Error types for Switchyard
//!
//! The taxonomy is closed: every failure the router can surface maps to
//! exactly one of these kinds. All errors implement `IntoResponse` for
//! Axum handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
///
/// Variants are cloneable on purpose: the cache's single-flight latch
/// broadcasts the leader's result (success or failure) to every coalesced
/// waiter, so failures must be shareable by value.
#[derive(Error, Debug, Clone)]
pub enum RouteError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Path rejected: {path}: {reason}")]
    Rejected { path: String, reason: String },

    #[error("Endpoint '{endpoint}' has an open circuit breaker")]
    EndpointOpen { endpoint: String },

    #[error("Request to {endpoint} timed out after {timeout_ms} ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("Endpoint {endpoint} is at capacity (HTTP 429)")]
    Capacity { endpoint: String },

    #[error("Endpoint {endpoint} returned HTTP {status}: {detail}")]
    Upstream5xx {
        endpoint: String,
        status: u16,
        detail: String,
    },

    #[error("Endpoint {endpoint} rejected the request with HTTP {status}: {detail}")]
    Upstream4xx {
        endpoint: String,
        status: u16,
        detail: String,
    },

    #[error("Network error talking to {endpoint}: {detail}")]
    Network { endpoint: String, detail: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RouteError {
    /// Stable kind tag for logs, metrics labels, and structured responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Rejected { .. } => "rejected",
            Self::EndpointOpen { .. } => "endpoint_open",
            Self::Timeout { .. } => "timeout",
            Self::Capacity { .. } => "capacity",
            Self::Upstream5xx { .. } => "upstream_5xx",
            Self::Upstream4xx { .. } => "upstream_4xx",
            Self::Network { .. } => "network",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
        }
    }

    /// Whether this failure counts against the endpoint's circuit breaker.
    ///
    /// Only timeouts, capacity (429), 5xx, and connection-level errors
    /// count. Other 4xx responses are the caller's fault, not the
    /// endpoint's.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Capacity { .. }
                | Self::Upstream5xx { .. }
                | Self::Network { .. }
        )
    }

    /// Ranking used to pick the most informative error when every
    /// candidate fails: timeout > capacity > 5xx > network > 4xx > rest.
    pub fn informativeness(&self) -> u8 {
        match self {
            Self::Timeout { .. } => 6,
            Self::Capacity { .. } => 5,
            Self::Upstream5xx { .. } => 4,
            Self::Network { .. } => 3,
            Self::Upstream4xx { .. } => 2,
            _ => 1,
        }
    }

    /// HTTP status this error maps to on the serving surface.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Rejected { .. } => StatusCode::BAD_REQUEST,
            Self::EndpointOpen { .. } => StatusCode::CONFLICT,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Capacity { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream5xx { .. } | Self::Upstream4xx { .. } | Self::Network { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type RouteResult<T> = Result<T, RouteError>;
