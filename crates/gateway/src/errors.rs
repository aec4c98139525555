//! Error types for the gateway's upstream layer.
//!
//! The taxonomy keeps two client-visible categories apart: "the system is
//! temporarily unavailable, retry later" (circuit open, queue pressure,
//! exhausted retries) and "the upstream answered and said no" (4xx passed
//! through verbatim). Conflating them breaks client retry logic.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors from a logical upstream call.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The circuit breaker is open; no network attempt was made.
    #[error("Upstream circuit is open")]
    CircuitOpen,

    /// The bulkhead queue is at capacity.
    #[error("Upstream queue is full")]
    QueueFull,

    /// A queued call was not dispatched before its deadline.
    #[error("Timed out waiting for an upstream slot")]
    QueueTimeout,

    /// The upstream answered with a 4xx. Passed through verbatim.
    #[error("Upstream returned status {status}")]
    UpstreamStatus {
        status: u16,
        body: serde_json::Value,
    },

    /// Network failure, timeout, or 5xx after retries were exhausted.
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    /// The client itself could not be constructed.
    #[error("Gateway configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether the caller should retry after a short delay.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen | Self::QueueFull | Self::QueueTimeout | Self::Unavailable(_)
        )
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            // 4xx from the upstream goes back to the caller untouched.
            Self::UpstreamStatus { status, body } => {
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, Json(body)).into_response()
            }
            Self::Config(ref msg) => {
                tracing::error!(target: "gateway.errors", error = %msg, "Configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": {
                            "code": "internal_error",
                            "message": "An internal error occurred",
                        }
                    })),
                )
                    .into_response()
            }
            ref err => {
                let body = Json(json!({
                    "error": {
                        "code": "upstream_unavailable",
                        "message": err.to_string(),
                    }
                }));
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [("retry-after", "1")],
                    body,
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_family_is_retriable() {
        assert!(GatewayError::CircuitOpen.is_retriable());
        assert!(GatewayError::QueueFull.is_retriable());
        assert!(GatewayError::QueueTimeout.is_retriable());
        assert!(GatewayError::Unavailable("boom".to_string()).is_retriable());
        assert!(!GatewayError::UpstreamStatus {
            status: 401,
            body: serde_json::Value::Null
        }
        .is_retriable());
    }

    #[test]
    fn test_circuit_open_maps_to_503_with_retry_hint() {
        let response = GatewayError::CircuitOpen.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("retry-after").unwrap(),
            &"1".parse::<axum::http::HeaderValue>().unwrap()
        );
    }

    #[test]
    fn test_upstream_status_passes_through() {
        let response = GatewayError::UpstreamStatus {
            status: 409,
            body: json!({"reason": "conflict"}),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
