//! Gateway runtime error types

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tollgate_kernel::gateway::{GatewayError as ConfigValidationError, GatewayResponse};

/// Gateway-level errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no route matches path '{0}'")]
    RouteNotFound(String),

    #[error("rate limit exceeded for client '{client}'")]
    RateLimited { client: String, retry_after: Duration },

    #[error("circuit open for backend '{backend}'")]
    CircuitOpen { backend: String, retry_after: Duration },

    #[error("backend '{backend}' unreachable: {source}")]
    Network {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("backend '{backend}' timed out")]
    Timeout { backend: String },

    #[error("backend '{backend}' responded with status {status}")]
    Upstream { backend: String, status: u16 },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method '{0}' is not supported")]
    MethodNotAllowed(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Classify a reqwest failure for `backend`.
    pub fn from_reqwest(backend: impl Into<String>, err: reqwest::Error) -> Self {
        let backend = backend.into();
        if err.is_timeout() {
            GatewayError::Timeout { backend }
        } else {
            GatewayError::Network {
                backend,
                source: err,
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Network { .. } | GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Config(_) | GatewayError::Io(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            GatewayError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::Network { .. } => "BAD_GATEWAY",
            GatewayError::Timeout { .. } => "GATEWAY_TIMEOUT",
            GatewayError::Upstream { .. } => "UPSTREAM_ERROR",
            GatewayError::Unauthorized(_) => "UNAUTHORIZED",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            GatewayError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            GatewayError::Config(_) => "INVALID_CONFIG",
            GatewayError::Io(_) | GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Seconds a client should wait before retrying, rounded up, at least 1.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after, .. }
            | GatewayError::CircuitOpen { retry_after, .. } => {
                Some(retry_after.as_secs_f64().ceil().max(1.0) as u64)
            }
            _ => None,
        }
    }

    fn body(&self) -> serde_json::Value {
        json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }

    /// Render as a chain response with the JSON error envelope.
    pub fn into_gateway_response(self) -> GatewayResponse {
        let mut resp = GatewayResponse::json(self.status().as_u16(), &self.body());
        if let Some(secs) = self.retry_after_secs() {
            resp = resp.with_header(RETRY_AFTER, secs.to_string());
        }
        match self {
            GatewayError::CircuitOpen { backend, .. }
            | GatewayError::Network { backend, .. }
            | GatewayError::Timeout { backend }
            | GatewayError::Upstream { backend, .. } => resp.backend_id = backend,
            _ => {}
        }
        resp
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after_secs();
        let mut response = (self.status(), Json(self.body())).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_failure_kind() {
        assert_eq!(GatewayError::RouteNotFound("/x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::Timeout { backend: "b".into() }.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::InvalidRequest("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::PayloadTooLarge(1024).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn retry_after_rounds_up_and_never_drops_below_one() {
        let fast = GatewayError::RateLimited {
            client: "c".into(),
            retry_after: Duration::from_millis(10),
        };
        assert_eq!(fast.retry_after_secs(), Some(1));

        let slow = GatewayError::CircuitOpen {
            backend: "b".into(),
            retry_after: Duration::from_millis(2_100),
        };
        assert_eq!(slow.retry_after_secs(), Some(3));
        assert_eq!(GatewayError::Internal("x".into()).retry_after_secs(), None);
    }

    #[tokio::test]
    async fn gateway_response_carries_error_envelope() {
        let resp = GatewayError::CircuitOpen {
            backend: "users".into(),
            retry_after: Duration::from_secs(5),
        }
        .into_gateway_response();

        assert_eq!(resp.status, 503);
        assert_eq!(resp.backend_id, "users");
        assert_eq!(resp.headers.get(RETRY_AFTER).unwrap(), "5");

        let body: serde_json::Value =
            serde_json::from_slice(&resp.body.collect().await.unwrap()).unwrap();
        assert_eq!(body["error"]["code"], "CIRCUIT_OPEN");
    }
}
