//! Gateway error types for `tollgate-kernel`.
//!
//! [`GatewayError`] covers every failure mode that can be detected at
//! *definition time* (empty ids, duplicate prefixes, malformed targets,
//! nonsensical thresholds) before any network I/O occurs.  Runtime failures
//! (connection refused, upstream timeout, open circuit, …) belong in the
//! gateway implementation crate (`tollgate-gateway`).

use thiserror::Error;

/// Configuration error type for the gateway kernel contract.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum GatewayError {
    // ── Identity ────────────────────────────────────────────────────────────
    /// The gateway configuration `id` field is empty or whitespace-only.
    #[error("gateway id cannot be empty")]
    EmptyGatewayId,

    // ── Routes ───────────────────────────────────────────────────────────────
    /// The configuration contains no routes.
    #[error("gateway config must define at least one route")]
    NoRoutes,

    /// A route with this prefix has already been registered.
    #[error("route prefix '{0}' is already registered")]
    DuplicateRoute(String),

    /// A route prefix is syntactically invalid.
    #[error("route prefix '{0}' is invalid: {1}")]
    InvalidPrefix(String, String),

    /// A route target base URL is syntactically invalid.
    #[error("route '{0}' has an invalid target URL: {1}")]
    InvalidTarget(String, String),

    /// A backend name is empty or whitespace-only.
    #[error("route '{0}' has an empty backend name")]
    EmptyBackendName(String),

    // ── Timeouts / rate-limits ────────────────────────────────────────────────
    /// A timeout is zero, which would reject every request.
    #[error("{0} must be greater than 0 ms")]
    InvalidTimeout(&'static str),

    /// Bucket capacity is zero or the refill rate is not a positive number.
    #[error("rate limit capacity must be >= 1 and refill rate must be > 0")]
    InvalidRateLimit,

    // ── Circuit breaker ───────────────────────────────────────────────────────
    /// A breaker threshold is zero.
    #[error("circuit breaker '{0}' has an invalid threshold: {1}")]
    InvalidBreakerThreshold(String, String),

    // ── Aggregation ───────────────────────────────────────────────────────────
    /// The aggregation endpoint path does not start with `/`.
    #[error("aggregation path '{0}' must start with '/'")]
    InvalidAggregationPath(String),

    /// The aggregation body limit is zero.
    #[error("aggregation max_body_bytes must be greater than 0")]
    InvalidBodyLimit,
}
