//! Gateway configuration container and startup-time validation.
//!
//! [`GatewayConfig`] aggregates every configuration dimension (routes,
//! limiter, breakers, aggregation, auth keys) and exposes a single
//! [`validate()`](GatewayConfig::validate) method that checks all structural
//! invariants *before* any runtime resources are allocated.
//!
//! Every struct here is `serde`-deserializable so the whole tree can be
//! loaded with [`crate::config::load_config`].

use super::error::GatewayError;
use super::router::RouteConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// RateLimitConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Token-bucket parameters for the global bucket and the per-client buckets.
///
/// Per-client buckets use `client_capacity` / `client_refill_per_sec` when
/// set and the gateway-wide values otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum number of tokens a bucket holds (burst size).
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// Burst size of each per-client bucket.
    pub client_capacity: Option<u32>,
    /// Refill rate of each per-client bucket.
    pub client_refill_per_sec: Option<f64>,
    /// Per-client buckets untouched for this long are evicted.
    pub client_idle_ttl_secs: u64,
    /// How often the eviction sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 200,
            refill_per_sec: 100.0,
            client_capacity: None,
            client_refill_per_sec: None,
            client_idle_ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

impl RateLimitConfig {
    /// Create a new rate-limit config with default eviction settings.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            ..Default::default()
        }
    }

    /// Builder: give each client its own, usually tighter, bucket.
    pub fn with_client_limit(mut self, capacity: u32, refill_per_sec: f64) -> Self {
        self.client_capacity = Some(capacity);
        self.client_refill_per_sec = Some(refill_per_sec);
        self
    }

    /// Effective per-client burst size.
    pub fn effective_client_capacity(&self) -> u32 {
        self.client_capacity.unwrap_or(self.capacity)
    }

    /// Effective per-client refill rate.
    pub fn effective_client_refill_per_sec(&self) -> f64 {
        self.client_refill_per_sec.unwrap_or(self.refill_per_sec)
    }

    fn validate(&self) -> Result<(), GatewayError> {
        let positive = |rate: f64| rate.is_finite() && rate > 0.0;
        if self.capacity == 0 || !positive(self.refill_per_sec) {
            return Err(GatewayError::InvalidRateLimit);
        }
        if self.effective_client_capacity() == 0
            || !positive(self.effective_client_refill_per_sec())
        {
            return Err(GatewayError::InvalidRateLimit);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CircuitBreakerConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for one backend's circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Number of successes in half-open needed to close the circuit.
    pub success_threshold: u32,
    /// Time the circuit stays open before trial calls are admitted.
    pub open_timeout_ms: u64,
    /// Maximum number of concurrent trial calls while half-open.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout_ms: 30_000,
            half_open_max_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold.
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the open timeout.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the half-open max requests.
    pub fn with_half_open_max_requests(mut self, max: u32) -> Self {
        self.half_open_max_requests = max;
        self
    }

    /// The open timeout as a [`Duration`].
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    fn validate(&self, name: &str) -> Result<(), GatewayError> {
        let invalid = |what: &str| {
            Err(GatewayError::InvalidBreakerThreshold(
                name.to_string(),
                format!("{what} must be >= 1"),
            ))
        };
        if self.failure_threshold == 0 {
            return invalid("failure_threshold");
        }
        if self.success_threshold == 0 {
            return invalid("success_threshold");
        }
        if self.half_open_max_requests == 0 {
            return invalid("half_open_max_requests");
        }
        if self.open_timeout_ms == 0 {
            return Err(GatewayError::InvalidTimeout("circuit breaker open timeout"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AggregationConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Settings for the fan-out aggregation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Path of the aggregation endpoint (POST only).
    pub path: String,
    /// Default timeout applied to every sub-request.
    pub sub_request_timeout_ms: u64,
    /// Largest aggregation request body, and largest sub-response body,
    /// the gateway buffers.
    pub max_body_bytes: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            path: "/v1/aggregate".to_string(),
            sub_request_timeout_ms: 5_000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GatewayConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level gateway configuration.
///
/// Call [`validate()`](Self::validate) to check all structural invariants
/// before passing this config to the gateway runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Unique identifier for this gateway instance.
    pub id: String,
    /// Socket address the HTTP listener binds to.
    pub listen_addr: String,
    /// Deadline for one inbound request, in milliseconds (must be > 0).
    pub request_timeout_ms: u64,
    /// Route table in registration order.
    pub routes: Vec<RouteConfig>,
    /// Global and per-client token-bucket parameters.
    pub rate_limit: RateLimitConfig,
    /// Breaker settings applied to every backend without an override.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-backend breaker overrides, keyed by backend name.
    pub circuit_breakers: HashMap<String, CircuitBreakerConfig>,
    /// Aggregation endpoint settings.
    pub aggregation: AggregationConfig,
    /// Valid API keys.  When empty, authentication is disabled.
    pub api_keys: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            id: "tollgate".to_string(),
            listen_addr: "0.0.0.0:3000".to_string(),
            request_timeout_ms: 30_000,
            routes: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            circuit_breakers: HashMap::new(),
            aggregation: AggregationConfig::default(),
            api_keys: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Construct a config with only a gateway id; everything else defaults.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Builder: add a route.
    pub fn with_route(mut self, route: RouteConfig) -> Self {
        self.routes.push(route);
        self
    }

    /// Builder: set the per-request deadline.
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Builder: set the rate-limit config.
    pub fn with_rate_limit(mut self, rl: RateLimitConfig) -> Self {
        self.rate_limit = rl;
        self
    }

    /// Builder: set the default breaker config.
    pub fn with_circuit_breaker(mut self, cb: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = cb;
        self
    }

    /// Builder: override the breaker config for one backend.
    pub fn with_backend_circuit_breaker(
        mut self,
        backend: impl Into<String>,
        cb: CircuitBreakerConfig,
    ) -> Self {
        self.circuit_breakers.insert(backend.into(), cb);
        self
    }

    /// Builder: set the aggregation config.
    pub fn with_aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Builder: set the accepted API keys.
    pub fn with_api_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.api_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Effective breaker config for `backend`.
    pub fn breaker_config_for(&self, backend: &str) -> &CircuitBreakerConfig {
        self.circuit_breakers
            .get(backend)
            .unwrap_or(&self.circuit_breaker)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Validation
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate all structural invariants of this configuration.
    ///
    /// Returns the *first* detected [`GatewayError`].  Checks performed (in
    /// order):
    /// 1. Gateway id is non-empty.
    /// 2. At least one route is defined.
    /// 3. Global `request_timeout_ms` is non-zero.
    /// 4. Each route passes its own check; no two routes share a prefix.
    /// 5. Rate-limit parameters are positive.
    /// 6. The default breaker and every override have positive thresholds.
    /// 7. Aggregation path starts with `/`; its timeout and body limit are
    ///    non-zero.
    pub fn validate(&self) -> Result<(), GatewayError> {
        // ── 1. Gateway id ────────────────────────────────────────────────────
        if self.id.trim().is_empty() {
            return Err(GatewayError::EmptyGatewayId);
        }

        // ── 2. At least one route ────────────────────────────────────────────
        if self.routes.is_empty() {
            return Err(GatewayError::NoRoutes);
        }

        // ── 3. Global timeout is non-zero ────────────────────────────────────
        if self.request_timeout_ms == 0 {
            return Err(GatewayError::InvalidTimeout("request timeout"));
        }

        // ── 4. Routes ────────────────────────────────────────────────────────
        let mut prefixes: HashSet<&str> = HashSet::new();
        for route in &self.routes {
            route.validate()?;
            if !prefixes.insert(route.prefix.as_str()) {
                return Err(GatewayError::DuplicateRoute(route.prefix.clone()));
            }
        }

        // ── 5. Rate limit ────────────────────────────────────────────────────
        self.rate_limit.validate()?;

        // ── 6. Breakers ──────────────────────────────────────────────────────
        self.circuit_breaker.validate("default")?;
        for (backend, cb) in &self.circuit_breakers {
            cb.validate(backend)?;
        }

        // ── 7. Aggregation ───────────────────────────────────────────────────
        if !self.aggregation.path.starts_with('/') {
            return Err(GatewayError::InvalidAggregationPath(
                self.aggregation.path.clone(),
            ));
        }
        if self.aggregation.sub_request_timeout_ms == 0 {
            return Err(GatewayError::InvalidTimeout("aggregation sub-request timeout"));
        }
        if self.aggregation.max_body_bytes == 0 {
            return Err(GatewayError::InvalidBodyLimit);
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
