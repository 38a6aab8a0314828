//! Gateway router trait and route configuration.
//!
//! The [`GatewayRouter`] trait is the single kernel-level abstraction for
//! request routing.  Implementations (e.g. the prefix router in
//! `tollgate-gateway`) receive their routes once at startup and are read-only
//! afterwards.

use super::error::GatewayError;
use super::types::RouteMatch;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Route configuration
// ─────────────────────────────────────────────────────────────────────────────

/// A single routing rule mapping a literal path prefix to a backend.
///
/// ```text
/// /users         → http://users.internal:8080
/// /users/admin   → http://admin.internal:8080   (wins for /users/admin/1)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Literal path prefix.  Must begin with `/`.
    pub prefix: String,
    /// Base URL the remaining path is appended to.
    pub target: String,
    /// Backend name used to key the circuit breaker.  Defaults to `target`.
    #[serde(default)]
    pub backend: Option<String>,
    /// Per-route downstream timeout in milliseconds.  `None` means "use the
    /// gateway default".
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RouteConfig {
    /// Create a minimal route with just a prefix and a target base URL.
    pub fn new(prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            target: target.into(),
            backend: None,
            timeout_ms: None,
        }
    }

    /// Builder: name the backend explicitly.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Builder: set a per-route timeout.
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Name of the backend this route targets.
    pub fn backend_name(&self) -> &str {
        self.backend.as_deref().unwrap_or(&self.target)
    }

    /// Basic sanity checks run during [`GatewayConfig::validate()`](super::validation::GatewayConfig::validate).
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        if !self.prefix.starts_with('/') {
            return Err(GatewayError::InvalidPrefix(
                self.prefix.clone(),
                "prefix must start with '/'".to_string(),
            ));
        }
        if self.prefix.contains('?') {
            return Err(GatewayError::InvalidPrefix(
                self.prefix.clone(),
                "prefix cannot contain a query string".to_string(),
            ));
        }
        if self.target.trim().is_empty() {
            return Err(GatewayError::InvalidTarget(
                self.prefix.clone(),
                "target URL cannot be empty".to_string(),
            ));
        }
        if !self.target.starts_with("http://") && !self.target.starts_with("https://") {
            return Err(GatewayError::InvalidTarget(
                self.prefix.clone(),
                format!("target '{}' must start with http:// or https://", self.target),
            ));
        }
        if self.backend.as_deref().is_some_and(|b| b.trim().is_empty()) {
            return Err(GatewayError::EmptyBackendName(self.prefix.clone()));
        }
        if self.timeout_ms == Some(0) {
            return Err(GatewayError::InvalidTimeout("route timeout"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router trait
// ─────────────────────────────────────────────────────────────────────────────

/// Kernel contract for request routing.
///
/// The trait is intentionally synchronous: route lookups are pure functions
/// of the route table, with no I/O.
pub trait GatewayRouter: Send + Sync {
    /// Register a new route at startup.  Returns
    /// [`GatewayError::DuplicateRoute`] if the prefix is already registered.
    fn register(&mut self, route: RouteConfig) -> Result<(), GatewayError>;

    /// Resolve a request path (query string allowed) to the route with the
    /// longest matching prefix.  Returns `None` when no prefix matches.
    fn resolve(&self, path: &str) -> Option<RouteMatch>;

    /// Return all registered routes in registration order.
    fn routes(&self) -> Vec<&RouteConfig>;
}
