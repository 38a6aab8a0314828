//! Gateway kernel contract.
//!
//! This module defines the *trait interfaces and configuration types* for the
//! Tollgate request-protection pipeline.  No concrete implementations live
//! here; those belong in `tollgate-gateway`.
//!
//! # Architecture mapping
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              tollgate-kernel  (this module)                 │
//! │  GatewayRouter trait     ServiceDiscovery trait             │
//! │  GatewayFilter / Endpoint traits + Next continuation        │
//! │  GatewayConfig + validate()                                 │
//! │  GatewayRequest/Response/Context  GatewayError              │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │  depends on
//! ┌──────────────────────────▼──────────────────────────────────┐
//! │              tollgate-gateway  (runtime crate)              │
//! │  PrefixRouter: impl GatewayRouter                           │
//! │  RateLimiter / CircuitBreakerRegistry                       │
//! │  ApiKeyFilter / RateLimitFilter / CircuitBreakerFilter      │
//! │  ForwardingProxy (reqwest, streaming)   Aggregator          │
//! │  GatewayServer  (axum HTTP server)                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust
//! use tollgate_kernel::gateway::{GatewayConfig, RateLimitConfig, RouteConfig};
//!
//! let config = GatewayConfig::new("edge")
//!     .with_route(RouteConfig::new("/users", "http://users.internal:8080"))
//!     .with_route(
//!         RouteConfig::new("/users/admin", "http://admin.internal:8080")
//!             .with_backend("admin"),
//!     )
//!     .with_rate_limit(RateLimitConfig::new(100, 50.0));
//!
//! config.validate().expect("gateway config is valid");
//! ```

pub mod discovery;
pub mod error;
pub mod filter;
pub mod router;
pub mod validation;

// ── Flat re-exports ────────────────────────────────────────────────────────

pub use discovery::{ServiceDiscovery, StaticServiceDiscovery};
pub use error::GatewayError;
pub use filter::{Endpoint, FilterOrder, GatewayFilter, Next};
pub use router::{GatewayRouter, RouteConfig};
pub use validation::{AggregationConfig, CircuitBreakerConfig, GatewayConfig, RateLimitConfig};

// types module is pub so implementors in tollgate-gateway can use the structs
pub mod types;
pub use types::{
    BodyStream, BodyTooLarge, BoxError, GatewayBody, GatewayContext, GatewayRequest, GatewayResponse,
    HttpMethod, RouteMatch,
};
