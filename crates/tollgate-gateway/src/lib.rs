//! `tollgate-gateway`: Tollgate API gateway runtime.
//!
//! This crate provides the concrete implementations of the gateway kernel
//! contracts defined in `tollgate-kernel::gateway`:
//!
//! | Kernel contract | Implementation |
//! |----------------|----------------|
//! | [`GatewayRouter`](gateway::GatewayRouter) | [`router::PrefixRouter`] |
//! | [`GatewayFilter`](gateway::GatewayFilter) | [`filter::LoggingFilter`], [`filter::ApiKeyFilter`], [`filter::RateLimitFilter`], [`filter::CircuitBreakerFilter`] |
//! | [`Endpoint`](gateway::Endpoint) | [`backend::ProxyEndpoint`], [`backend::AggregateEndpoint`] |
//!
//! The admission engines shared by the filters and the aggregator live in
//! [`middleware`]: the two-level [`middleware::RateLimiter`] and the
//! per-backend [`middleware::CircuitBreakerRegistry`].
//!
//! The [`server::GatewayServer`] wires everything together into an axum HTTP
//! service.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use tollgate_gateway::server::GatewayServer;
//! use tollgate_kernel::gateway::{GatewayConfig, RateLimitConfig, RouteConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = GatewayConfig::new("edge")
//!         .with_route(RouteConfig::new("/users", "http://users.internal:8080"))
//!         .with_route(
//!             RouteConfig::new("/users/admin", "http://admin.internal:8080")
//!                 .with_backend("admin")
//!                 .with_timeout_ms(2_000),
//!         )
//!         .with_rate_limit(RateLimitConfig::new(200, 100.0));
//!
//!     GatewayServer::new(config).start().await.unwrap();
//! }
//! ```

pub mod backend;
pub mod error;
pub mod filter;
pub mod middleware;
pub mod router;
pub mod server;

// Re-export the kernel gateway types for convenience.
pub use tollgate_kernel::gateway;
