//! Filter module.

mod auth;
mod circuit_breaker;
mod logger;
mod rate_limit;

pub use auth::ApiKeyFilter;
pub use circuit_breaker::CircuitBreakerFilter;
pub use logger::LoggingFilter;
pub use rate_limit::RateLimitFilter;

use std::sync::Arc;
use tollgate_kernel::gateway::{Endpoint, GatewayContext, GatewayFilter, GatewayResponse, Next};

/// Ordered list of boxed filters executed as a pipeline.
///
/// Filters are sorted by [`FilterOrder`](tollgate_kernel::gateway::FilterOrder)
/// in ascending order (lowest value runs first on the request path and
/// sees the response last).  The sort is stable, so equal orders keep their
/// registration order.
pub struct FilterPipeline {
    filters: Vec<Arc<dyn GatewayFilter>>,
}

impl FilterPipeline {
    /// Build a pipeline from a list of filters, sorted by their declared order.
    pub fn new(mut filters: Vec<Arc<dyn GatewayFilter>>) -> Self {
        filters.sort_by_key(|f| f.order());
        Self { filters }
    }

    /// Filter names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run the request through every filter and then `endpoint`, unless a
    /// filter short-circuits.
    pub async fn run(&self, ctx: GatewayContext, endpoint: &dyn Endpoint) -> GatewayResponse {
        Next::new(&self.filters, endpoint).run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{CircuitBreakerRegistry, RateLimiter};
    use async_trait::async_trait;
    use tollgate_kernel::gateway::{CircuitBreakerConfig, GatewayRequest, HttpMethod};

    struct Ok200;

    #[async_trait]
    impl Endpoint for Ok200 {
        async fn call(&self, _ctx: GatewayContext) -> GatewayResponse {
            GatewayResponse::new(200, "svc")
        }
    }

    #[test]
    fn filters_are_sorted_into_protective_order() {
        let pipeline = FilterPipeline::new(vec![
            Arc::new(CircuitBreakerFilter::new(Arc::new(CircuitBreakerRegistry::new(
                CircuitBreakerConfig::default(),
            )))),
            Arc::new(RateLimitFilter::new(Arc::new(RateLimiter::new(10, 1.0)))),
            Arc::new(ApiKeyFilter::new(["k"])),
            Arc::new(LoggingFilter::new()),
        ]);
        assert_eq!(
            pipeline.names(),
            vec!["access-log", "api-key-auth", "rate-limit", "circuit-breaker"]
        );
    }

    #[tokio::test]
    async fn auth_rejection_happens_before_rate_limiting() {
        let limiter = Arc::new(RateLimiter::new(1, 1.0));
        let pipeline = FilterPipeline::new(vec![
            Arc::new(RateLimitFilter::new(limiter.clone())),
            Arc::new(ApiKeyFilter::new(["k"])),
        ]);

        let unauthenticated = GatewayContext::new(GatewayRequest::new("r1", "/", HttpMethod::Get));
        assert_eq!(pipeline.run(unauthenticated, &Ok200).await.status, 401);
        // The rejected request never reached the limiter.
        assert_eq!(limiter.tracked_clients(), 0);

        let authenticated = GatewayContext::new(
            GatewayRequest::new("r2", "/", HttpMethod::Get).with_header("x-api-key", "k"),
        );
        assert_eq!(pipeline.run(authenticated, &Ok200).await.status, 200);
    }
}
