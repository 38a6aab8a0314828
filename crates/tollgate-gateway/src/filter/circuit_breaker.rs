//! Circuit-breaker stage.
//!
//! Guards the rest of the chain with the breaker of the backend chosen by
//! routing.  Requests without a route match (unrouted paths, aggregation)
//! pass straight through; the aggregator guards each sub-call itself.

use crate::error::GatewayError;
use crate::middleware::CircuitBreakerRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tollgate_kernel::gateway::{FilterOrder, GatewayContext, GatewayFilter, GatewayResponse, Next};
use tracing::warn;

pub struct CircuitBreakerFilter {
    breakers: Arc<CircuitBreakerRegistry>,
}

impl CircuitBreakerFilter {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { breakers }
    }
}

#[async_trait]
impl GatewayFilter for CircuitBreakerFilter {
    fn name(&self) -> &str {
        "circuit-breaker"
    }

    fn order(&self) -> FilterOrder {
        FilterOrder::CIRCUIT_BREAKER
    }

    async fn handle(&self, ctx: GatewayContext, next: Next<'_>) -> GatewayResponse {
        let Some(backend) = ctx.route_match.as_ref().map(|m| m.backend.clone()) else {
            return next.run(ctx).await;
        };
        let request_id = ctx.request.id.clone();

        let breaker = self.breakers.get(&backend);
        match breaker.execute(|| next.run(ctx)).await {
            Ok(resp) => resp,
            Err(open) => {
                warn!(request_id = %request_id, backend = %backend, "circuit open, request rejected");
                GatewayError::CircuitOpen {
                    backend: open.backend,
                    retry_after: open.retry_after,
                }
                .into_gateway_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tollgate_kernel::gateway::{
        CircuitBreakerConfig, Endpoint, GatewayRequest, HttpMethod, RouteMatch,
    };

    /// Backend stub answering with a fixed status.
    struct Fixed {
        status: u16,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Endpoint for Fixed {
        async fn call(&self, _ctx: GatewayContext) -> GatewayResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            GatewayResponse::new(self.status, "users")
        }
    }

    fn routed_ctx() -> GatewayContext {
        let mut ctx = GatewayContext::new(GatewayRequest::new("r", "/users/1", HttpMethod::Get));
        ctx.route_match = Some(RouteMatch {
            prefix: "/users".into(),
            backend: "users".into(),
            target: "http://users".into(),
            remaining_path: "/1".into(),
            timeout_ms: None,
        });
        ctx
    }

    fn filters(threshold: u32) -> Vec<Arc<dyn GatewayFilter>> {
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_open_timeout(Duration::from_secs(30)),
        );
        vec![Arc::new(CircuitBreakerFilter::new(Arc::new(registry)))]
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_call_after_three_failures_never_reaches_backend() {
        let filters = filters(3);
        let backend = Fixed { status: 500, calls: AtomicUsize::new(0) };

        for _ in 0..3 {
            let resp = Next::new(&filters, &backend).run(routed_ctx()).await;
            assert_eq!(resp.status, 500);
        }

        let rejected = Next::new(&filters, &backend).run(routed_ctx()).await;
        assert_eq!(rejected.status, 503);
        assert_eq!(rejected.headers.get("retry-after").unwrap(), "30");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unrouted_requests_bypass_the_breaker() {
        let filters = filters(1);
        let backend = Fixed { status: 500, calls: AtomicUsize::new(0) };
        let ctx = || GatewayContext::new(GatewayRequest::new("r", "/v1/aggregate", HttpMethod::Post));

        for _ in 0..3 {
            assert_eq!(Next::new(&filters, &backend).run(ctx()).await.status, 500);
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }
}
