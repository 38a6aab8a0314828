//! Rate-limit stage backed by the shared two-level [`RateLimiter`].
//!
//! Rejections short-circuit with `429 Too Many Requests` and a
//! `Retry-After` hint; admitted responses carry `x-ratelimit-limit`.

use crate::error::GatewayError;
use crate::middleware::{RateLimiter, client_key};
use async_trait::async_trait;
use std::sync::Arc;
use tollgate_kernel::gateway::{FilterOrder, GatewayContext, GatewayFilter, GatewayResponse, Next};
use tracing::warn;

pub struct RateLimitFilter {
    limiter: Arc<RateLimiter>,
}

impl RateLimitFilter {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl GatewayFilter for RateLimitFilter {
    fn name(&self) -> &str {
        "rate-limit"
    }

    fn order(&self) -> FilterOrder {
        FilterOrder::RATE_LIMIT
    }

    async fn handle(&self, ctx: GatewayContext, next: Next<'_>) -> GatewayResponse {
        let client = client_key(&ctx.request);
        if !self.limiter.allow(&client) {
            warn!(
                request_id = %ctx.request.id,
                client = %client,
                "rate limit exceeded"
            );
            return GatewayError::RateLimited {
                client,
                retry_after: self.limiter.retry_after(),
            }
            .into_gateway_response();
        }

        next.run(ctx)
            .await
            .with_header("x-ratelimit-limit", self.limiter.client_capacity().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tollgate_kernel::gateway::{Endpoint, GatewayRequest, HttpMethod};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Endpoint for Counting {
        async fn call(&self, _ctx: GatewayContext) -> GatewayResponse {
            self.0.fetch_add(1, Ordering::SeqCst);
            GatewayResponse::new(200, "svc")
        }
    }

    fn ctx(ip: &str) -> GatewayContext {
        GatewayContext::new(GatewayRequest::new("r", "/users", HttpMethod::Get).with_header("x-forwarded-for", ip))
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_request_is_throttled_until_refill() {
        let filters: Vec<Arc<dyn GatewayFilter>> =
            vec![Arc::new(RateLimitFilter::new(Arc::new(RateLimiter::new(5, 1.0))))];
        let endpoint = Counting::default();

        for _ in 0..5 {
            let resp = Next::new(&filters, &endpoint).run(ctx("203.0.113.1")).await;
            assert_eq!(resp.status, 200);
            assert_eq!(resp.headers.get("x-ratelimit-limit").unwrap(), "5");
        }

        let throttled = Next::new(&filters, &endpoint).run(ctx("203.0.113.1")).await;
        assert_eq!(throttled.status, 429);
        assert_eq!(throttled.headers.get("retry-after").unwrap(), "1");
        assert_eq!(endpoint.0.load(Ordering::SeqCst), 5);

        tokio::time::advance(Duration::from_secs(1)).await;
        let resp = Next::new(&filters, &endpoint).run(ctx("203.0.113.1")).await;
        assert_eq!(resp.status, 200);
    }
    #[tokio::test]
    async fn vanishing_refill_rate_still_answers_429() {
        let filters: Vec<Arc<dyn GatewayFilter>> =
            vec![Arc::new(RateLimitFilter::new(Arc::new(RateLimiter::new(1, 1e-20))))];
        let endpoint = Counting::default();

        assert_eq!(Next::new(&filters, &endpoint).run(ctx("203.0.113.1")).await.status, 200);
        let throttled = Next::new(&filters, &endpoint).run(ctx("203.0.113.1")).await;
        assert_eq!(throttled.status, 429);
        assert!(throttled.headers.contains_key("retry-after"));
    }
}
