//! Gateway filter trait and middleware-chain continuation.
//!
//! The chain is an ordered list of [`GatewayFilter`] instances ending in a
//! single [`Endpoint`].  Each filter receives the request context plus a
//! [`Next`] handle to the rest of the chain and either calls
//! [`Next::run`] (optionally inspecting the result on the way back) or
//! short-circuits by returning its own response.
//!
//! ```text
//! Request  ──► Logging ──► Auth ──► RateLimit ──► CircuitBreaker ──► Endpoint
//!                                                   (proxy or aggregator)
//! Response ◄── Logging ◄── Auth ◄── RateLimit ◄── CircuitBreaker ◄──┘
//! ```

use super::types::{GatewayContext, GatewayResponse};
use async_trait::async_trait;
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Filter ordering
// ─────────────────────────────────────────────────────────────────────────────

/// Numeric ordering slot for a filter in the chain.
///
/// The well-known slots below fix the protective order; any `u32` value is
/// accepted so implementors can slot in custom filters between them.
/// Filters with equal order values are executed in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FilterOrder(pub u32);

impl FilterOrder {
    /// Executes before authentication (access logging, request id).
    pub const PRE_AUTH: FilterOrder = FilterOrder(0);
    /// Authentication slot (API key, JWT, OAuth 2.0).
    pub const AUTH: FilterOrder = FilterOrder(100);
    /// Rate-limiting / throttling slot.
    pub const RATE_LIMIT: FilterOrder = FilterOrder(200);
    /// Per-backend circuit breaking; runs last, directly around the endpoint.
    pub const CIRCUIT_BREAKER: FilterOrder = FilterOrder(300);
}

// ─────────────────────────────────────────────────────────────────────────────
// GatewayFilter / Endpoint traits
// ─────────────────────────────────────────────────────────────────────────────

/// Kernel contract for a single stage in the gateway pipeline.
///
/// Implementations must be `Send + Sync` so they can be shared across Tokio
/// tasks without additional synchronization by the caller.
#[async_trait]
pub trait GatewayFilter: Send + Sync {
    /// Stable, human-readable identifier for this filter (used in logs).
    fn name(&self) -> &str;

    /// Position in the chain.  Lower values execute first.
    fn order(&self) -> FilterOrder;

    /// Handle the request: call `next.run(ctx)` to continue, or return a
    /// response without calling it to short-circuit the chain.
    async fn handle(&self, ctx: GatewayContext, next: Next<'_>) -> GatewayResponse;
}

/// Terminal handler of a chain: the router/proxy or the aggregator.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, ctx: GatewayContext) -> GatewayResponse;
}

// ─────────────────────────────────────────────────────────────────────────────
// Next
// ─────────────────────────────────────────────────────────────────────────────

/// The remainder of a chain, handed to each filter.
pub struct Next<'a> {
    filters: &'a [Arc<dyn GatewayFilter>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    /// A continuation that runs `filters` in slice order, then `endpoint`.
    pub fn new(filters: &'a [Arc<dyn GatewayFilter>], endpoint: &'a dyn Endpoint) -> Self {
        Self { filters, endpoint }
    }

    /// Run the rest of the chain.
    pub async fn run(self, ctx: GatewayContext) -> GatewayResponse {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                filter
                    .handle(
                        ctx,
                        Next {
                            filters: rest,
                            endpoint: self.endpoint,
                        },
                    )
                    .await
            }
            None => self.endpoint.call(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::types::{GatewayRequest, HttpMethod};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Trace(Mutex<Vec<String>>);

    impl Trace {
        fn push(&self, s: impl Into<String>) {
            self.0.lock().unwrap().push(s.into());
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    struct Recording {
        name: &'static str,
        trace: Arc<Trace>,
        reject: bool,
    }

    #[async_trait]
    impl GatewayFilter for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> FilterOrder {
            FilterOrder::PRE_AUTH
        }

        async fn handle(&self, ctx: GatewayContext, next: Next<'_>) -> GatewayResponse {
            self.trace.push(format!("{}:in", self.name));
            if self.reject {
                return GatewayResponse::new(429, "");
            }
            let resp = next.run(ctx).await;
            self.trace.push(format!("{}:out", self.name));
            resp
        }
    }

    struct Terminal(Arc<Trace>);

    #[async_trait]
    impl Endpoint for Terminal {
        async fn call(&self, _ctx: GatewayContext) -> GatewayResponse {
            self.0.push("endpoint");
            GatewayResponse::new(200, "svc")
        }
    }

    fn ctx() -> GatewayContext {
        GatewayContext::new(GatewayRequest::new("r", "/", HttpMethod::Get))
    }

    #[tokio::test]
    async fn filters_wrap_the_endpoint_in_order() {
        let trace = Arc::new(Trace::default());
        let filters: Vec<Arc<dyn GatewayFilter>> = vec![
            Arc::new(Recording { name: "a", trace: trace.clone(), reject: false }),
            Arc::new(Recording { name: "b", trace: trace.clone(), reject: false }),
        ];
        let endpoint = Terminal(trace.clone());

        let resp = Next::new(&filters, &endpoint).run(ctx()).await;

        assert_eq!(resp.status, 200);
        assert_eq!(trace.take(), vec!["a:in", "b:in", "endpoint", "b:out", "a:out"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_the_rest_of_the_chain() {
        let trace = Arc::new(Trace::default());
        let filters: Vec<Arc<dyn GatewayFilter>> = vec![
            Arc::new(Recording { name: "a", trace: trace.clone(), reject: true }),
            Arc::new(Recording { name: "b", trace: trace.clone(), reject: false }),
        ];
        let endpoint = Terminal(trace.clone());

        let resp = Next::new(&filters, &endpoint).run(ctx()).await;

        assert_eq!(resp.status, 429);
        assert_eq!(trace.take(), vec!["a:in"]);
    }
}
