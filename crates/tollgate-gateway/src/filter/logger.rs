//! Structured access-logging filter.
//!
//! Emits `tracing` events on both the request and response path, recording
//! path, method, request id, client, response status, backend and
//! round-trip latency.

use crate::middleware::client_key;
use async_trait::async_trait;
use tokio::time::Instant;
use tollgate_kernel::gateway::{FilterOrder, GatewayContext, GatewayFilter, GatewayResponse, Next};
use tracing::{error, info};

/// Logging filter that records inbound requests and outbound responses.
#[derive(Default)]
pub struct LoggingFilter;

impl LoggingFilter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GatewayFilter for LoggingFilter {
    fn name(&self) -> &str {
        "access-log"
    }

    fn order(&self) -> FilterOrder {
        FilterOrder::PRE_AUTH
    }

    async fn handle(&self, ctx: GatewayContext, next: Next<'_>) -> GatewayResponse {
        let request_id = ctx.request.id.clone();
        let path = ctx.request.path_only().to_string();
        info!(
            request_id  = %request_id,
            method      = ctx.request.method.as_str(),
            path        = %path,
            client      = %client_key(&ctx.request),
            "→ inbound request"
        );

        let start = Instant::now();
        let mut resp = next.run(ctx).await;
        let elapsed = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        if resp.is_server_error() {
            error!(
                request_id  = %request_id,
                path        = %path,
                status      = resp.status,
                backend     = %resp.backend_id,
                latency_ms  = elapsed,
                "← error response"
            );
        } else {
            info!(
                request_id  = %request_id,
                path        = %path,
                status      = resp.status,
                backend     = %resp.backend_id,
                latency_ms  = elapsed,
                "← outbound response"
            );
        }

        resp.latency_ms = elapsed;
        resp
    }
}
