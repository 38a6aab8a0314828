//! API-key authentication filter.
//!
//! Accepts requests that carry a valid API key in either:
//! - `X-Api-Key: <key>` header
//! - `Authorization: Bearer <key>` header
//!
//! Requests without a valid key receive a `401 Unauthorized` response.

use crate::error::GatewayError;
use async_trait::async_trait;
use std::collections::HashSet;
use tollgate_kernel::gateway::{FilterOrder, GatewayContext, GatewayFilter, GatewayResponse, Next};
use tracing::warn;

/// Authentication filter that enforces API key validation.
pub struct ApiKeyFilter {
    valid_keys: HashSet<String>,
}

impl ApiKeyFilter {
    /// Build the filter from a list of valid keys.
    pub fn new(valid_keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            valid_keys: valid_keys.into_iter().map(Into::into).collect(),
        }
    }

    fn extract_key(ctx: &GatewayContext) -> Option<&str> {
        ctx.request.header("x-api-key").or_else(|| {
            ctx.request
                .header("authorization")
                .and_then(|auth| auth.strip_prefix("Bearer "))
        })
    }
}

#[async_trait]
impl GatewayFilter for ApiKeyFilter {
    fn name(&self) -> &str {
        "api-key-auth"
    }

    fn order(&self) -> FilterOrder {
        FilterOrder::AUTH
    }

    async fn handle(&self, mut ctx: GatewayContext, next: Next<'_>) -> GatewayResponse {
        let principal = match Self::extract_key(&ctx) {
            Some(key) if self.valid_keys.contains(key) => key.to_string(),
            Some(_) => {
                warn!(request_id = %ctx.request.id, "rejected request: invalid API key");
                return GatewayError::Unauthorized("invalid API key".to_string())
                    .into_gateway_response();
            }
            None => {
                warn!(request_id = %ctx.request.id, "rejected request: missing API key");
                return GatewayError::Unauthorized("missing authentication credentials".to_string())
                    .into_gateway_response();
            }
        };
        ctx.auth_principal = Some(principal);
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use tollgate_kernel::gateway::{Endpoint, GatewayRequest, HttpMethod};

    /// Records the principal the endpoint saw.
    #[derive(Default)]
    struct Capture(Mutex<Option<Option<String>>>);

    #[async_trait]
    impl Endpoint for Capture {
        async fn call(&self, ctx: GatewayContext) -> GatewayResponse {
            *self.0.lock().unwrap() = Some(ctx.auth_principal);
            GatewayResponse::new(200, "svc")
        }
    }

    fn ctx(auth: Option<&str>, x_api: Option<&str>) -> GatewayContext {
        let mut req = GatewayRequest::new("req-1", "/users", HttpMethod::Post);
        if let Some(v) = auth {
            req = req.with_header("authorization", v);
        }
        if let Some(v) = x_api {
            req = req.with_header("x-api-key", v);
        }
        GatewayContext::new(req)
    }

    async fn run(filter: ApiKeyFilter, ctx: GatewayContext) -> (u16, Option<Option<String>>) {
        let filters: Vec<Arc<dyn GatewayFilter>> = vec![Arc::new(filter)];
        let endpoint = Capture::default();
        let resp = Next::new(&filters, &endpoint).run(ctx).await;
        (resp.status, endpoint.0.lock().unwrap().clone())
    }

    #[tokio::test]
    async fn valid_bearer_token_passes() {
        let (status, seen) = run(ApiKeyFilter::new(["secret-key-1"]), ctx(Some("Bearer secret-key-1"), None)).await;
        assert_eq!(status, 200);
        assert_eq!(seen, Some(Some("secret-key-1".to_string())));
    }

    #[tokio::test]
    async fn valid_x_api_key_passes() {
        let (status, _) = run(ApiKeyFilter::new(["sk-abc"]), ctx(None, Some("sk-abc"))).await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn missing_key_returns_401() {
        let (status, seen) = run(ApiKeyFilter::new(["sk-abc"]), ctx(None, None)).await;
        assert_eq!(status, 401);
        assert_eq!(seen, None);
    }

    #[tokio::test]
    async fn invalid_key_returns_401() {
        let (status, seen) = run(ApiKeyFilter::new(["good-key"]), ctx(Some("Bearer bad-key"), None)).await;
        assert_eq!(status, 401);
        assert_eq!(seen, None);
    }
}
