//! Axum-based HTTP gateway server.
//!
//! [`GatewayServer`] wires together the router, the admission engines, the
//! filter pipeline and the two terminal endpoints into a running axum
//! service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check, always `200 OK`. |
//! | `GET`  | `/v1/circuit-breakers` | Snapshot of every backend breaker. |
//! | `POST` | `{aggregation.path}` | Fan-out aggregation (default `/v1/aggregate`). |
//! | `ANY`  | anything else | Routed by longest prefix and proxied. |
//!
//! Routing is resolved before the chain runs so the circuit-breaker stage
//! knows its backend; an unmatched path still passes auth and rate limiting
//! and is answered `404` by the proxy endpoint.

use crate::backend::{AggregateEndpoint, Aggregator, ForwardingProxy, ProxyEndpoint};
use crate::error::{GatewayError, GatewayResult};
use crate::filter::{
    ApiKeyFilter, CircuitBreakerFilter, FilterPipeline, LoggingFilter, RateLimitFilter,
};
use crate::middleware::{CircuitBreakerRegistry, RateLimiter};
use crate::router::PrefixRouter;
use axum::{
    Json, Router,
    body::{Body, HttpBody},
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tollgate_kernel::gateway::{
    Endpoint, GatewayBody, GatewayConfig, GatewayContext, GatewayFilter, GatewayRequest,
    GatewayResponse, GatewayRouter, HttpMethod, ServiceDiscovery,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Shared application state
// ─────────────────────────────────────────────────────────────────────────────

/// Shared state injected into every axum handler via [`State`] extractor.
#[derive(Clone)]
pub struct AppState {
    gateway_id: Arc<str>,
    router: Arc<PrefixRouter>,
    pipeline: Arc<FilterPipeline>,
    proxy: Arc<ProxyEndpoint>,
    aggregator: Arc<AggregateEndpoint>,
    limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    request_timeout: Duration,
}

// ─────────────────────────────────────────────────────────────────────────────
// GatewayServer
// ─────────────────────────────────────────────────────────────────────────────

/// High-level gateway server built from a validated [`GatewayConfig`].
pub struct GatewayServer {
    config: GatewayConfig,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
}

impl GatewayServer {
    /// Create a new server from the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            discovery: None,
        }
    }

    /// Resolve backend addresses through `discovery` before falling back to
    /// each route's static target.
    pub fn with_discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Validate the config and build every shared component.
    pub fn build_state(&self) -> GatewayResult<AppState> {
        let cfg = &self.config;
        cfg.validate()?;

        let router = Arc::new(PrefixRouter::from_routes(cfg.routes.iter().cloned())?);
        let limiter = Arc::new(RateLimiter::from_config(&cfg.rate_limit));
        let breakers = Arc::new(CircuitBreakerRegistry::from_config(cfg));
        let request_timeout = Duration::from_millis(cfg.request_timeout_ms);
        let forwarder = Arc::new(ForwardingProxy::new(request_timeout)?);

        let mut filters: Vec<Arc<dyn GatewayFilter>> = vec![
            Arc::new(LoggingFilter::new()),
            Arc::new(RateLimitFilter::new(limiter.clone())),
            Arc::new(CircuitBreakerFilter::new(breakers.clone())),
        ];
        if !cfg.api_keys.is_empty() {
            filters.push(Arc::new(ApiKeyFilter::new(cfg.api_keys.clone())));
        }
        let pipeline = FilterPipeline::new(filters);

        let mut aggregator = Aggregator::new(
            router.clone(),
            forwarder.clone(),
            breakers.clone(),
            Duration::from_millis(cfg.aggregation.sub_request_timeout_ms),
        )
        .with_max_body_bytes(cfg.aggregation.max_body_bytes);
        if let Some(discovery) = &self.discovery {
            aggregator = aggregator.with_discovery(discovery.clone());
        }

        info!(
            gateway_id = %cfg.id,
            routes = router.routes().len(),
            filters = ?pipeline.names(),
            auth_enabled = !cfg.api_keys.is_empty(),
            "gateway state built"
        );

        Ok(AppState {
            gateway_id: Arc::from(cfg.id.as_str()),
            router,
            pipeline: Arc::new(pipeline),
            proxy: Arc::new(ProxyEndpoint::new(forwarder, self.discovery.clone())),
            aggregator: Arc::new(AggregateEndpoint::new(Arc::new(aggregator))),
            limiter,
            breakers,
            request_timeout,
        })
    }

    /// Build the axum [`Router`] around an already-built state.
    pub fn router(&self, state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/v1/circuit-breakers", get(breakers_handler))
            .route(&self.config.aggregation.path, post(aggregate_handler))
            .fallback(proxy_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Validate the config and build the axum [`Router`].
    pub fn build_app(&self) -> GatewayResult<Router> {
        let state = self.build_state()?;
        Ok(self.router(state))
    }

    /// Bind `listen_addr` and serve until Ctrl-C.
    pub async fn start(self) -> GatewayResult<()> {
        let state = self.build_state()?;
        let rl = &self.config.rate_limit;
        let sweeper = state.limiter.clone().spawn_sweeper(
            Duration::from_secs(rl.sweep_interval_secs.max(1)),
            Duration::from_secs(rl.client_idle_ttl_secs),
        );

        let app = self.router(state);
        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, gateway_id = %self.config.id, "Tollgate gateway starting");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        sweeper.abort();
        info!("Tollgate gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// `GET /health`: liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "tollgate-gateway", "gateway_id": &*state.gateway_id }))
}

/// `GET /v1/circuit-breakers`: current breaker states.
async fn breakers_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "breakers": state.breakers.snapshots() }))
}

/// `POST {aggregation.path}`: fan-out aggregation through the chain.
async fn aggregate_handler(State(state): State<AppState>, request: Request) -> Response {
    dispatch(&state, request, false).await
}

/// Everything else is routed and proxied through the chain.
async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    dispatch(&state, request, true).await
}

async fn dispatch(state: &AppState, request: Request, routed: bool) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let gateway_request = match into_gateway_request(request, &request_id) {
        Ok(req) => req,
        Err(e) => return with_request_id(e.into_response(), &request_id),
    };

    let mut ctx = GatewayContext::new(gateway_request)
        .with_deadline(Instant::now() + state.request_timeout);

    let endpoint: &dyn Endpoint = if routed {
        ctx.route_match = state.router.resolve(&ctx.request.path);
        state.proxy.as_ref()
    } else {
        state.aggregator.as_ref()
    };

    let resp = state.pipeline.run(ctx, endpoint).await;
    with_request_id(build_axum_response(resp), &request_id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn into_gateway_request(request: Request, request_id: &str) -> GatewayResult<GatewayRequest> {
    let (parts, body) = request.into_parts();

    let method = HttpMethod::from_str_ci(parts.method.as_str())
        .ok_or_else(|| GatewayError::MethodNotAllowed(parts.method.to_string()))?;
    // Preserve the query string so it reaches the backend untouched.
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let mut req = GatewayRequest::new(request_id, path, method);
    req.headers = parts.headers;
    req.remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    if body.size_hint().exact() != Some(0) {
        req.body = GatewayBody::from_stream(body.into_data_stream());
    }
    Ok(req)
}

fn build_axum_response(resp: GatewayResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = match resp.body {
        GatewayBody::Empty => Body::empty(),
        GatewayBody::Full(bytes) => Body::from(bytes),
        GatewayBody::Stream(stream) => Body::from_stream(stream),
    };
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = resp.headers;
    response
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
