//! Concurrent fan-out aggregation.
//!
//! An aggregation request names a set of sub-requests.  Each one is routed,
//! guarded by its backend's circuit breaker and forwarded with its own
//! timeout; all of them run concurrently on the calling task and the
//! response is composed only after every sub-call has finished.  Each name
//! lands in exactly one of `results` or `errors`.
//!
//! The sub-call futures are joined in place rather than spawned, so dropping
//! the aggregation (request deadline, client disconnect) cancels every
//! outstanding downstream call.

use super::apply_discovery;
use super::proxy::ForwardingProxy;
use crate::error::{GatewayError, GatewayResult};
use crate::middleware::{CallOutcome, CircuitBreakerRegistry};
use crate::router::PrefixRouter;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tollgate_kernel::gateway::{
    BodyTooLarge, Endpoint, GatewayContext, GatewayRequest, GatewayResponse, GatewayRouter,
    HttpMethod, RouteMatch, ServiceDiscovery,
};
use tracing::{debug, info};

fn default_method() -> HttpMethod {
    HttpMethod::Get
}

/// Payload of a sub-request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SubRequestBody {
    /// Sent as raw text.
    Text(String),
    /// Serialized and sent as `application/json`.
    Json(Value),
}

/// One named sub-request of an aggregation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubRequest {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: HttpMethod,
    #[serde(default)]
    pub body: Option<SubRequestBody>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Overrides the route and aggregation default timeouts.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Combined outcome; the key sets of `results` and `errors` are disjoint.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResponse {
    pub results: BTreeMap<String, Value>,
    pub errors: BTreeMap<String, String>,
}

/// Caller identity copied onto every sub-request.
#[derive(Debug, Clone, Default)]
pub struct Origin {
    pub request_id: String,
    pub remote_addr: Option<SocketAddr>,
    pub forwarded_for: Option<String>,
}

impl Origin {
    pub fn of(request: &GatewayRequest) -> Self {
        Self {
            request_id: request.id.clone(),
            remote_addr: request.remote_addr,
            forwarded_for: request.header("x-forwarded-for").map(str::to_string),
        }
    }
}

enum SubCallError {
    RouteNotFound,
    CircuitOpen,
    Timeout,
    BadGateway(String),
    Upstream(u16),
    TooLarge(usize),
}

impl SubCallError {
    fn message(&self) -> String {
        match self {
            SubCallError::RouteNotFound => "route not found".to_string(),
            SubCallError::CircuitOpen => "circuit open".to_string(),
            SubCallError::Timeout => "timeout".to_string(),
            SubCallError::BadGateway(detail) => format!("bad gateway: {detail}"),
            SubCallError::Upstream(status) => format!("upstream status {status}"),
            SubCallError::TooLarge(limit) => format!("response exceeds {limit} bytes"),
        }
    }
}

impl From<GatewayError> for SubCallError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout { .. } => SubCallError::Timeout,
            GatewayError::Upstream { status, .. } => SubCallError::Upstream(status),
            GatewayError::Network { source, .. } => SubCallError::BadGateway(source.to_string()),
            other => SubCallError::BadGateway(other.to_string()),
        }
    }
}

/// Buffered sub-call response.  Only 2xx/3xx bodies are read, and only up
/// to the aggregator's byte limit.
struct SubResponse {
    status: u16,
    body: Bytes,
    oversized: bool,
}

impl SubResponse {
    fn unread(status: u16) -> Self {
        Self {
            status,
            body: Bytes::new(),
            oversized: false,
        }
    }
}

impl CallOutcome for SubResponse {
    fn is_failure(&self) -> bool {
        self.status >= 500
    }
}

/// JSON when the body parses as JSON, text otherwise.
fn decode_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

pub struct Aggregator {
    router: Arc<PrefixRouter>,
    proxy: Arc<ForwardingProxy>,
    breakers: Arc<CircuitBreakerRegistry>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    default_timeout: Duration,
    max_body_bytes: usize,
}

impl Aggregator {
    /// Byte limit used unless [`with_max_body_bytes`](Self::with_max_body_bytes) says otherwise.
    pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

    pub fn new(
        router: Arc<PrefixRouter>,
        proxy: Arc<ForwardingProxy>,
        breakers: Arc<CircuitBreakerRegistry>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            router,
            proxy,
            breakers,
            discovery: None,
            default_timeout,
            max_body_bytes: Self::DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Cap on the aggregation request body and on each buffered sub-response.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Decode an aggregation body: a JSON object of name to descriptor.
    pub fn parse(body: &[u8]) -> GatewayResult<BTreeMap<String, SubRequest>> {
        serde_json::from_slice(body)
            .map_err(|e| GatewayError::InvalidRequest(format!("malformed aggregation request: {e}")))
    }

    /// Run every sub-request concurrently and wait for all of them.
    pub async fn aggregate(
        &self,
        origin: &Origin,
        subs: BTreeMap<String, SubRequest>,
        deadline: Option<Instant>,
    ) -> AggregateResponse {
        let requested = subs.len();
        let calls = subs.into_iter().map(|(name, sub)| async move {
            let outcome = self.run_one(origin, &name, sub, deadline).await;
            (name, outcome)
        });

        let mut response = AggregateResponse::default();
        for (name, outcome) in join_all(calls).await {
            match outcome {
                Ok(value) => {
                    response.results.insert(name, value);
                }
                Err(err) => {
                    response.errors.insert(name, err.message());
                }
            }
        }

        info!(
            request_id = %origin.request_id,
            requested,
            succeeded = response.results.len(),
            failed = response.errors.len(),
            "aggregation complete"
        );
        response
    }

    async fn run_one(
        &self,
        origin: &Origin,
        name: &str,
        sub: SubRequest,
        deadline: Option<Instant>,
    ) -> Result<Value, SubCallError> {
        let mut route = self
            .router
            .resolve(&sub.path)
            .ok_or(SubCallError::RouteNotFound)?;
        apply_discovery(self.discovery.as_deref(), &mut route).await;

        let timeout = sub
            .timeout_ms
            .or(route.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        route.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        let now = Instant::now();
        let until = deadline.map_or(now + timeout, |d| d.min(now + timeout));

        debug!(
            request_id = %origin.request_id,
            sub_request = name,
            backend = %route.backend,
            "dispatching sub-request"
        );

        let request = Self::sub_request(origin, sub);
        let breaker = self.breakers.get(&route.backend);
        let outcome = breaker
            .execute(|| async {
                match tokio::time::timeout_at(until, self.fetch(request, &route, until)).await {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::Timeout {
                        backend: route.backend.clone(),
                    }),
                }
            })
            .await
            .map_err(|_| SubCallError::CircuitOpen)?;

        let sub = outcome.map_err(SubCallError::from)?;
        if !(200..400).contains(&sub.status) {
            return Err(SubCallError::Upstream(sub.status));
        }
        if sub.oversized {
            return Err(SubCallError::TooLarge(self.max_body_bytes));
        }
        Ok(decode_body(&sub.body))
    }

    /// Forward one sub-call and buffer its body.
    async fn fetch(
        &self,
        request: GatewayRequest,
        route: &RouteMatch,
        until: Instant,
    ) -> GatewayResult<SubResponse> {
        let resp = self.proxy.forward(request, route, Some(until)).await?;
        let status = resp.status;
        if !(200..400).contains(&status) {
            return Ok(SubResponse::unread(status));
        }
        match resp.body.collect_limited(self.max_body_bytes).await {
            Ok(body) => Ok(SubResponse {
                status,
                body,
                oversized: false,
            }),
            Err(e) if e.is::<BodyTooLarge>() => Ok(SubResponse {
                oversized: true,
                ..SubResponse::unread(status)
            }),
            Err(e) => Err(GatewayError::Internal(format!("body read failed: {e}"))),
        }
    }

    fn sub_request(origin: &Origin, sub: SubRequest) -> GatewayRequest {
        let mut request = GatewayRequest::new(origin.request_id.clone(), sub.path, sub.method);
        request.remote_addr = origin.remote_addr;
        if let Some(forwarded) = &origin.forwarded_for {
            request = request.with_header("x-forwarded-for", forwarded);
        }
        match sub.body {
            Some(SubRequestBody::Text(text)) => request = request.with_body(text),
            Some(SubRequestBody::Json(value)) => {
                request = request
                    .with_header("content-type", "application/json")
                    .with_body(value.to_string());
            }
            None => {}
        }
        for (key, value) in &sub.headers {
            request = request.with_header(key, value);
        }
        request
    }
}

/// Terminal chain stage for the aggregation endpoint.
pub struct AggregateEndpoint {
    aggregator: Arc<Aggregator>,
}

impl AggregateEndpoint {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl Endpoint for AggregateEndpoint {
    async fn call(&self, mut ctx: GatewayContext) -> GatewayResponse {
        let limit = self.aggregator.max_body_bytes();
        let body = match std::mem::take(&mut ctx.request.body).collect_limited(limit).await {
            Ok(body) => body,
            Err(e) if e.is::<BodyTooLarge>() => {
                return GatewayError::PayloadTooLarge(limit).into_gateway_response();
            }
            Err(e) => {
                return GatewayError::InvalidRequest(format!("unreadable body: {e}"))
                    .into_gateway_response();
            }
        };
        let subs = match Aggregator::parse(&body) {
            Ok(subs) => subs,
            Err(e) => return e.into_gateway_response(),
        };

        let origin = Origin::of(&ctx.request);
        let response = self.aggregator.aggregate(&origin, subs, ctx.deadline).await;
        match serde_json::to_value(&response) {
            Ok(value) => GatewayResponse::json(200, &value),
            Err(e) => GatewayError::Internal(e.to_string()).into_gateway_response(),
        }
    }
}
