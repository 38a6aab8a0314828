//! Streaming HTTP forwarding proxy.
//!
//! [`ForwardingProxy`] sends the inbound request to
//! `{target}{remaining_path}?{query}` and hands back the backend's status,
//! headers and body verbatim, minus hop-by-hop headers.  Bodies are streamed
//! in both directions and never buffered.
//!
//! Failures are mapped to gateway errors: transport errors become
//! `502 Bad Gateway`, an expired per-route timeout or request deadline
//! becomes `504 Gateway Timeout`.  Backend 5xx responses are relayed
//! unchanged; the circuit-breaker stage counts them as failures.

use super::apply_discovery;
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use http::header::{CONNECTION, CONTENT_LENGTH, HOST, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tollgate_kernel::gateway::{
    Endpoint, GatewayBody, GatewayContext, GatewayRequest, GatewayResponse, RouteMatch,
    ServiceDiscovery,
};
use tracing::{debug, error, instrument};

/// Headers meaningful only for a single transport hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Copy `headers`, dropping hop-by-hop headers and any header named in a
/// `Connection` value.  Multi-valued headers keep every value.
fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name_str = name.as_str();
        if HOP_BY_HOP.contains(&name_str) || listed.iter().any(|l| l == name_str) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Headers sent to the backend for `request`.
fn outbound_headers(request: &GatewayRequest) -> HeaderMap {
    let mut headers = strip_hop_by_hop(&request.headers);
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);

    if let Some(addr) = request.remote_addr {
        let ip = addr.ip().to_string();
        let chain = match request.header("x-forwarded-for") {
            Some(prior) => format!("{prior}, {ip}"),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(HeaderName::from_static("x-forwarded-for"), value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&request.id) {
        headers.insert(HeaderName::from_static("x-request-id"), value);
    }
    headers
}

fn backend_url(target: &str, remaining_path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}{}", target.trim_end_matches('/'), remaining_path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Forwards requests to HTTP backends over a shared connection pool.
pub struct ForwardingProxy {
    client: Client,
    default_timeout: Duration,
}

impl ForwardingProxy {
    /// Create a proxy whose calls time out after `default_timeout` unless the
    /// route sets its own timeout.
    pub fn new(default_timeout: Duration) -> GatewayResult<Self> {
        // Redirects are relayed to the caller, never followed.
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, default_timeout))
    }

    pub fn with_client(client: Client, default_timeout: Duration) -> Self {
        Self {
            client,
            default_timeout,
        }
    }

    /// Forward `request` to the backend described by `route`.
    ///
    /// The call is abandoned at the earlier of the route timeout and
    /// `deadline`.  Only the wait for the response head is bounded; the body
    /// streams for as long as the caller keeps reading it.
    #[instrument(skip_all, fields(request_id = %request.id, backend = %route.backend))]
    pub async fn forward(
        &self,
        request: GatewayRequest,
        route: &RouteMatch,
        deadline: Option<Instant>,
    ) -> GatewayResult<GatewayResponse> {
        let url = backend_url(&route.target, &route.remaining_path, request.query());
        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        let headers = outbound_headers(&request);
        let content_length = request.headers.get(CONTENT_LENGTH).cloned();

        let timeout = route
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let start = Instant::now();
        let until = deadline.map_or(start + timeout, |d| d.min(start + timeout));

        let builder = self.client.request(method, &url).headers(headers);
        let builder = match request.body {
            GatewayBody::Empty => builder,
            GatewayBody::Full(bytes) => builder.body(bytes),
            body @ GatewayBody::Stream(_) => {
                // Keep a declared length so the body is not re-framed as chunked.
                let builder = builder.body(reqwest::Body::wrap_stream(body.into_stream()));
                match content_length {
                    Some(len) => builder.header(CONTENT_LENGTH, len),
                    None => builder,
                }
            }
        };

        debug!(url = %url, "forwarding request");
        let upstream = match tokio::time::timeout_at(until, builder.send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(GatewayError::from_reqwest(&route.backend, e)),
            Err(_) => {
                return Err(GatewayError::Timeout {
                    backend: route.backend.clone(),
                });
            }
        };

        let mut resp = GatewayResponse::new(upstream.status().as_u16(), &route.backend);
        resp.headers = strip_hop_by_hop(upstream.headers());
        resp.latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        resp.body = GatewayBody::from_stream(upstream.bytes_stream());
        Ok(resp)
    }
}

/// Terminal chain stage for routed requests.
pub struct ProxyEndpoint {
    proxy: Arc<ForwardingProxy>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
}

impl ProxyEndpoint {
    pub fn new(proxy: Arc<ForwardingProxy>, discovery: Option<Arc<dyn ServiceDiscovery>>) -> Self {
        Self { proxy, discovery }
    }
}

#[async_trait]
impl Endpoint for ProxyEndpoint {
    async fn call(&self, ctx: GatewayContext) -> GatewayResponse {
        let GatewayContext {
            request,
            route_match,
            deadline,
            ..
        } = ctx;

        let Some(mut route) = route_match else {
            return GatewayError::RouteNotFound(request.path_only().to_string())
                .into_gateway_response();
        };
        apply_discovery(self.discovery.as_deref(), &mut route).await;

        match self.proxy.forward(request, &route, deadline).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(backend = %route.backend, error = %e, "forwarding failed");
                e.into_gateway_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_kernel::gateway::HttpMethod;

    #[test]
    fn url_keeps_query_and_joins_cleanly() {
        assert_eq!(
            backend_url("http://b:8080/", "/users/1", Some("a=1&a=2")),
            "http://b:8080/users/1?a=1&a=2"
        );
        assert_eq!(backend_url("http://b", "/", None), "http://b/");
        assert_eq!(backend_url("http://b", "/x", Some("")), "http://b/x");
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-private"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-private", HeaderValue::from_static("secret"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let out = strip_hop_by_hop(&headers);

        assert!(out.get(CONNECTION).is_none());
        assert!(out.get("keep-alive").is_none());
        assert!(out.get("transfer-encoding").is_none());
        assert!(out.get("x-private").is_none());
        assert_eq!(out.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn outbound_headers_extend_forwarding_chain() {
        let request = GatewayRequest::new("req-1", "/users", HttpMethod::Get)
            .with_header("host", "gateway.local")
            .with_header("content-length", "10")
            .with_header("x-forwarded-for", "203.0.113.1")
            .with_header("accept", "application/json")
            .with_remote_addr("10.0.0.5:5555".parse().unwrap());

        let headers = outbound_headers(&request);
        let content_length = request.headers.get(CONTENT_LENGTH).cloned();

        assert!(headers.get(HOST).is_none());
        assert!(headers.get(CONTENT_LENGTH).is_none());
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "203.0.113.1, 10.0.0.5");
        assert_eq!(headers.get("x-request-id").unwrap(), "req-1");
        assert_eq!(headers.get("accept").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn unmatched_request_gets_404() {
        let proxy = Arc::new(ForwardingProxy::new(Duration::from_secs(1)).unwrap());
        let endpoint = ProxyEndpoint::new(proxy, None);
        let ctx = GatewayContext::new(GatewayRequest::new("r", "/nowhere?x=1", HttpMethod::Get));

        let resp = endpoint.call(ctx).await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn unreachable_backend_is_bad_gateway() {
        let proxy = ForwardingProxy::new(Duration::from_secs(2)).unwrap();
        let route = RouteMatch {
            prefix: "/svc".into(),
            backend: "dead".into(),
            // Port 9 (discard) on loopback is expected to refuse connections.
            target: "http://127.0.0.1:9".into(),
            remaining_path: "/".into(),
            timeout_ms: None,
        };
        let err = proxy
            .forward(GatewayRequest::new("r", "/svc", HttpMethod::Get), &route, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Network { ref backend, .. } if backend == "dead"));
        assert_eq!(err.status(), http::StatusCode::BAD_GATEWAY);
    }
}
