//! Core data types for the gateway kernel contract.
//!
//! These types are shared across all gateway traits
//! ([`GatewayRouter`](super::router::GatewayRouter),
//! [`GatewayFilter`](super::filter::GatewayFilter),
//! [`Endpoint`](super::filter::Endpoint)).
//!
//! Request and response bodies are carried as [`GatewayBody`], which is
//! either fully buffered or a byte stream.  The proxy path keeps bodies
//! streaming end to end so large payloads never have to fit in memory.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio::time::Instant;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP primitives
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP method, covering the standard verbs used in REST and proxy scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// Case-insensitive parse from a string slice.
    pub fn from_str_ci(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }

    /// Return the standard uppercase string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for HttpMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HttpMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        HttpMethod::from_str_ci(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unsupported HTTP method '{raw}'")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Body
// ─────────────────────────────────────────────────────────────────────────────

/// Boxed error type carried by body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A pinned, boxed stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// A buffered body outgrew the caller's byte limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("body exceeds {limit} bytes")]
pub struct BodyTooLarge {
    pub limit: usize,
}

/// Request or response payload.
#[derive(Default)]
pub enum GatewayBody {
    /// No payload.
    #[default]
    Empty,
    /// Fully buffered payload.
    Full(Bytes),
    /// Payload delivered chunk by chunk; never buffered by the gateway.
    Stream(BodyStream),
}

impl GatewayBody {
    /// Wrap any fallible byte stream.
    pub fn from_stream<S, B, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes>,
        E: Into<BoxError>,
    {
        let stream = stream.map(|item| -> Result<Bytes, BoxError> {
            item.map(Into::into).map_err(Into::into)
        });
        GatewayBody::Stream(Box::pin(stream))
    }

    /// `true` only when the body is known to be empty without polling it.
    pub fn is_empty(&self) -> bool {
        match self {
            GatewayBody::Empty => true,
            GatewayBody::Full(bytes) => bytes.is_empty(),
            GatewayBody::Stream(_) => false,
        }
    }

    /// Convert into a stream, regardless of the current representation.
    pub fn into_stream(self) -> BodyStream {
        match self {
            GatewayBody::Empty => Box::pin(futures::stream::empty::<Result<Bytes, BoxError>>()),
            GatewayBody::Full(bytes) => {
                Box::pin(futures::stream::once(async move { Ok::<_, BoxError>(bytes) }))
            }
            GatewayBody::Stream(stream) => stream,
        }
    }

    /// Buffer the whole body.
    ///
    /// Only used where the gateway must inspect a payload (aggregation
    /// results); the proxy path never calls this.
    pub async fn collect(self) -> Result<Bytes, BoxError> {
        self.collect_limited(usize::MAX).await
    }

    /// Buffer the whole body, giving up with [`BodyTooLarge`] as soon as more
    /// than `limit` bytes have arrived.
    pub async fn collect_limited(self, limit: usize) -> Result<Bytes, BoxError> {
        match self {
            GatewayBody::Empty => Ok(Bytes::new()),
            GatewayBody::Full(bytes) if bytes.len() > limit => Err(Box::new(BodyTooLarge { limit })),
            GatewayBody::Full(bytes) => Ok(bytes),
            GatewayBody::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    if chunk.len() > limit - buf.len() {
                        return Err(Box::new(BodyTooLarge { limit }));
                    }
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for GatewayBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayBody::Empty => f.write_str("Empty"),
            GatewayBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            GatewayBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for GatewayBody {
    fn from(bytes: Bytes) -> Self {
        GatewayBody::Full(bytes)
    }
}

impl From<Vec<u8>> for GatewayBody {
    fn from(bytes: Vec<u8>) -> Self {
        GatewayBody::Full(Bytes::from(bytes))
    }
}

impl From<String> for GatewayBody {
    fn from(text: String) -> Self {
        GatewayBody::Full(Bytes::from(text))
    }
}

impl From<&'static str> for GatewayBody {
    fn from(text: &'static str) -> Self {
        GatewayBody::Full(Bytes::from_static(text.as_bytes()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response
// ─────────────────────────────────────────────────────────────────────────────

fn insert_header(headers: &mut HeaderMap, key: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(key.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}

/// An inbound request flowing through the gateway.
#[derive(Debug)]
pub struct GatewayRequest {
    /// Unique identifier for correlating this request across logs.
    pub id: String,
    /// Request path including the query string, e.g. `/users/1?full=true`.
    pub path: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// HTTP headers, multi-valued entries preserved.
    pub headers: HeaderMap,
    /// Payload.
    pub body: GatewayBody,
    /// Socket address of the connected peer, when known.
    pub remote_addr: Option<SocketAddr>,
}

impl GatewayRequest {
    /// Construct a minimal request with the given id, path, and method.
    pub fn new(id: impl Into<String>, path: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            method,
            headers: HeaderMap::new(),
            body: GatewayBody::Empty,
            remote_addr: None,
        }
    }

    /// Builder helper: attach a header.  Invalid names or values are ignored.
    pub fn with_header(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        insert_header(&mut self.headers, key.as_ref(), value.as_ref());
        self
    }

    /// Builder helper: set the body.
    pub fn with_body(mut self, body: impl Into<GatewayBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Builder helper: record the peer address.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Path without the query string.
    pub fn path_only(&self) -> &str {
        self.path.split_once('?').map_or(self.path.as_str(), |(p, _)| p)
    }

    /// Query string without the leading `?`, if any.
    pub fn query(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, q)| q)
    }

    /// First value of a header as UTF-8, if present.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }
}

/// An outbound response produced by a backend (or synthesized by the
/// gateway) and returned to the caller.
#[derive(Debug)]
pub struct GatewayResponse {
    /// HTTP status code (100–599).
    pub status: u16,
    /// Response headers, passed through verbatim minus hop-by-hop entries.
    pub headers: HeaderMap,
    /// Payload.
    pub body: GatewayBody,
    /// Name of the backend that generated this response (empty when the
    /// gateway answered itself).
    pub backend_id: String,
    /// Time until response headers arrived, in milliseconds.
    pub latency_ms: u64,
}

impl GatewayResponse {
    /// Construct a minimal response.
    pub fn new(status: u16, backend_id: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: GatewayBody::Empty,
            backend_id: backend_id.into(),
            latency_ms: 0,
        }
    }

    /// A gateway-generated JSON response.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, "")
            .with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    /// Builder helper: attach a header.  Invalid names or values are ignored.
    pub fn with_header(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        insert_header(&mut self.headers, key.as_ref(), value.as_ref());
        self
    }

    /// Builder helper: set the body.
    pub fn with_body(mut self, body: impl Into<GatewayBody>) -> Self {
        self.body = body.into();
        self
    }

    /// `true` for 5xx statuses.
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Route match
// ─────────────────────────────────────────────────────────────────────────────

/// The result of a successful route lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatch {
    /// The configured prefix that won the longest-prefix selection.
    pub prefix: String,
    /// Backend name; keys the circuit breaker.
    pub backend: String,
    /// Base URL the request is forwarded to.
    pub target: String,
    /// Path left after stripping `prefix`; always starts with `/`.
    pub remaining_path: String,
    /// Per-route downstream timeout, if configured.
    pub timeout_ms: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Request context
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable context that flows through the filter chain for a single request.
///
/// Stages read from and write to this context, enabling later stages to
/// access decisions made by earlier ones (e.g. the route match resolved before
/// the chain runs is read by the circuit-breaker stage to pick its backend).
#[derive(Debug)]
pub struct GatewayContext {
    /// The inbound request.
    pub request: GatewayRequest,
    /// Populated by routing; `None` if no route matched or the request
    /// targets the aggregation endpoint.
    pub route_match: Option<RouteMatch>,
    /// Identity principal resolved by the auth stage.
    pub auth_principal: Option<String>,
    /// Point in time after which every downstream call of this request is
    /// cancelled.
    pub deadline: Option<Instant>,
}

impl GatewayContext {
    /// Create a fresh context from an inbound request.
    pub fn new(request: GatewayRequest) -> Self {
        Self {
            request,
            route_match: None,
            auth_principal: None,
            deadline: None,
        }
    }

    /// Builder helper: set the request deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
