//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4)
//! - Extract the target hostname (Host header or `POST /route` body)
//! - Detach the inbound request into a `ForwardRequest`
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - An inbound `x-request-id` is kept, never replaced
//! - Target extraction never guesses: no hostname means `MissingTarget`

use axum::body::{Body, Bytes};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, Request};
use serde::Deserialize;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::discovery::ServiceKey;
use crate::routing::{ForwardRequest, RouteError};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates UUID v4 request ids for requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Read the request id set by the request-id layer.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Routing target from the `Host` header.
pub fn host_target(headers: &HeaderMap) -> Result<ServiceKey, RouteError> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(ServiceKey::parse)
        .ok_or(RouteError::MissingTarget)
}

/// Routing hints carried in a `POST /route` body.
///
/// Only a JSON object with a string `hostname` names a target; anything else
/// (empty, non-JSON, other shapes) leaves targeting to the `Host` header.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteBody {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl RouteBody {
    pub fn sniff(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_default()
    }

    pub fn target(&self, headers: &HeaderMap) -> Result<ServiceKey, RouteError> {
        match self.hostname.as_deref() {
            Some(hostname) => ServiceKey::parse(hostname).ok_or(RouteError::MissingTarget),
            None => host_target(headers),
        }
    }

    /// Backend path for the forwarded request, `/` by default.
    pub fn path(&self) -> String {
        match self.path.as_deref().map(str::trim) {
            Some(p) if p.starts_with('/') => p.to_string(),
            Some(p) if !p.is_empty() => format!("/{}", p),
            _ => "/".to_string(),
        }
    }
}

/// Build the forwarded request for `POST /route`: inbound method, headers and body bytes.
pub fn route_forward_request(parts: Parts, body: Bytes) -> Result<(ServiceKey, ForwardRequest), RouteError> {
    let hints = RouteBody::sniff(&body);
    let service = hints.target(&parts.headers)?;
    let forward = ForwardRequest::new(parts.method, hints.path(), parts.headers, Body::from(body));
    Ok((service, forward))
}

/// Detach a proxied request; the body streams through untouched.
pub fn into_forward_request(request: Request<Body>) -> ForwardRequest {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    ForwardRequest::new(parts.method, path_and_query, parts.headers, body)
}
