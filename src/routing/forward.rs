//! Forwarding to a selected instance.
//!
//! # Responsibilities
//! - Build the upstream URI from the instance address
//! - Strip hop-by-hop headers, keep everything else (including `x-request-id`)
//! - Bound the upstream call with the forward timeout
//!
//! # Design Decisions
//! - Plain HTTP to instances; TLS is terminated elsewhere
//! - The response body is streamed back, never buffered
//! - A dropped forward future cancels the in-flight upstream call

use std::time::Duration;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use url::Position;

use crate::discovery::{BackendInstance, ServiceKey};

/// Headers meaningful only for a single transport hop.
pub const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Transport-level failure talking to an instance.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("instance address {address:?} is unusable: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    /// Machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            ForwardError::InvalidAddress { .. } => "InvalidAddress",
            ForwardError::Transport(_) => "Transport",
            ForwardError::Timeout(_) => "Timeout",
        }
    }
}

/// Build `scheme://host:port{base path}{path_and_query}` for an instance address.
pub fn instance_uri(address: &str, path_and_query: &str) -> Result<Uri, ForwardError> {
    let invalid = |reason: String| ForwardError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let probe = BackendInstance::new("", address);
    let base = probe.base_url().map_err(|e| invalid(e.to_string()))?;
    if base.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }

    let authority = &base[Position::BeforeHost..Position::AfterPort];
    let prefix = base.path().trim_end_matches('/');
    let suffix = if path_and_query.starts_with('/') {
        path_and_query.to_string()
    } else {
        format!("/{}", path_and_query)
    };

    format!("{}://{}{}{}", base.scheme(), authority, prefix, suffix)
        .parse::<Uri>()
        .map_err(|e| invalid(e.to_string()))
}

/// An inbound request, detached from the server connection, ready to forward.
#[derive(Debug)]
pub struct ForwardRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Body,
}

impl ForwardRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>, headers: HeaderMap, body: Body) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers,
            body,
        }
    }

    /// Bodiless `GET` (tests, probes).
    pub fn get(path_and_query: impl Into<String>) -> Self {
        Self::new(Method::GET, path_and_query, HeaderMap::new(), Body::empty())
    }
}

/// HTTP client for proxied requests.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request` to `instance` and return the upstream response head with a streaming body.
    pub async fn forward(
        &self,
        service: &ServiceKey,
        instance: &BackendInstance,
        request: ForwardRequest,
    ) -> Result<Response<Incoming>, ForwardError> {
        let uri = instance_uri(&instance.address, &request.path_and_query)?;

        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        if let Ok(value) = HeaderValue::from_str(service.as_str()) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), value);
        }

        let mut upstream = Request::builder()
            .method(request.method)
            .uri(uri)
            .body(request.body)
            .map_err(|e| ForwardError::Transport(e.to_string()))?;
        *upstream.headers_mut() = headers;

        match tokio::time::timeout(self.timeout, self.client.request(upstream)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ForwardError::Transport(e.to_string())),
            Err(_) => Err(ForwardError::Timeout(self.timeout)),
        }
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder").field("timeout", &self.timeout).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_uri() {
        let uri = instance_uri("127.0.0.1:3000", "/api/items?page=2").unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:3000/api/items?page=2");

        let uri = instance_uri("http://backend.internal:8080/base/", "/x").unwrap();
        assert_eq!(uri.to_string(), "http://backend.internal:8080/base/x");

        let uri = instance_uri("10.0.0.1:80", "health").unwrap();
        assert_eq!(uri.path(), "/health");
    }

    #[test]
    fn test_instance_uri_rejects_garbage() {
        let err = instance_uri("http://[oops", "/").unwrap_err();
        assert_eq!(err.reason(), "InvalidAddress");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = Forwarder::new(Duration::from_secs(2));
        let service = ServiceKey::parse("app.example.com").unwrap();
        let instance = BackendInstance::new("i1", addr.to_string());
        let err = forwarder.forward(&service, &instance, ForwardRequest::get("/")).await.unwrap_err();
        assert_eq!(err.reason(), "Transport");
    }
}
