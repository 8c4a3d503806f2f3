//! Response handling and transformation.
//!
//! # Responsibilities
//! - Stream upstream responses back to the client
//! - Map routing failures to status codes and JSON bodies
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped automatically
//! - Upstream status codes (5xx included) pass through unchanged
//! - Upstream timeouts result in 504 Gateway Timeout

use axum::body::Body;
use axum::http::{HeaderValue, Response as HttpResponse, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hyper::body::Incoming;
use serde_json::json;

use crate::routing::forward::strip_hop_by_hop;
use crate::routing::{ForwardError, InstanceSource, RouteError};

/// Header telling the client which instance served the request.
pub const X_ROUTED_INSTANCE: &str = "x-routed-instance";
/// Present (with the entry age in ms) when the instance came from the fallback cache.
pub const X_ROUTED_FALLBACK_AGE: &str = "x-routed-fallback-age-ms";

impl RouteError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RouteError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RouteError::Forwarding(ForwardError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            RouteError::Forwarding(_) => StatusCode::BAD_GATEWAY,
            RouteError::MissingTarget => StatusCode::BAD_REQUEST,
            RouteError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let body = match &self {
            RouteError::ServiceUnavailable(reason) => json!({
                "error": "ServiceUnavailable",
                "reason": reason.as_str(),
            }),
            RouteError::Forwarding(e) => json!({
                "error": "ForwardingFailure",
                "reason": e.reason(),
                "message": e.to_string(),
            }),
            RouteError::MissingTarget => json!({
                "error": "MissingTarget",
                "message": self.to_string(),
            }),
            RouteError::BodyTooLarge { limit } => json!({
                "error": "BodyTooLarge",
                "limit": limit,
            }),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Turn an upstream response into a client response, annotated with routing metadata.
pub fn upstream_response(
    response: HttpResponse<Incoming>,
    instance: &str,
    source: InstanceSource,
) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    if let Ok(value) = HeaderValue::from_str(instance) {
        parts.headers.insert(X_ROUTED_INSTANCE, value);
    }
    if let InstanceSource::Fallback { age } = source {
        parts
            .headers
            .insert(X_ROUTED_FALLBACK_AGE, HeaderValue::from(age.as_millis() as u64));
    }

    Response::from_parts(parts, Body::new(body))
}
