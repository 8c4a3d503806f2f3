//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, limits, request ID)
//! - Enforce the platform deadline inside the handlers, so it answers with a JSON 504
//! - Bind server to listener
//! - Dispatch requests to the service router
//! - Spawn the background health monitor
//! - Observability (metrics, correlation IDs)

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::RouterConfig;
use crate::discovery::{Discovery, HttpDiscovery};
use crate::health::HealthMonitor;
use crate::http::request::{self, UuidRequestId};
use crate::http::response::upstream_response;
use crate::observability::metrics;
use crate::routing::{ForwardError, RouteError, Routed, RoutingRegistry, ServiceRouter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ServiceRouter>,
    pub max_body_bytes: usize,
    pub request_deadline: Duration,
}

/// HTTP server for the service router.
pub struct HttpServer {
    router: Router,
    config: RouterConfig,
    registry: Arc<RoutingRegistry>,
}

impl HttpServer {
    /// Create a server that resolves instances through the configured registry.
    pub fn new(config: RouterConfig) -> Result<Self, reqwest::Error> {
        let discovery = Arc::new(HttpDiscovery::new(&config.discovery)?);
        Ok(Self::with_discovery(config, discovery))
    }

    /// Create a server over an arbitrary discovery source.
    pub fn with_discovery(config: RouterConfig, discovery: Arc<dyn Discovery>) -> Self {
        let registry = Arc::new(RoutingRegistry::from_config(&config));
        let service_router = Arc::new(ServiceRouter::from_config(&config, discovery, registry.clone()));

        let state = AppState {
            router: service_router,
            max_body_bytes: config.forwarding.max_body_bytes,
            request_deadline: Duration::from_secs(config.forwarding.request_deadline_secs),
        };

        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            registry,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &RouterConfig, state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/route", post(route_handler))
            .fallback(proxy_handler)
            .with_state(state)
            .layer(ConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request::request_id(req.headers()),
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }

    /// Shared routing state, for the admin API.
    pub fn registry(&self) -> Arc<RoutingRegistry> {
        self.registry.clone()
    }

    /// Run the server until the shutdown signal fires, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            "HTTP server starting"
        );

        let monitor = HealthMonitor::new(self.registry.clone(), self.config.health_check.clone());
        let monitor_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            monitor.run(monitor_shutdown).await;
        });

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

/// Liveness of the router process itself.
async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /route`: target from the body hints or the `Host` header.
async fn route_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let result = within_deadline(state.request_deadline, route_request(&state, request)).await;
    respond(result, start_time)
}

async fn route_request(state: &AppState, request: Request<Body>) -> Result<Routed, RouteError> {
    let limit = state.max_body_bytes;
    if exceeds_limit(request.headers(), limit) {
        return Err(RouteError::BodyTooLarge { limit });
    }

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to buffer route body");
            return Err(RouteError::BodyTooLarge { limit });
        }
    };

    let (service, forward) = request::route_forward_request(parts, body)?;
    state.router.route(&service, forward).await
}

/// Every other path: proxied by `Host`, body streamed.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let result = within_deadline(state.request_deadline, proxy_request(&state, request)).await;
    respond(result, start_time)
}

async fn proxy_request(state: &AppState, request: Request<Body>) -> Result<Routed, RouteError> {
    let limit = state.max_body_bytes;
    if exceeds_limit(request.headers(), limit) {
        return Err(RouteError::BodyTooLarge { limit });
    }

    let service = request::host_target(request.headers())?;
    tracing::debug!(
        request_id = %request::request_id(request.headers()),
        service = %service,
        method = %request.method(),
        path = %request.uri().path(),
        "Proxying request"
    );
    let forward = request::into_forward_request(request);
    state.router.route(&service, forward).await
}

/// Bound a whole routing attempt by the platform deadline.
/// An attempt cut short here drops its breaker permit, which counts as a failure.
async fn within_deadline<F>(deadline: Duration, attempt: F) -> Result<Routed, RouteError>
where
    F: Future<Output = Result<Routed, RouteError>>,
{
    match tokio::time::timeout(deadline, attempt).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(deadline = ?deadline, "Request deadline exceeded");
            Err(RouteError::Forwarding(ForwardError::Timeout(deadline)))
        }
    }
}

fn respond(result: Result<Routed, RouteError>, start_time: Instant) -> Response {
    match result {
        Ok(routed) => {
            metrics::record_request("forwarded", routed.response.status().as_u16(), start_time);
            upstream_response(routed.response, routed.instance.as_str(), routed.source)
        }
        Err(e) => {
            let status = e.status_code();
            tracing::debug!(status = %status, error = %e, "Request not forwarded");
            metrics::record_request(e.outcome(), status.as_u16(), start_time);
            e.into_response()
        }
    }
}

fn exceeds_limit(headers: &HeaderMap, limit: usize) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .is_some_and(|len| len > limit)
}
