//! Read-only admin API over the routing state.
//!
//! Served on its own listener; every route requires `Authorization: Bearer <api_key>`.

pub mod handlers;
pub mod auth;

use axum::{
    routing::get,
    Router,
    middleware,
};
use std::sync::Arc;
use std::time::Instant;

use crate::routing::RoutingRegistry;
use self::handlers::*;
use self::auth::admin_auth_middleware;

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<RoutingRegistry>,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(registry: Arc<RoutingRegistry>, api_key: &str) -> Self {
        Self {
            registry,
            api_key: Arc::from(api_key),
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/instances", get(get_instances))
        .route("/admin/cache", get(get_cache))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
