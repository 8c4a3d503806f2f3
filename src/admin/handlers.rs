use axum::{
    extract::State,
    Json,
};
use serde::Serialize;
use std::time::Instant;

use crate::admin::AdminState;
use crate::discovery::cache::CacheEntrySummary;
use crate::load_balancer::backend::InstanceSummary;
use crate::resilience::BreakerSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub known_instances: usize,
    pub tracked_breakers: usize,
    pub cached_services: usize,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub cache_ttl_secs: u64,
}

#[derive(Serialize)]
pub struct CacheStatus {
    pub ttl_secs: u64,
    pub entries: Vec<CacheEntrySummary>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let registry = &state.registry;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        known_instances: registry.instances.len(),
        tracked_breakers: registry.breakers.len(),
        cached_services: registry.cache.len(),
        failure_threshold: registry.breakers.failure_threshold(),
        reset_timeout_secs: registry.breakers.reset_timeout().as_secs(),
        cache_ttl_secs: registry.cache.ttl().as_secs(),
    })
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    let mut breakers = state.registry.breakers.snapshot_at(Instant::now());
    breakers.sort_by(|a, b| a.instance.cmp(&b.instance));
    Json(breakers)
}

pub async fn get_instances(State(state): State<AdminState>) -> Json<Vec<InstanceSummary>> {
    let mut instances = state.registry.instances.summary_at(Instant::now());
    instances.sort_by(|a, b| a.service.cmp(&b.service).then_with(|| a.id.cmp(&b.id)));
    Json(instances)
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheStatus> {
    let mut entries = state.registry.cache.summary_at(Instant::now());
    entries.sort_by(|a, b| a.service.cmp(&b.service));
    Json(CacheStatus {
        ttl_secs: state.registry.cache.ttl().as_secs(),
        entries,
    })
}
