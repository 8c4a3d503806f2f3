//! Known-instance table.
//!
//! # Responsibilities
//! - Remember every instance seen in a resolution (live or cached)
//! - Track probe health state (Unknown/Healthy/Unhealthy)
//! - Track in-flight requests per instance for observability
//! - Forget instances not seen for a while

use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;
use serde::Serialize;

use crate::discovery::{BackendInstance, InstanceId, ServiceKey};

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

impl HealthState {
    /// Unknown counts as healthy until the first probe says otherwise.
    pub fn is_healthy(self) -> bool {
        self != HealthState::Unhealthy
    }
}

/// Lock-free per-instance counters, shared with in-flight guards.
#[derive(Debug, Default)]
pub struct InstanceStatus {
    state: AtomicU8,
    in_flight: AtomicUsize,
}

impl InstanceStatus {
    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct InstanceRow {
    address: String,
    service: ServiceKey,
    last_seen: Instant,
    status: Arc<InstanceStatus>,
}

/// Target of one health probe.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub id: InstanceId,
    pub address: String,
}

/// Admin view of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub id: InstanceId,
    pub service: ServiceKey,
    pub address: String,
    pub health: HealthState,
    pub in_flight: usize,
    pub last_seen_ms: u128,
}

/// Instances per probe verdict, for the health gauge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCounts {
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

/// Every instance the router has been told about, keyed by id.
#[derive(Debug, Default)]
pub struct InstanceTable {
    rows: DashMap<InstanceId, InstanceRow>,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `instances` currently serve `service`.
    /// Addresses are refreshed; an id keeps its health state across re-registration.
    pub fn observe_at(&self, service: &ServiceKey, instances: &[BackendInstance], now: Instant) {
        for instance in instances {
            self.rows
                .entry(instance.id.clone())
                .and_modify(|row| {
                    if row.address != instance.address {
                        tracing::info!(instance = %instance.id, old = %row.address, new = %instance.address, "Instance address changed");
                        row.address.clone_from(&instance.address);
                    }
                    if &row.service != service {
                        row.service = service.clone();
                    }
                    row.last_seen = now;
                })
                .or_insert_with(|| InstanceRow {
                    address: instance.address.clone(),
                    service: service.clone(),
                    last_seen: now,
                    status: Arc::new(InstanceStatus::default()),
                });
        }
    }

    pub fn health(&self, id: &InstanceId) -> HealthState {
        self.rows
            .get(id)
            .map(|row| row.status.health())
            .unwrap_or(HealthState::Unknown)
    }

    /// Copy the probe verdict onto each instance's `last_known_healthy`.
    pub fn annotate(&self, instances: &mut [BackendInstance]) {
        for instance in instances.iter_mut() {
            instance.last_known_healthy = self.health(&instance.id).is_healthy();
        }
    }

    /// Store a probe result. Returns the previous state when it changed.
    pub fn set_health(&self, id: &InstanceId, healthy: bool) -> Option<HealthState> {
        let row = self.rows.get(id)?;
        let next = if healthy { HealthState::Healthy } else { HealthState::Unhealthy };
        let prev = HealthState::from(row.status.state.swap(next as u8, Ordering::AcqRel));
        (prev != next).then_some(prev)
    }

    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.rows
            .iter()
            .map(|row| ProbeTarget {
                id: row.key().clone(),
                address: row.address.clone(),
            })
            .collect()
    }

    /// Count a request against the instance until the guard drops.
    pub fn begin_request(&self, id: &InstanceId) -> InFlightGuard {
        let status = self
            .rows
            .get(id)
            .map(|row| row.status.clone())
            .unwrap_or_default();
        status.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { status }
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.rows.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn health_counts(&self) -> HealthCounts {
        let mut counts = HealthCounts::default();
        for row in self.rows.iter() {
            match row.status.health() {
                HealthState::Healthy => counts.healthy += 1,
                HealthState::Unhealthy => counts.unhealthy += 1,
                HealthState::Unknown => counts.unknown += 1,
            }
        }
        counts
    }

    /// Drop rows not observed within `max_age`, except ones with requests in flight.
    pub fn sweep_stale_at(&self, now: Instant, max_age: Duration) -> usize {
        let before = self.rows.len();
        self.rows.retain(|_, row| {
            row.status.in_flight() > 0 || now.saturating_duration_since(row.last_seen) < max_age
        });
        before.saturating_sub(self.rows.len())
    }

    pub fn summary_at(&self, now: Instant) -> Vec<InstanceSummary> {
        let mut out: Vec<InstanceSummary> = self
            .rows
            .iter()
            .map(|row| InstanceSummary {
                id: row.key().clone(),
                service: row.service.clone(),
                address: row.address.clone(),
                health: row.status.health(),
                in_flight: row.status.in_flight(),
                last_seen_ms: now.saturating_duration_since(row.last_seen).as_millis(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

/// A RAII guard that manages the in-flight request count.
#[derive(Debug)]
pub struct InFlightGuard {
    status: Arc<InstanceStatus>,
}

impl Deref for InFlightGuard {
    type Target = InstanceStatus;
    fn deref(&self) -> &Self::Target {
        &self.status
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.status.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
