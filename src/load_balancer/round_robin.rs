//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use dashmap::DashMap;
use thiserror::Error;

use crate::discovery::{BackendInstance, ServiceKey};

/// Instances are known but none is currently eligible.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no eligible instance for {service}")]
pub struct NoEligibleInstance {
    pub service: ServiceKey,
}

/// Round-robin selector.
/// Keeps one counter per service; the index is taken modulo the list handed
/// in on each call, so the eligible set may grow or shrink between calls.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    cursors: DashMap<ServiceKey, AtomicUsize>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<'a>(
        &self,
        service: &ServiceKey,
        eligible: &'a [BackendInstance],
    ) -> Result<&'a BackendInstance, NoEligibleInstance> {
        if eligible.is_empty() {
            return Err(NoEligibleInstance { service: service.clone() });
        }

        let ticket = self.next_ticket(service);
        Ok(&eligible[ticket % eligible.len()])
    }

    fn next_ticket(&self, service: &ServiceKey) -> usize {
        // Read lock on the hot path; the write lock is only taken once per service.
        if let Some(cursor) = self.cursors.get(service) {
            return cursor.fetch_add(1, Ordering::Relaxed);
        }
        self.cursors
            .entry(service.clone())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
    }

    pub fn services(&self) -> usize {
        self.cursors.len()
    }
}
