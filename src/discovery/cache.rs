//! Fallback cache of the last successfully resolved instance sets.
//!
//! # Responsibilities
//! - Remember the last live discovery answer per service
//! - Serve it while it is younger than the TTL when discovery is down
//!
//! # Design Decisions
//! - Entries are replaced whole; a reader sees either the old or the new entry
//! - An expired entry is a miss, not an "unhealthy" answer
//! - Only written after a successful discovery call

use std::time::{Duration, Instant};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::discovery::types::{BackendInstance, ServiceKey};
use crate::observability::metrics;

/// No usable cached entry exists for the service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no usable fallback entry for {service}")]
pub struct CacheMiss {
    pub service: ServiceKey,
}

/// One cached instance set.
#[derive(Debug, Clone)]
pub struct FallbackCacheEntry {
    pub service_key: ServiceKey,
    pub instances: Vec<BackendInstance>,
    pub cached_at: Instant,
}

impl FallbackCacheEntry {
    /// Usable only while strictly younger than `ttl`.
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.cached_at) < ttl
    }
}

/// Admin view of one cache entry.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntrySummary {
    pub service: ServiceKey,
    pub instances: usize,
    pub age_ms: u128,
    pub fresh: bool,
}

/// TTL-bounded map from service to its last known-good instances.
#[derive(Debug)]
pub struct FallbackCache {
    entries: DashMap<ServiceKey, FallbackCacheEntry>,
    ttl: Duration,
}

impl FallbackCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Overwrite the entry for `service`, stamping it with the current time.
    pub fn put(&self, service: &ServiceKey, instances: Vec<BackendInstance>) {
        self.put_at(service, instances, Instant::now());
    }

    pub fn put_at(&self, service: &ServiceKey, instances: Vec<BackendInstance>, now: Instant) {
        self.entries.insert(service.clone(), FallbackCacheEntry {
            service_key: service.clone(),
            instances,
            cached_at: now,
        });
        metrics::record_cache_entries(self.entries.len());
    }

    pub fn get(&self, service: &ServiceKey) -> Result<FallbackCacheEntry, CacheMiss> {
        self.get_at(service, Instant::now())
    }

    /// Return the entry if it is still fresh at `now`.
    pub fn get_at(&self, service: &ServiceKey, now: Instant) -> Result<FallbackCacheEntry, CacheMiss> {
        self.entries
            .get(service)
            .filter(|entry| entry.is_fresh(now, self.ttl))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CacheMiss { service: service.clone() })
    }

    /// Drop entries that can no longer be served. Returns how many were removed.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now, self.ttl));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            metrics::record_cache_entries(self.entries.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary_at(&self, now: Instant) -> Vec<CacheEntrySummary> {
        let mut out: Vec<CacheEntrySummary> = self
            .entries
            .iter()
            .map(|entry| CacheEntrySummary {
                service: entry.service_key.clone(),
                instances: entry.instances.len(),
                age_ms: now.saturating_duration_since(entry.cached_at).as_millis(),
                fresh: entry.is_fresh(now, self.ttl),
            })
            .collect();
        out.sort_by(|a, b| a.service.cmp(&b.service));
        out
    }
}
