//! Shared routing state.
//!
//! # Responsibilities
//! - Own the breaker records, round-robin cursors, instance table and fallback cache
//! - Hand one long-lived instance to the router, the health monitor and the admin API
//!
//! # Design Decisions
//! - No process-wide globals; tests build a fresh registry each
//! - Every map is keyed per instance or per service, never locked as a whole

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RouterConfig;
use crate::discovery::FallbackCache;
use crate::load_balancer::{InstanceTable, RoundRobinSelector};
use crate::resilience::BreakerRegistry;

/// Result of one stale-state sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub instances: usize,
    pub breakers: usize,
    pub cache_entries: usize,
}

#[derive(Debug)]
pub struct RoutingRegistry {
    pub breakers: Arc<BreakerRegistry>,
    pub selector: RoundRobinSelector,
    pub instances: InstanceTable,
    pub cache: FallbackCache,
}

impl RoutingRegistry {
    pub fn new(failure_threshold: u32, reset_timeout: Duration, cache_ttl: Duration) -> Self {
        Self {
            breakers: Arc::new(BreakerRegistry::new(failure_threshold, reset_timeout)),
            selector: RoundRobinSelector::new(),
            instances: InstanceTable::new(),
            cache: FallbackCache::new(cache_ttl),
        }
    }

    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            breakers: Arc::new(BreakerRegistry::from_config(&config.breaker)),
            selector: RoundRobinSelector::new(),
            instances: InstanceTable::new(),
            cache: FallbackCache::new(config.fallback_cache.ttl()),
        }
    }

    /// Forget instances unseen for `max_age`, their breakers, and expired cache entries.
    pub fn sweep_at(&self, now: Instant, max_age: Duration) -> SweepReport {
        let instances = self.instances.sweep_stale_at(now, max_age);
        let breakers = self.breakers.sweep(|id| self.instances.contains(id));
        let cache_entries = self.cache.purge_expired_at(now);
        SweepReport {
            instances,
            breakers,
            cache_entries,
        }
    }
}
