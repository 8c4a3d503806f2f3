//! Per-request routing state machine.
//!
//! # States
//! ```text
//! RESOLVING → SELECTING → FORWARDING → { SUCCEEDED, FAILED }
//!
//! RESOLVING:  discovery ok → write-through to cache
//!             discovery down → fresh cache entry, else FAILED(CacheMiss)
//! SELECTING:  probe-healthy ∧ breaker-eligible → round robin
//!             nothing eligible → FAILED(NoEligibleInstance)
//! FORWARDING: one upstream call, outcome recorded into the breaker
//! ```
//!
//! # Design Decisions
//! - No retry across instances; one attempt yields one forwarded request or one failure
//! - Losing the half-open probe race removes that instance from the candidate list
//!   and selection runs again over the rest; nothing has been sent at that point
//! - Upstream 5xx is passed through verbatim; whether it trips the breaker is configurable

use std::sync::Arc;
use std::time::{Duration, Instant};
use hyper::body::Incoming;
use axum::http::Response;

use crate::config::RouterConfig;
use crate::discovery::{BackendInstance, Discovery, InstanceId, ServiceKey};
use crate::observability::metrics;
use crate::resilience::BreakerPermit;
use crate::routing::error::{RouteError, UnavailableReason};
use crate::routing::forward::{ForwardRequest, Forwarder};
use crate::routing::registry::RoutingRegistry;

/// Where the instance set used for a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceSource {
    Live,
    Fallback { age: Duration },
}

/// A successfully forwarded request.
#[derive(Debug)]
pub struct Routed {
    pub instance: InstanceId,
    pub source: InstanceSource,
    pub response: Response<Incoming>,
}

/// Composes discovery, fallback cache, breakers, selector and forwarder.
pub struct ServiceRouter {
    discovery: Arc<dyn Discovery>,
    registry: Arc<RoutingRegistry>,
    forwarder: Forwarder,
    count_server_errors: bool,
}

impl ServiceRouter {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        registry: Arc<RoutingRegistry>,
        forwarder: Forwarder,
        count_server_errors: bool,
    ) -> Self {
        Self {
            discovery,
            registry,
            forwarder,
            count_server_errors,
        }
    }

    pub fn from_config(config: &RouterConfig, discovery: Arc<dyn Discovery>, registry: Arc<RoutingRegistry>) -> Self {
        Self::new(
            discovery,
            registry,
            Forwarder::new(config.forwarding.timeout()),
            config.breaker.count_server_errors,
        )
    }

    pub fn registry(&self) -> &Arc<RoutingRegistry> {
        &self.registry
    }

    /// Route one request for `service`.
    pub async fn route(&self, service: &ServiceKey, request: ForwardRequest) -> Result<Routed, RouteError> {
        let (candidates, source) = self.resolve(service).await?;
        let (instance, permit) = self.select(service, candidates)?;
        self.forward(service, instance, permit, source, request).await
    }

    /// RESOLVING: live instances, or a fresh fallback entry when discovery is down.
    pub async fn resolve(&self, service: &ServiceKey) -> Result<(Vec<BackendInstance>, InstanceSource), RouteError> {
        let live = match self.discovery.resolve(service).await {
            Ok(instances) if !instances.is_empty() => Ok(instances),
            Ok(_) => Err(format!("discovery returned no instances for {}", service)),
            Err(e) => Err(e.to_string()),
        };
        // Stamped after discovery returns: its timeout must not age the cache check.
        let now = Instant::now();

        let (mut instances, source) = match live {
            Ok(instances) => {
                self.registry.cache.put_at(service, instances.clone(), now);
                metrics::record_discovery("live");
                (instances, InstanceSource::Live)
            }
            Err(reason) => match self.registry.cache.get_at(service, now) {
                Ok(entry) => {
                    let age = now.saturating_duration_since(entry.cached_at);
                    tracing::warn!(service = %service, reason = %reason, age = ?age, "Discovery unavailable, serving cached instances");
                    metrics::record_discovery("fallback_hit");
                    (entry.instances, InstanceSource::Fallback { age })
                }
                Err(_) => {
                    tracing::warn!(service = %service, reason = %reason, "Discovery unavailable and no usable cache entry");
                    metrics::record_discovery("fallback_miss");
                    return Err(RouteError::ServiceUnavailable(UnavailableReason::CacheMiss));
                }
            },
        };

        self.registry.instances.observe_at(service, &instances, now);
        self.registry.instances.annotate(&mut instances);
        Ok((instances, source))
    }

    /// SELECTING: round robin over eligible candidates, claiming a breaker permit.
    pub fn select(
        &self,
        service: &ServiceKey,
        candidates: Vec<BackendInstance>,
    ) -> Result<(BackendInstance, BreakerPermit), RouteError> {
        self.select_at(service, candidates, Instant::now())
    }

    pub fn select_at(
        &self,
        service: &ServiceKey,
        mut candidates: Vec<BackendInstance>,
        now: Instant,
    ) -> Result<(BackendInstance, BreakerPermit), RouteError> {
        let breakers = &self.registry.breakers;
        loop {
            let eligible: Vec<BackendInstance> = candidates
                .iter()
                .filter(|i| i.last_known_healthy && breakers.is_eligible_at(&i.id, now))
                .cloned()
                .collect();

            let picked = match self.registry.selector.select(service, &eligible) {
                Ok(instance) => instance.clone(),
                Err(e) => {
                    tracing::warn!(service = %service, known = candidates.len(), "{}", e);
                    return Err(RouteError::ServiceUnavailable(UnavailableReason::NoEligibleInstance));
                }
            };

            match breakers.try_acquire_at(&picked.id, now) {
                Some(permit) => {
                    tracing::debug!(service = %service, instance = %picked.id, probe = permit.is_probe(), "Instance selected");
                    return Ok((picked, permit));
                }
                None => {
                    tracing::debug!(service = %service, instance = %picked.id, "Lost half-open probe race, reselecting");
                    candidates.retain(|i| i.id != picked.id);
                }
            }
        }
    }

    /// FORWARDING: one upstream call, outcome reported through the permit.
    async fn forward(
        &self,
        service: &ServiceKey,
        instance: BackendInstance,
        permit: BreakerPermit,
        source: InstanceSource,
        request: ForwardRequest,
    ) -> Result<Routed, RouteError> {
        let _in_flight = self.registry.instances.begin_request(&instance.id);

        match self.forwarder.forward(service, &instance, request).await {
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() && self.count_server_errors {
                    tracing::warn!(service = %service, instance = %instance.id, status = %status, "Upstream error counted against breaker");
                    permit.fail();
                } else {
                    permit.succeed();
                }
                Ok(Routed {
                    instance: instance.id,
                    source,
                    response,
                })
            }
            Err(e) => {
                tracing::warn!(service = %service, instance = %instance.id, address = %instance.address, error = %e, "Forwarding failed");
                permit.fail();
                Err(RouteError::Forwarding(e))
            }
        }
    }
}

impl std::fmt::Debug for ServiceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRouter")
            .field("forwarder", &self.forwarder)
            .field("count_server_errors", &self.count_server_errors)
            .finish()
    }
}
