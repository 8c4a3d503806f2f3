//! Discovery client.
//!
//! # Responsibilities
//! - Ask the registry for the healthy instances behind a hostname
//! - Bound every lookup with a timeout
//! - Normalize every failure mode to `DiscoveryError::Unavailable`
//!
//! # Design Decisions
//! - `Discovery` is a trait so the router can be driven by a scripted source in tests
//! - An empty or fully malformed instance list is an outage, not "no backends"

use std::collections::HashSet;
use std::time::Duration;
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::DiscoveryConfig;
use crate::discovery::types::{BackendInstance, DiscoveryError, ServiceKey};

/// A source of live instance sets.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Resolve the current healthy instances for a service.
    async fn resolve(&self, service: &ServiceKey) -> Result<Vec<BackendInstance>, DiscoveryError>;
}

#[derive(Debug, Deserialize)]
struct HealthyInstancesResponse {
    instances: Vec<RawInstance>,
}

#[derive(Debug, Deserialize)]
struct RawInstance {
    id: Option<String>,
    address: Option<String>,
}

/// Discovery over the registry's HTTP API:
/// `GET {endpoint}/services/healthy?app_hostname=<host>`.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    client: reqwest::Client,
    lookup_url: String,
    timeout: Duration,
}

impl HttpDiscovery {
    pub fn new(config: &DiscoveryConfig) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            lookup_url: format!("{}/services/healthy", config.endpoint.trim_end_matches('/')),
            timeout,
        })
    }

    async fn fetch(&self, service: &ServiceKey) -> Result<HealthyInstancesResponse, DiscoveryError> {
        let response = self
            .client
            .get(&self.lookup_url)
            .query(&[("app_hostname", service.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DiscoveryError::unavailable(service, format!("timed out after {:?}", self.timeout))
                } else {
                    DiscoveryError::unavailable(service, format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::unavailable(service, format!("registry returned {}", status)));
        }

        response
            .json::<HealthyInstancesResponse>()
            .await
            .map_err(|e| DiscoveryError::unavailable(service, format!("malformed response: {}", e)))
    }
}

#[async_trait]
impl Discovery for HttpDiscovery {
    async fn resolve(&self, service: &ServiceKey) -> Result<Vec<BackendInstance>, DiscoveryError> {
        let body = self.fetch(service).await?;
        let instances = sanitize_instances(service, body.instances);

        if instances.is_empty() {
            return Err(DiscoveryError::unavailable(service, "registry returned no usable instances"));
        }

        tracing::debug!(service = %service, count = instances.len(), "Resolved instances");
        Ok(instances)
    }
}

/// Drop entries without an id, with an unusable address, or repeating an id.
fn sanitize_instances(service: &ServiceKey, raw: Vec<RawInstance>) -> Vec<BackendInstance> {
    let mut seen = HashSet::new();
    let mut instances = Vec::with_capacity(raw.len());

    for entry in raw {
        let (Some(id), Some(address)) = (entry.id, entry.address) else {
            tracing::warn!(service = %service, "Skipping discovery entry without id or address");
            continue;
        };
        if id.trim().is_empty() || address.trim().is_empty() {
            tracing::warn!(service = %service, "Skipping discovery entry with blank id or address");
            continue;
        }

        let instance = BackendInstance::new(id, address);
        if instance.base_url().is_err() {
            tracing::warn!(service = %service, instance = %instance.id, address = %instance.address, "Skipping instance with invalid address");
            continue;
        }
        if !seen.insert(instance.id.clone()) {
            continue;
        }
        instances.push(instance);
    }

    instances
}
