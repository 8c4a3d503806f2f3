//! Routing identities and discovery result types.

use std::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Routing identity of a logical service, derived from a target hostname.
///
/// Normalized on construction: lowercased, port and trailing dot stripped, so
/// `App.Example.com:443` and `app.example.com` share one cursor, one cache
/// entry and one set of instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ServiceKey(String);

impl ServiceKey {
    /// Parse a hostname (optionally with a port) into a key.
    /// Returns `None` for empty or whitespace-only input.
    pub fn parse(host: &str) -> Option<Self> {
        let host = host.trim();
        // IPv6 literals keep their colons; only a lone colon introduces a port.
        let without_port = if host.starts_with('[') {
            host.split_once(']').map(|(h, _)| &h[1..]).unwrap_or(host)
        } else if host.matches(':').count() == 1 {
            host.split_once(':').map(|(h, _)| h).unwrap_or(host)
        } else {
            host
        };
        let normalized = without_port.trim_end_matches('.').to_ascii_lowercase();
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of a backend instance for the lifetime of its container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn default_healthy() -> bool {
    true
}

/// One running unit capable of serving a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInstance {
    pub id: InstanceId,
    /// `host:port` or a full `http://` base URL.
    pub address: String,
    /// Last result of the background health probe (true until probed).
    #[serde(default = "default_healthy", rename = "lastKnownHealthy", alias = "last_known_healthy")]
    pub last_known_healthy: bool,
}

impl BackendInstance {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: InstanceId::new(id),
            address: address.into(),
            last_known_healthy: true,
        }
    }

    /// Base URL requests to this instance are built from.
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        if self.address.contains("://") {
            Url::parse(&self.address)
        } else {
            Url::parse(&format!("http://{}", self.address))
        }
    }
}

/// Failure of the discovery source.
///
/// Every transport error, timeout, non-success status, malformed body and
/// empty instance list collapses into this one variant so callers cannot
/// mistake an outage for "service has no backends".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("discovery unavailable for {service}: {reason}")]
    Unavailable { service: ServiceKey, reason: String },
}

impl DiscoveryError {
    pub fn unavailable(service: &ServiceKey, reason: impl Into<String>) -> Self {
        DiscoveryError::Unavailable {
            service: service.clone(),
            reason: reason.into(),
        }
    }
}
