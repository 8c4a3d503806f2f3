//! Routing error taxonomy.
//!
//! `DiscoveryUnavailable` never appears here: it is recovered through the
//! fallback cache and only surfaces as `CacheMiss` when that fails too.

use std::fmt;
use serde::Serialize;
use thiserror::Error;

use crate::routing::forward::ForwardError;

/// Why no instance could be chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnavailableReason {
    /// Discovery failed and no fresh fallback entry exists.
    CacheMiss,
    /// Instances are known but all are excluded by breaker or probe health.
    NoEligibleInstance,
}

impl UnavailableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnavailableReason::CacheMiss => "CacheMiss",
            UnavailableReason::NoEligibleInstance => "NoEligibleInstance",
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one routing attempt.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("service unavailable: {0}")]
    ServiceUnavailable(UnavailableReason),

    #[error("forwarding failed: {0}")]
    Forwarding(#[from] ForwardError),

    #[error("request names no target hostname")]
    MissingTarget,

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl RouteError {
    /// Metric label for the outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            RouteError::ServiceUnavailable(UnavailableReason::CacheMiss) => "cache_miss",
            RouteError::ServiceUnavailable(UnavailableReason::NoEligibleInstance) => "no_eligible_instance",
            RouteError::Forwarding(_) => "forwarding_failure",
            RouteError::MissingTarget => "missing_target",
            RouteError::BodyTooLarge { .. } => "body_too_large",
        }
    }
}
