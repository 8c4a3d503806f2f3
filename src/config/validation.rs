//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, threshold ≥ 1)
//! - Check addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::{RouterConfig, PLACEHOLDER_API_KEY};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("discovery.endpoint is not an http(s) URL: {0}")]
    InvalidEndpoint(String),

    #[error("health_check.path must start with '/': {0}")]
    InvalidProbePath(String),

    #[error("admin.api_key must be changed when the admin API is enabled")]
    PlaceholderApiKey,

    #[error("forwarding.timeout_secs ({forward}) exceeds forwarding.request_deadline_secs ({deadline})")]
    DeadlineShorterThanTimeout { forward: u64, deadline: u64 },
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let non_zero: [(&'static str, u64); 8] = [
        ("breaker.failure_threshold", u64::from(config.breaker.failure_threshold)),
        ("breaker.reset_timeout_secs", config.breaker.reset_timeout_secs),
        ("fallback_cache.ttl_secs", config.fallback_cache.ttl_secs),
        ("discovery.timeout_ms", config.discovery.timeout_ms),
        ("health_check.interval_secs", config.health_check.interval_secs),
        ("health_check.timeout_secs", config.health_check.timeout_secs),
        ("forwarding.timeout_secs", config.forwarding.timeout_secs),
        ("listener.max_connections", config.listener.max_connections as u64),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_socket_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::PlaceholderApiKey);
        }
    }

    match Url::parse(&config.discovery.endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
        _ => errors.push(ValidationError::InvalidEndpoint(config.discovery.endpoint.clone())),
    }

    if !config.health_check.path.starts_with('/') {
        errors.push(ValidationError::InvalidProbePath(config.health_check.path.clone()));
    }

    if config.forwarding.timeout_secs > config.forwarding.request_deadline_secs {
        errors.push(ValidationError::DeadlineShorterThanTimeout {
            forward: config.forwarding.timeout_secs,
            deadline: config.forwarding.request_deadline_secs,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
