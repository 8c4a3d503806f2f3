//! Configuration loading from disk and environment.
//!
//! Order of precedence: defaults, then the TOML file (if any), then
//! `ROUTER_*` environment variables.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::config::schema::RouterConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value {value:?} for {var}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from an optional TOML file and the process environment.
pub fn load_config(path: Option<&Path>) -> Result<RouterConfig, ConfigError> {
    load_config_with_env(path, |var| std::env::var(var).ok())
}

/// Same as [`load_config`] with an injectable environment lookup.
pub fn load_config_with_env(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<RouterConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)?
        }
        None => RouterConfig::default(),
    };

    apply_env_overrides(&mut config, env)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay `ROUTER_*` variables onto `config`.
pub fn apply_env_overrides(
    config: &mut RouterConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(v) = env("ROUTER_BIND_ADDRESS") {
        config.listener.bind_address = v;
    }
    if let Some(v) = env("ROUTER_DISCOVERY_ENDPOINT") {
        config.discovery.endpoint = v;
    }
    if let Some(v) = env("ROUTER_LOG_LEVEL") {
        config.observability.log_level = v;
    }
    if let Some(v) = env("ROUTER_ADMIN_API_KEY") {
        config.admin.api_key = v;
    }

    override_parsed(&env, "ROUTER_DISCOVERY_TIMEOUT_MS", &mut config.discovery.timeout_ms)?;
    override_parsed(&env, "ROUTER_BREAKER_THRESHOLD", &mut config.breaker.failure_threshold)?;
    override_parsed(&env, "ROUTER_BREAKER_RESET_TIMEOUT_SECS", &mut config.breaker.reset_timeout_secs)?;
    override_parsed(&env, "ROUTER_BREAKER_COUNT_5XX", &mut config.breaker.count_server_errors)?;
    override_parsed(&env, "ROUTER_CACHE_TTL_SECS", &mut config.fallback_cache.ttl_secs)?;
    override_parsed(&env, "ROUTER_HEALTH_INTERVAL_SECS", &mut config.health_check.interval_secs)?;
    override_parsed(&env, "ROUTER_FORWARD_TIMEOUT_SECS", &mut config.forwarding.timeout_secs)?;

    Ok(())
}

fn override_parsed<T>(
    env: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    target: &mut T,
) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = env(var) else {
        return Ok(());
    };
    *target = raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    Ok(())
}
