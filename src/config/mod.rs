//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults
//!     → router.toml (optional, --config / ROUTER_CONFIG)
//!     → ROUTER_* environment overrides
//!     → validation.rs (semantic checks)
//!     → RouterConfig (validated, immutable)
//!     → each subsystem takes its own section at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A malformed override is an error, never silently dropped

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BreakerConfig, DiscoveryConfig, FallbackCacheConfig, ForwardingConfig,
    HealthCheckConfig, ListenerConfig, ObservabilityConfig, RouterConfig,
};
