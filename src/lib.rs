//! Service Router Library
//!
//! Routes requests addressed to a hostname onto one of the backend instances
//! registered for it, skipping instances whose circuit breaker is open and
//! falling back to a short-lived cache when discovery is down.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────▶ http::server ──▶ routing::ServiceRouter
//!                                     │ RESOLVING   discovery ─┬─▶ registry
//!                                     │                        └─▶ fallback cache
//!                                     │ SELECTING   breakers + probe health ─▶ round robin
//!                                     │ FORWARDING  routing::Forwarder ─────────────▶ instance
//!     ◀────────── http::response ◀────┘
//!
//!     health::HealthMonitor ──(probe every interval)──▶ instances
//!     admin (separate listener) ──▶ read-only view of breakers, instances, cache
//! ```

// Core subsystems
pub mod config;
pub mod discovery;
pub mod http;
pub mod routing;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::RouterConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::ServiceRouter;
