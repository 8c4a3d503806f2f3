//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Selection:
//!     → circuit_breaker.rs is_eligible (filter instances)
//!     → circuit_breaker.rs try_acquire (claim request / half-open probe)
//! Forwarding outcome:
//!     → BreakerPermit::succeed / fail (or drop on cancellation)
//! ```
//!
//! # Design Decisions
//! - Breakers are per instance, never global
//! - No transparent retries: one routing attempt, one forwarded request
//! - Timeouts live with the call they bound (discovery client, forwarder)

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerPermit, BreakerRegistry, BreakerSnapshot, CircuitState};
