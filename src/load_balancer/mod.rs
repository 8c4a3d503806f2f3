//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Resolved instances for a service
//!     → backend.rs (observe, annotate probe health)
//!     → breaker + health filter (router)
//!     → round_robin.rs (pick among eligible)
//!     → backend.rs in-flight guard held while forwarding
//! ```
//!
//! # Design Decisions
//! - The selector never sees ineligible instances
//! - One cursor per service; fairness is best-effort when the set changes
//! - Health state is per instance id, not per service

pub mod backend;
pub mod round_robin;

pub use backend::{HealthCounts, HealthState, InFlightGuard, InstanceTable};
pub use round_robin::{NoEligibleInstance, RoundRobinSelector};
