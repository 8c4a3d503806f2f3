//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (target hostname → ServiceKey)
//!     → router.rs RESOLVING (discovery, fallback cache)
//!     → router.rs SELECTING (breaker + probe health filter, round robin)
//!     → forward.rs FORWARDING (bounded upstream call)
//!     → outcome recorded into the instance's breaker
//!     → Routed response or RouteError
//! ```
//!
//! # Design Decisions
//! - Shared state lives in registry.rs and is passed in, never global
//! - Deterministic failures: every condition the router understands maps to a typed error
//! - No transparent retries

pub mod error;
pub mod forward;
pub mod registry;
pub mod router;

pub use error::{RouteError, UnavailableReason};
pub use forward::{ForwardError, ForwardRequest, Forwarder};
pub use registry::RoutingRegistry;
pub use router::{InstanceSource, Routed, ServiceRouter};
