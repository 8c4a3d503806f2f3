//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each known instance (GET {address}/health)
//!     → Update probe state in the instance table
//!     → (optional) feed failures into the breaker
//!     → Sweep stale routing state
//! ```
//!
//! # Design Decisions
//! - Probe health and breaker state are two signals; selection requires both to allow an instance
//! - Probe failures do not touch breaker counters unless configured to
//! - Unknown (never probed) counts as healthy

pub mod active;

pub use active::HealthMonitor;
