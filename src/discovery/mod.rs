//! Discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Router needs instances for a hostname
//!     → client.rs (registry lookup, bounded timeout)
//!         → Ok: instances → cache.rs put (write-through)
//!         → Err(Unavailable) → cache.rs get
//!             → fresh entry: stale-but-recent instances
//!             → CacheMiss: request fails fast
//! ```
//!
//! # Design Decisions
//! - The router only reads instances; the registry owns their lifecycle
//! - Outage and "no instances" are never conflated
//! - Cache TTL is checked on every read

pub mod cache;
pub mod client;
pub mod types;

pub use cache::{CacheMiss, FallbackCache, FallbackCacheEntry};
pub use client::{Discovery, HttpDiscovery};
pub use types::{BackendInstance, DiscoveryError, InstanceId, ServiceKey};
