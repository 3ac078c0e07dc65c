//! Partitioned port pool allocator.
//!
//! Four logical pools back the fleet: host ports (non-VPN mode), the
//! engine's own container HTTP/HTTPS ports, and one pool per VPN for its
//! forwarded-port range. All four share a single allocator-wide mutex
//! (spec.md §4.6) — allocation is rare enough that finer-grained locking
//! buys nothing.

pub mod allocator;
pub mod error;
pub mod pool;

pub use allocator::{PortAllocator, PortAllocatorConfig};
pub use error::{PortError, Result};
pub use pool::PortPool;
