//! Cache Module
//!
//! Bounded, restorable in-memory order cache with random eviction.

mod keyset;
mod stats;
mod store;


// Re-export public types
pub use keyset::RandomKeySet;
pub use stats::{CacheCounters, CacheStats};
pub use store::OrderCache;
