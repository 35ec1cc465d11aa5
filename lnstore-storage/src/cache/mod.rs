//! In-process read cache with authority tracking.
//!
//! The cache is owned by a single [`PagedStore`](crate::PagedStore) and is
//! only ever touched under its lock. It is never persisted.

mod authority;
mod stats;

pub use authority::{Authority, AuthorityCache, CacheEntry, CacheNode, Scope};
pub use stats::CacheStats;
