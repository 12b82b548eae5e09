//! Resilient caching layer between the catalog API and its consumers.
//!
//! This module provides:
//! - A two-tier cache (memory + durable key/value storage) with TTL freshness
//! - Content-hash change detection for background revalidation
//! - A fallback mirror that survives invalidation, so an outage can still be
//!   answered with the last known data
//! - Version-tagged entries; entries from another version read as misses

mod entry_store;
mod keys;
pub(crate) mod lock;
mod persistent;
mod storage;
mod traits;

pub use keys::{CatalogKey, BATCH_PREFIX};
pub use persistent::{CacheInfo, PersistentCache};
pub use storage::open_storage;
#[cfg(test)]
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource};
