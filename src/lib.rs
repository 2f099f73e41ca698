//! Tiered key-value caching.
//!
//! - [`LruCache`]: bounded in-memory cache with batched least-recently-used eviction
//! - [`FileBackedCache`]: durable cache over an append-only log file with an in-memory
//!   index rebuilt on open, optional LZ4 compression and per-record expiry
//! - [`TieredCache`]: a fast tier in front of a slow one, with read-through promotion and
//!   write-through updates
//!
//! All three implement [`Cache`], so tiers compose freely.
//!
//! ```no_run
//! use tiered_cache::{Cache, FileBackedCache, FileCacheConfig, LruCache, TieredCache};
//!
//! # fn main() -> tiered_cache::Result<()> {
//! let durable: FileBackedCache<String, String> =
//!     FileBackedCache::open("/tmp/example.cache", FileCacheConfig::default())?;
//! let fast: LruCache<String, String> = LruCache::new(1000)?;
//! let mut cache = TieredCache::new(Box::new(fast), Box::new(durable));
//!
//! cache.put(&"greeting".to_string(), "hello".to_string())?;
//! assert_eq!(cache.get(&"greeting".to_string())?, Some("hello".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! None of the caches lock internally. Wrap an instance in a mutex to share it.

pub mod binary;
pub mod clock;
pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod store;
pub mod tiered;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{BincodeCodec, JsonCodec, RecordCodec};
pub use config::{FileCacheConfig, LruConfig};
pub use error::{Error, Result};
pub use store::append_log::{
    BincodeFileBackedCache, FileBackedCache, JsonFileBackedCache, RebuildStats,
};
pub use store::replacement::lru::LruCache;
pub use store::{BoxedCache, Cache, KeyIterator};
pub use tiered::{TierLookup, TieredCache};
