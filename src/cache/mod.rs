//! Response caching.
//!
//! [`CacheMiddleware`] stores successful `GET`/`HEAD` responses according to
//! their `Cache-Control` directives and revalidates stale entries with
//! `If-None-Match` when an `ETag` is known. Storage sits behind the
//! [`CacheStore`] trait; [`MemoryCacheStore`] is a bounded in-process LRU.
//!
//! Time comes from a [`Clock`](crate::clock::Clock) so expiry can be tested
//! without sleeping.

mod control;
mod middleware;
mod store;

pub use control::CacheControl;
pub use middleware::{CacheMiddleware, default_cache_key};
pub use store::{CacheStore, CacheStoreError, CachedResponse, MemoryCacheStore};
