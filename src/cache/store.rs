//! Cache entries and the storage contract.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::client::constants::DEFAULT_MAX_CACHE_ENTRIES;
use crate::error::BoxError;
use crate::message::{Headers, Response};

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: Bytes,
    pub url: Option<Url>,
    pub stored_at: SystemTime,
    /// Fresh until this instant. `None` means only the validator is usable.
    pub expires_at: Option<SystemTime>,
    pub etag: Option<String>,
}

impl CachedResponse {
    /// Returns true while the entry may be served without revalidation.
    #[must_use]
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires_at| now < expires_at)
    }

    /// An entry with neither an expiry nor a validator is never persisted.
    #[must_use]
    pub fn is_storable(&self) -> bool {
        self.expires_at.is_some() || self.etag.is_some()
    }

    /// Rebuilds a response with a replayable body.
    #[must_use]
    pub fn to_response(&self) -> Response {
        let mut builder = Response::builder(self.status)
            .status_text(self.status_text.clone())
            .headers(self.headers.clone())
            .body(self.body.clone());
        if let Some(url) = &self.url {
            builder = builder.url(url.clone());
        }
        builder.build()
    }
}

/// Errors reported by a [`CacheStore`] backend.
#[derive(Debug, Error)]
pub enum CacheStoreError {
    /// The backend could not be reached.
    #[error("cache backend unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A stored entry could not be decoded.
    #[error("corrupt cache entry for {key}")]
    Corrupt { key: String },
}

/// Pluggable response storage.
///
/// Implementations must tolerate concurrent calls from many requests.
#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug {
    async fn read(&self, key: &str) -> Result<Option<CachedResponse>, CacheStoreError>;

    async fn write(&self, key: &str, value: CachedResponse) -> Result<(), CacheStoreError>;

    async fn delete(&self, key: &str) -> Result<(), CacheStoreError>;

    async fn clear(&self) -> Result<(), CacheStoreError>;
}

#[derive(Default)]
struct Lru {
    entries: HashMap<String, (u64, CachedResponse)>,
    /// Recency index: lowest tick is the least recently used key.
    order: BTreeMap<u64, String>,
    tick: u64,
}

impl Lru {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &str) -> Option<&CachedResponse> {
        let tick = self.next_tick();
        let (stamp, _) = self.entries.get(key)?;
        self.order.remove(stamp);
        self.order.insert(tick, key.to_string());
        let entry = self.entries.get_mut(key)?;
        entry.0 = tick;
        Some(&entry.1)
    }

    fn insert(&mut self, key: &str, value: CachedResponse, max_entries: usize) -> Vec<String> {
        let tick = self.next_tick();
        if let Some((stamp, _)) = self.entries.insert(key.to_string(), (tick, value)) {
            self.order.remove(&stamp);
        }
        self.order.insert(tick, key.to_string());

        let mut evicted = Vec::new();
        while self.entries.len() > max_entries {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    fn remove(&mut self, key: &str) {
        if let Some((stamp, _)) = self.entries.remove(key) {
            self.order.remove(&stamp);
        }
    }
}

/// In-memory bounded LRU store.
///
/// `read` promotes the entry to most recently used; a `write` that pushes the
/// store past `max_entries` evicts the least recently used entry.
pub struct MemoryCacheStore {
    max_entries: usize,
    lru: Mutex<Lru>,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CACHE_ENTRIES)
    }
}

impl fmt::Debug for MemoryCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCacheStore")
            .field("max_entries", &self.max_entries)
            .field("len", &self.len())
            .finish()
    }
}

impl MemoryCacheStore {
    /// Creates a store holding at most `max_entries` (minimum 1).
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            lru: Mutex::new(Lru::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lru> {
        self.lru.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` is stored, without changing its recency.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn read(&self, key: &str) -> Result<Option<CachedResponse>, CacheStoreError> {
        Ok(self.lock().touch(key).cloned())
    }

    async fn write(&self, key: &str, value: CachedResponse) -> Result<(), CacheStoreError> {
        let evicted = self.lock().insert(key, value, self.max_entries);
        for key in evicted {
            tracing::debug!(%key, "evicted least recently used cache entry");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheStoreError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheStoreError> {
        *self.lock() = Lru::default();
        Ok(())
    }
}
