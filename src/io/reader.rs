//! Source-object read strategies.
//!
//! The converter reads inputs through a [`SourceReader`]. Two interchangeable
//! implementations exist and one is picked at construction by [`reader_for`]:
//!
//! - [`DirectReader`] - every read goes to the gateway
//! - [`CachedReader`] - a bounded LRU cache keyed by `(container, key)` in
//!   front of the gateway
//!
//! The cache is the only structure shared by concurrent conversion tasks, so
//! its map and eviction bookkeeping sit behind a mutex. Misses for the same
//! key are single-flight: concurrent readers of one key wait for a single
//! gateway `get` instead of issuing their own. Failed reads are never cached.

use crate::error::ReadFailure;
use crate::io::store::ObjectStore;
use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Read capability used by the converter.
pub trait SourceReader: Send + Sync {
    /// Fetch the full contents of an object.
    ///
    /// # Errors
    ///
    /// Returns [`ReadFailure`] carrying the container, key and gateway cause
    fn read(&self, container: &str, key: &str) -> Result<Bytes, ReadFailure>;

    /// Hit/miss counters, for readers that cache.
    fn cache_stats(&self) -> Option<CacheStats> {
        None
    }
}

/// Cache counters reported in batch metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fetch(store: &dyn ObjectStore, container: &str, key: &str) -> Result<Bytes, ReadFailure> {
    let start = Instant::now();
    let data = store
        .get(container, key)
        .map_err(|source| ReadFailure::new(container, key, source))?;
    debug!(
        container,
        key,
        bytes = data.len(),
        elapsed_secs = start.elapsed().as_secs_f64(),
        "object read"
    );
    Ok(data)
}

// ============================================================================
// DirectReader
// ============================================================================

/// Pass-through reader: one gateway `get` per read.
pub struct DirectReader {
    store: Arc<dyn ObjectStore>,
}

impl DirectReader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

impl SourceReader for DirectReader {
    fn read(&self, container: &str, key: &str) -> Result<Bytes, ReadFailure> {
        fetch(self.store.as_ref(), container, key)
    }
}

// ============================================================================
// CachedReader
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    container: String,
    key: String,
}

impl CacheKey {
    fn new(container: &str, key: &str) -> Self {
        Self {
            container: container.to_string(),
            key: key.to_string(),
        }
    }
}

/// LRU read-through cache in front of the gateway.
pub struct CachedReader {
    store: Arc<dyn ObjectStore>,
    entries: Mutex<LruCache<CacheKey, Bytes>>,
    loading: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedReader {
    pub fn new(store: Arc<dyn ObjectStore>, capacity: NonZeroUsize) -> Self {
        Self {
            store,
            entries: Mutex::new(LruCache::new(capacity)),
            loading: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        lock(&self.entries).cap().get()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `(container, key)` is currently cached. Does not touch recency.
    #[must_use]
    pub fn contains(&self, container: &str, key: &str) -> bool {
        lock(&self.entries).contains(&CacheKey::new(container, key))
    }

    fn lookup(&self, cache_key: &CacheKey) -> Option<Bytes> {
        let hit = lock(&self.entries).get(cache_key).cloned();
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(container = %cache_key.container, key = %cache_key.key, "cache hit");
        }
        hit
    }

    fn gate(&self, cache_key: &CacheKey) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.loading).entry(cache_key.clone()).or_default())
    }

    fn release(&self, cache_key: &CacheKey, gate: &Arc<Mutex<()>>) {
        let mut loading = lock(&self.loading);
        if loading.get(cache_key).is_some_and(|g| Arc::ptr_eq(g, gate)) {
            loading.remove(cache_key);
        }
    }

    #[cfg(test)]
    fn pending_loads(&self) -> usize {
        lock(&self.loading).len()
    }

    fn load(&self, cache_key: &CacheKey) -> Result<Bytes, ReadFailure> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(container = %cache_key.container, key = %cache_key.key, "cache miss");
        let data = fetch(self.store.as_ref(), &cache_key.container, &cache_key.key)?;
        lock(&self.entries).put(cache_key.clone(), data.clone());
        Ok(data)
    }
}

/// Drops a key's single-flight gate once its load finishes, even when the
/// gateway panics mid-load.
struct GateRelease<'a> {
    reader: &'a CachedReader,
    gate: Arc<Mutex<()>>,
    cache_key: &'a CacheKey,
}

impl Drop for GateRelease<'_> {
    fn drop(&mut self) {
        self.reader.release(self.cache_key, &self.gate);
    }
}

impl SourceReader for CachedReader {
    fn read(&self, container: &str, key: &str) -> Result<Bytes, ReadFailure> {
        let cache_key = CacheKey::new(container, key);
        if let Some(hit) = self.lookup(&cache_key) {
            return Ok(hit);
        }

        let gate = GateRelease {
            reader: self,
            gate: self.gate(&cache_key),
            cache_key: &cache_key,
        };
        let _loading = lock(&gate.gate);
        match self.lookup(&cache_key) {
            Some(hit) => Ok(hit),
            None => self.load(&cache_key),
        }
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        let entries = lock(&self.entries);
        Some(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.cap().get(),
        })
    }
}

/// Pick the read strategy once: a cache of `cache_size` entries, or none
/// when `cache_size` is zero.
pub fn reader_for(store: Arc<dyn ObjectStore>, cache_size: usize) -> Arc<dyn SourceReader> {
    match NonZeroUsize::new(cache_size) {
        Some(capacity) => Arc::new(CachedReader::new(store, capacity)),
        None => Arc::new(DirectReader::new(store)),
    }
}
