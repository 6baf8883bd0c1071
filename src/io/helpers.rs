//! Retry and pagination helpers for gateway implementations.
//!
//! - [`retry_with_backoff`] - Retry transient failures with exponential backoff
//! - [`paginate`] - Fetch all pages from a paginated listing
//! - [`RetryingStore`] - An [`ObjectStore`] decorator applying [`retry_with_backoff`]
//! - [`store_for`] - Pick the plain or retrying write path from a [`RetryConfig`]

use crate::io::store::{ObjectReference, ObjectStore, StoreResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

// ============================================================================
// Retry Helper
// ============================================================================

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A configuration that performs exactly one attempt.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn next_delay(&self, delay_ms: u64) -> u64 {
        let scaled = (delay_ms as f64 * self.backoff_multiplier.max(1.0)).round();
        // saturating float-to-int conversion
        (scaled as u64).min(self.max_delay_ms)
    }
}

/// Retry a gateway call with exponential backoff
///
/// Only transient failures (throttling, network) are retried; anything else
/// is returned immediately.
///
/// # Errors
///
/// Returns the last error once it is non-transient or `max_attempts` is reached
pub fn retry_with_backoff<F, T>(config: &RetryConfig, mut operation: F) -> StoreResult<T>
where
    F: FnMut() -> StoreResult<T>,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;
        match operation() {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_transient() || attempt >= config.max_attempts {
                    return Err(err);
                }
                warn!(attempt, delay_ms, error = %err, "transient store error, retrying");
                std::thread::sleep(Duration::from_millis(delay_ms));
                delay_ms = config.next_delay(delay_ms);
            }
        }
    }
}

// ============================================================================
// Pagination Helper
// ============================================================================

/// Configuration for pagination
#[derive(Debug, Clone, Copy)]
pub struct PaginationConfig {
    pub page_size: u32,
    pub max_pages: Option<u32>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            max_pages: None,
        }
    }
}

/// Fetch every page and concatenate the items.
///
/// `fetch_page(page, page_size)` returns `(items, has_more)`.
///
/// # Errors
///
/// Returns an error if any page fetch operation fails
pub fn paginate<T, F>(config: &PaginationConfig, mut fetch_page: F) -> StoreResult<Vec<T>>
where
    F: FnMut(u32, u32) -> StoreResult<(Vec<T>, bool)>,
{
    let mut all_items = Vec::new();
    let mut page = 0;

    loop {
        let (items, has_more) = fetch_page(page, config.page_size)?;
        all_items.extend(items);
        page += 1;

        if !has_more || config.max_pages.is_some_and(|max| page >= max) {
            break;
        }
    }

    Ok(all_items)
}

// ============================================================================
// RetryingStore
// ============================================================================

/// Wraps a gateway so every call goes through [`retry_with_backoff`].
pub struct RetryingStore {
    inner: Arc<dyn ObjectStore>,
    config: RetryConfig,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn ObjectStore>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

impl ObjectStore for RetryingStore {
    fn list(&self, container: &str, prefix: &str) -> StoreResult<Vec<ObjectReference>> {
        retry_with_backoff(&self.config, || self.inner.list(container, prefix))
    }

    fn get(&self, container: &str, key: &str) -> StoreResult<Bytes> {
        retry_with_backoff(&self.config, || self.inner.get(container, key))
    }

    fn put(&self, container: &str, key: &str, data: &[u8]) -> StoreResult<()> {
        retry_with_backoff(&self.config, || self.inner.put(container, key, data))
    }
}

/// Select the gateway path once, at construction time.
pub fn store_for(store: Arc<dyn ObjectStore>, retry: &RetryConfig) -> Arc<dyn ObjectStore> {
    if retry.max_attempts > 1 {
        Arc::new(RetryingStore::new(store, *retry))
    } else {
        store
    }
}
