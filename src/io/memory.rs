//! In-memory [`ObjectStore`] for tests and local experiments.
//!
//! Beyond plain storage, [`MemoryObjectStore`] counts calls, can inject
//! latency to imitate network waits, and can be told to fail specific
//! operations so partial-failure behavior can be exercised.

use crate::io::helpers::{PaginationConfig, paginate};
use crate::io::store::{ObjectReference, ObjectStore, StoreError, StoreErrorKind, StoreResult};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type BucketStorage = Arc<Mutex<HashMap<String, BTreeMap<String, StoredObject>>>>;
type KeyCounts = Arc<Mutex<HashMap<(String, String), usize>>>;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: i64,
}

#[derive(Default)]
struct Faults {
    gets: HashMap<(String, String), StoreErrorKind>,
    put_suffixes: Vec<(String, StoreErrorKind)>,
    next_puts: Option<(u32, StoreErrorKind)>,
    list: Option<StoreErrorKind>,
}

#[derive(Default)]
struct Counters {
    lists: AtomicUsize,
    gets: AtomicUsize,
    puts: AtomicUsize,
    active_gets: AtomicUsize,
    peak_gets: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct MemoryObjectStore {
    storage: BucketStorage,
    faults: Arc<Mutex<Faults>>,
    counters: Arc<Counters>,
    gets_by_key: KeyCounts,
    latency_micros: Arc<AtomicU64>,
    clock: Arc<AtomicU64>,
    pagination: PaginationConfig,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: Arc::new(Mutex::new(HashMap::new())),
            faults: Arc::new(Mutex::new(Faults::default())),
            counters: Arc::new(Counters::default()),
            gets_by_key: Arc::new(Mutex::new(HashMap::new())),
            latency_micros: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(AtomicU64::new(0)),
            pagination: PaginationConfig::default(),
        }
    }

    /// Serve listings in pages of `page_size` keys.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.pagination.page_size = page_size.max(1);
        self
    }

    /// Sleep this long inside every `get` and `put`.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.store(micros, Ordering::Relaxed);
    }

    /// Create an empty container so that listing it succeeds.
    pub fn create_container(&self, container: &str) {
        lock(&self.storage).entry(container.to_string()).or_default();
    }

    /// Store an object directly, bypassing counters and faults.
    pub fn insert(&self, container: &str, key: &str, data: impl Into<Bytes>) {
        let last_modified = self.tick();
        lock(&self.storage).entry(container.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                last_modified,
            },
        );
    }

    /// Read an object directly, bypassing counters and faults.
    #[must_use]
    pub fn object(&self, container: &str, key: &str) -> Option<Bytes> {
        lock(&self.storage)
            .get(container)
            .and_then(|objects| objects.get(key))
            .map(|stored| stored.data.clone())
    }

    /// Every key currently stored in `container`, sorted.
    #[must_use]
    pub fn keys(&self, container: &str) -> Vec<String> {
        lock(&self.storage)
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Make every `get` of this object fail with `kind`.
    pub fn fail_get(&self, container: &str, key: &str, kind: StoreErrorKind) {
        lock(&self.faults)
            .gets
            .insert((container.to_string(), key.to_string()), kind);
    }

    /// Make every `put` whose key ends with `suffix` fail with `kind`.
    pub fn fail_puts_with_suffix(&self, suffix: &str, kind: StoreErrorKind) {
        lock(&self.faults)
            .put_suffixes
            .push((suffix.to_string(), kind));
    }

    /// Make the next `count` puts fail with `kind`, whatever their key.
    pub fn fail_next_puts(&self, count: u32, kind: StoreErrorKind) {
        lock(&self.faults).next_puts = Some((count, kind));
    }

    /// Make every `list` fail with `kind`.
    pub fn fail_list(&self, kind: StoreErrorKind) {
        lock(&self.faults).list = Some(kind);
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.counters.lists.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.counters.gets.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get_calls_for(&self, container: &str, key: &str) -> usize {
        lock(&self.gets_by_key)
            .get(&(container.to_string(), key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn put_calls(&self) -> usize {
        self.counters.puts.load(Ordering::SeqCst)
    }

    /// Highest number of `get` calls observed in flight at once.
    #[must_use]
    pub fn peak_concurrent_gets(&self) -> usize {
        self.counters.peak_gets.load(Ordering::SeqCst)
    }

    fn tick(&self) -> i64 {
        let now = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        i64::try_from(now).unwrap_or(i64::MAX)
    }

    fn simulate_latency(&self) {
        let micros = self.latency_micros.load(Ordering::Relaxed);
        if micros > 0 {
            std::thread::sleep(Duration::from_micros(micros));
        }
    }

    fn put_fault(&self, key: &str) -> Option<StoreErrorKind> {
        let mut faults = lock(&self.faults);
        if let Some((remaining, kind)) = faults.next_puts {
            faults.next_puts = (remaining > 1).then(|| (remaining - 1, kind));
            return Some(kind);
        }
        faults
            .put_suffixes
            .iter()
            .find(|(suffix, _)| key.ends_with(suffix.as_str()))
            .map(|&(_, kind)| kind)
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

struct ActiveGet<'a>(&'a Counters);

impl<'a> ActiveGet<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.active_gets.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_gets.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for ActiveGet<'_> {
    fn drop(&mut self) {
        self.0.active_gets.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ObjectStore for MemoryObjectStore {
    fn list(&self, container: &str, prefix: &str) -> StoreResult<Vec<ObjectReference>> {
        self.counters.lists.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = lock(&self.faults).list {
            return Err(StoreError::new(
                kind,
                format!("listing {container}/{prefix} failed"),
            ));
        }

        let snapshot: Vec<ObjectReference> = {
            let storage = lock(&self.storage);
            let objects = storage.get(container).ok_or_else(|| {
                StoreError::new(
                    StoreErrorKind::NotFound,
                    format!("container {container} not found"),
                )
            })?;
            objects
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, stored)| {
                    ObjectReference::new(container, key.clone())
                        .with_size(stored.data.len() as u64)
                        .with_last_modified(stored.last_modified)
                })
                .collect()
        };

        paginate(&self.pagination, |page, page_size| {
            let start = (page as usize).saturating_mul(page_size as usize);
            let end = start.saturating_add(page_size as usize).min(snapshot.len());
            let items = snapshot.get(start..end).unwrap_or_default().to_vec();
            Ok((items, end < snapshot.len()))
        })
    }

    fn get(&self, container: &str, key: &str) -> StoreResult<Bytes> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        *lock(&self.gets_by_key)
            .entry((container.to_string(), key.to_string()))
            .or_default() += 1;

        let _active = ActiveGet::enter(&self.counters);
        self.simulate_latency();

        let injected = lock(&self.faults)
            .gets
            .get(&(container.to_string(), key.to_string()))
            .copied();
        if let Some(kind) = injected {
            return Err(StoreError::new(
                kind,
                format!("injected failure reading {container}/{key}"),
            ));
        }

        self.object(container, key)
            .ok_or_else(|| StoreError::not_found(container, key))
    }

    fn put(&self, container: &str, key: &str, data: &[u8]) -> StoreResult<()> {
        self.counters.puts.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency();

        if let Some(kind) = self.put_fault(key) {
            return Err(StoreError::new(
                kind,
                format!("injected failure writing {container}/{key}"),
            ));
        }

        self.insert(container, key, Bytes::copy_from_slice(data));
        Ok(())
    }
}
