//! Object storage access.
//!
//! - [`store`] - the [`ObjectStore`](store::ObjectStore) gateway trait and its types
//! - [`memory`] - an instrumented in-memory store for tests
//! - [`local`] - a directory-backed store for local runs
//! - [`helpers`] - retry with backoff, pagination, and the retrying decorator
//! - [`reader`] - source-read strategies, including the LRU cache

pub mod helpers;
pub mod local;
pub mod memory;
pub mod reader;
pub mod store;

pub use helpers::{RetryConfig, RetryingStore, store_for};
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use reader::{CacheStats, CachedReader, DirectReader, SourceReader, reader_for};
pub use store::{ObjectReference, ObjectStore, StoreError, StoreErrorKind, StoreResult};
