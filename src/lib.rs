//! # Bucketbeam
//!
//! A **parallel batch converter** that turns CSV objects in an object store
//! into Parquet and Avro objects. Network waits are hidden behind two levels
//! of concurrency: many objects are converted at once, and each object's two
//! outputs are encoded and written at the same time.
//!
//! ## Key Features
//!
//! - **Bounded fan-out** - at most `max_workers` objects are in flight
//! - **Parse once, write twice** - Parquet and Avro are produced from one parsed row-set
//! - **Shared read cache** - an LRU cache in front of the store, single-flight per key
//! - **Partial-failure isolation** - one bad object never stops the batch
//! - **Deterministic output keys** - re-runs overwrite rather than duplicate
//! - **Pluggable storage** - anything implementing [`ObjectStore`]
//!
//! ## Quick Start
//!
//! ```
//! use bucketbeam::*;
//! use bucketbeam::io::memory::MemoryObjectStore;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = MemoryObjectStore::new();
//! store.insert("raw", "data/2024/file1.csv", "id,name\n1,alice\n2,bob\n");
//!
//! let config = ConverterConfig::new("raw").with_prefix("data/2024/");
//! let result = run(config, Arc::new(store.clone()))?;
//!
//! assert_eq!(result.success_count(), 1);
//! assert!(store.object("raw", "processed/file1.parquet").is_some());
//! assert!(store.object("raw", "processed/file1.avro").is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. The [`BatchOrchestrator`] lists the input prefix through the store
//! 2. Each object becomes one task on a rayon pool, with a sliding window of
//!    `max_workers` tasks
//! 3. The [`ObjectConverter`] reads through a [`SourceReader`](io::reader::SourceReader),
//!    parses the CSV, then writes both formats under `rayon::join`
//! 4. Outcomes are folded into a [`BatchResult`] as they arrive
//!
//! ## Module Overview
//!
//! - [`batch`] - Orchestrator, batch result and statistics
//! - [`convert`] - Per-object conversion and its outcome
//! - [`config`] - Configuration from code, environment or JSON
//! - [`format`] - CSV parsing, Parquet and Avro encoding
//! - [`io`] - Store trait, in-memory and local stores, retry and cache layers
//! - [`layout`] - Output-key derivation
//! - [`metrics`] - Batch counters
//! - [`telemetry`] - Tracing set-up
//! - [`testing`] - Fixtures for tests

pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod format;
pub mod io;
pub mod layout;
pub mod metrics;
pub mod telemetry;
pub mod testing;

pub use batch::{BatchOrchestrator, BatchResult, BatchStatistics};
pub use config::{ConfigError, ConverterConfig};
pub use convert::{ConversionOutcome, ObjectConverter};
pub use error::{ConversionError, EnumerationError, ReadFailure};
pub use format::{OutputFormat, ParquetCompression, RowSet};
pub use io::store::{ObjectReference, ObjectStore, StoreError, StoreErrorKind};
pub use layout::{OutputKeys, OutputLayout};
pub use metrics::MetricsSnapshot;

use std::sync::Arc;

/// Run one batch with `config` against `store`.
///
/// Object-level failures and a failed listing are reported inside the
/// returned [`BatchResult`], never as an error.
///
/// # Errors
/// Returns an error only if the configuration is invalid.
pub fn run(config: ConverterConfig, store: Arc<dyn ObjectStore>) -> Result<BatchResult, ConfigError> {
    Ok(BatchOrchestrator::new(config, store)?.run())
}
