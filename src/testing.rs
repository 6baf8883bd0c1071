//! Fixtures for tests of conversion batches.
//!
//! ```
//! use bucketbeam::io::memory::MemoryObjectStore;
//! use bucketbeam::testing::seed_objects;
//!
//! let store = MemoryObjectStore::new();
//! let keys = seed_objects(&store, "raw", "data/", 3);
//! assert_eq!(keys, ["data/file0.csv", "data/file1.csv", "data/file2.csv"]);
//! ```

use crate::format::{RowSet, decode_avro, decode_parquet};
use crate::io::memory::MemoryObjectStore;
use anyhow::{Context, Result};
use apache_avro::types::Value;
use std::fmt::Write;

/// A small CSV document with a header and `rows` data rows.
///
/// Columns are `id` (integer), `name` (string), `score` (float) and
/// `active` (boolean).
#[must_use]
pub fn sample_csv(rows: usize) -> String {
    let mut out = String::from("id,name,score,active\n");
    for i in 0..rows {
        let _ = writeln!(out, "{i},name-{i},{}.5,{}", i * 10, i % 2 == 0);
    }
    out
}

/// A CSV document whose second row has too many fields.
#[must_use]
pub fn malformed_csv() -> &'static str {
    "id,name\n1,a\n2,b,unexpected\n"
}

/// Store `count` sample objects named `{prefix}file{i}.csv` and return
/// their keys in order.
pub fn seed_objects(
    store: &MemoryObjectStore,
    container: &str,
    prefix: &str,
    count: usize,
) -> Vec<String> {
    (0..count)
        .map(|i| {
            let key = format!("{prefix}file{i}.csv");
            store.insert(container, &key, sample_csv(i + 1));
            key
        })
        .collect()
}

/// Decode a Parquet object stored in `store`.
///
/// # Errors
/// Returns an error if the object is missing or is not Parquet.
pub fn read_parquet(store: &MemoryObjectStore, container: &str, key: &str) -> Result<RowSet> {
    let data = store
        .object(container, key)
        .with_context(|| format!("no object at {container}/{key}"))?;
    decode_parquet(data)
}

/// Decode an Avro object stored in `store`.
///
/// # Errors
/// Returns an error if the object is missing or is not Avro.
pub fn read_avro(store: &MemoryObjectStore, container: &str, key: &str) -> Result<Vec<Value>> {
    let data = store
        .object(container, key)
        .with_context(|| format!("no object at {container}/{key}"))?;
    decode_avro(&data)
}
