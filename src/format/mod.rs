//! Tabular formats: CSV in, Parquet and Avro out.
//!
//! A CSV payload is parsed once into a [`RowSet`] (Arrow record batches with
//! an inferred schema). The row-set is then handed, read-only, to the
//! encoders selected by [`OutputFormat`]. Everything here is pure and
//! CPU-bound; no function in this module touches the network.

pub mod avro;
pub mod compression;
pub mod csv;
pub mod parquet;

pub use self::avro::{avro_schema, decode_avro, encode_avro};
pub use self::csv::{parse_csv, parse_csv_named};
pub use self::parquet::{ParquetCompression, decode_parquet, encode_parquet};

use anyhow::{Context, Result};
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Target output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Parquet,
    Avro,
}

impl OutputFormat {
    pub const ALL: [Self; 2] = [Self::Parquet, Self::Avro];

    /// File extension, without the leading dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Avro => "avro",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parquet => "Parquet",
            Self::Avro => "Avro",
        })
    }
}

/// Encoder knobs shared by all formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    pub parquet_compression: ParquetCompression,
}

/// Parsed contents of one CSV object.
///
/// Immutable after parsing; owned by the conversion that produced it.
#[derive(Debug, Clone)]
pub struct RowSet {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl RowSet {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect()
    }

    /// All rows as one batch.
    ///
    /// # Errors
    /// Returns an error if the batches disagree with the schema.
    pub fn to_single_batch(&self) -> Result<RecordBatch> {
        concat_batches(&self.schema, &self.batches).context("concatenate record batches")
    }

    /// Compare column names and values, ignoring schema metadata and how
    /// rows are split into batches.
    ///
    /// # Errors
    /// Returns an error if either side cannot be concatenated.
    pub fn content_eq(&self, other: &Self) -> Result<bool> {
        if self.column_names() != other.column_names() {
            return Ok(false);
        }
        let (left, right) = (self.to_single_batch()?, other.to_single_batch()?);
        Ok(left.columns() == right.columns())
    }
}

/// Encode a row-set into `format`.
///
/// # Errors
/// Returns an error if the encoder rejects the data.
pub fn encode(rows: &RowSet, format: OutputFormat, options: &EncodeOptions) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Parquet => encode_parquet(rows, options.parquet_compression),
        OutputFormat::Avro => encode_avro(rows),
    }
}
