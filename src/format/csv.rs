//! CSV payload parsing with schema inference.

use super::RowSet;
use super::compression::{decompress, decompress_named};
use anyhow::{Context, Result, bail};
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use std::io::Cursor;
use std::sync::Arc;

const BATCH_SIZE: usize = 8192;

/// Parse a CSV payload (first row is the header) into a [`RowSet`].
///
/// Column types are inferred from every record, so a column is only numeric
/// if all of its values are. Payloads with a compressed signature are
/// inflated first.
///
/// # Errors
/// Returns an error for an empty payload, a missing header, rows whose
/// field count differs from the header, or invalid UTF-8.
pub fn parse_csv(data: &[u8]) -> Result<RowSet> {
    parse_plain(&decompress(data))
}

/// Parse the payload of object `key`, choosing the codec by its suffix.
///
/// # Errors
/// As [`parse_csv`], plus a decode failure when `key` names a codec.
pub fn parse_csv_named(key: &str, data: &[u8]) -> Result<RowSet> {
    parse_plain(&decompress_named(key, data)?)
}

fn parse_plain(data: &[u8]) -> Result<RowSet> {
    if data.iter().all(u8::is_ascii_whitespace) {
        bail!("empty CSV payload");
    }

    let format = Format::default().with_header(true);
    let (schema, _records) = format
        .infer_schema(Cursor::new(data), None)
        .context("infer CSV schema")?;
    if schema.fields().is_empty() {
        bail!("CSV payload has no header row");
    }

    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(Arc::clone(&schema))
        .with_format(format)
        .with_batch_size(BATCH_SIZE)
        .build(Cursor::new(data))
        .context("build CSV reader")?;

    let mut batches = Vec::new();
    for (i, batch) in reader.enumerate() {
        batches.push(batch.with_context(|| format!("parse CSV batch #{}", i + 1))?);
    }

    Ok(RowSet::new(schema, batches))
}
