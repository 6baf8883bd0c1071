//! Parquet encoding of a [`RowSet`], and decoding for verification.

use super::RowSet;
use anyhow::{Context, Result, bail};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{BrotliLevel, Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column compression codec for Parquet output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Lz4,
    Zstd,
    Brotli,
}

impl ParquetCompression {
    #[must_use]
    pub fn codec(self) -> Compression {
        match self {
            Self::Uncompressed => Compression::UNCOMPRESSED,
            Self::Snappy => Compression::SNAPPY,
            Self::Gzip => Compression::GZIP(GzipLevel::default()),
            Self::Lz4 => Compression::LZ4_RAW,
            Self::Zstd => Compression::ZSTD(ZstdLevel::default()),
            Self::Brotli => Compression::BROTLI(BrotliLevel::default()),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uncompressed => "uncompressed",
            Self::Snappy => "snappy",
            Self::Gzip => "gzip",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
            Self::Brotli => "brotli",
        }
    }
}

impl fmt::Display for ParquetCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParquetCompression {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "uncompressed" | "none" => Self::Uncompressed,
            "snappy" => Self::Snappy,
            "gzip" => Self::Gzip,
            "lz4" => Self::Lz4,
            "zstd" => Self::Zstd,
            "brotli" => Self::Brotli,
            other => bail!(
                "unknown parquet compression '{other}' (expected uncompressed, snappy, gzip, lz4, zstd or brotli)"
            ),
        })
    }
}

/// Encode every batch of `rows` into a single in-memory Parquet file.
///
/// A row-set without batches still produces a valid, zero-row file.
///
/// # Errors
/// Returns an error if the writer cannot be created or a batch is rejected.
pub fn encode_parquet(rows: &RowSet, compression: ParquetCompression) -> Result<Vec<u8>> {
    let props = WriterProperties::builder()
        .set_compression(compression.codec())
        .build();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, rows.schema().clone(), Some(props))
        .context("create ArrowWriter")?;
    for (i, batch) in rows.batches().iter().enumerate() {
        writer
            .write(batch)
            .with_context(|| format!("write batch #{i} to parquet"))?;
    }
    writer.close().context("close ArrowWriter")?;

    Ok(buffer)
}

/// Decode a Parquet file back into a [`RowSet`].
///
/// # Errors
/// Returns an error if the bytes are not a readable Parquet file.
pub fn decode_parquet(data: impl Into<Bytes>) -> Result<RowSet> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data.into())
        .context("open ParquetRecordBatchReader")?;
    let schema = builder.schema().clone();
    let reader = builder
        .with_batch_size(64 * 1024)
        .build()
        .context("build ParquetRecordBatchReader")?;

    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("read parquet batches")?;
    Ok(RowSet::new(schema, batches))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::parse_csv;

    #[test]
    fn compression_parses_case_insensitively() {
        assert_eq!("SNAPPY".parse::<ParquetCompression>().unwrap(), ParquetCompression::Snappy);
        assert_eq!("none".parse::<ParquetCompression>().unwrap(), ParquetCompression::Uncompressed);
        assert!("lzo".parse::<ParquetCompression>().is_err());
    }

    #[test]
    fn every_codec_produces_a_readable_file() -> Result<()> {
        let rows = parse_csv(b"id,name\n1,a\n2,b\n")?;
        for codec in [
            ParquetCompression::Uncompressed,
            ParquetCompression::Snappy,
            ParquetCompression::Gzip,
            ParquetCompression::Lz4,
            ParquetCompression::Zstd,
            ParquetCompression::Brotli,
        ] {
            let bytes = encode_parquet(&rows, codec)?;
            assert_eq!(&bytes[..4], b"PAR1", "{codec}");
            let decoded = decode_parquet(bytes)?;
            assert!(decoded.content_eq(&rows)?, "{codec}");
        }
        Ok(())
    }
}
