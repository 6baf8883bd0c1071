//! Per-object conversion: read, parse once, write both formats.
//!
//! [`ObjectConverter::convert`] never returns an error or unwinds; every
//! failure, including a panic in an encoder, is folded into the returned
//! [`ConversionOutcome`]. An object counts as converted only when both the
//! Parquet and the Avro write succeed. A failed sibling write does not roll
//! back one that already landed.

use crate::config::ConverterConfig;
use crate::error::ConversionError;
use crate::format::{EncodeOptions, OutputFormat, RowSet, encode, parse_csv_named};
use crate::io::helpers::store_for;
use crate::io::reader::{CacheStats, SourceReader, reader_for};
use crate::io::store::{ObjectReference, ObjectStore};
use crate::layout::{OutputKeys, OutputLayout};
use crate::metrics::BatchMetrics;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Result of converting one object.
///
/// `success` is true exactly when `error` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionOutcome {
    pub container: String,
    pub key: String,
    /// Seconds from the start of the read to the end of the last write.
    pub elapsed_secs: f64,
    pub success: bool,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ConversionError>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<ConversionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ConversionOutcome {
    pub fn succeeded(object: &ObjectReference, elapsed_secs: f64) -> Self {
        Self {
            container: object.container.clone(),
            key: object.key.clone(),
            elapsed_secs,
            success: true,
            error: None,
        }
    }

    pub fn failed(object: &ObjectReference, elapsed_secs: f64, error: ConversionError) -> Self {
        Self {
            container: object.container.clone(),
            key: object.key.clone(),
            elapsed_secs,
            success: false,
            error: Some(error),
        }
    }

    /// The input object this outcome is about.
    #[must_use]
    pub fn object(&self) -> ObjectReference {
        ObjectReference::new(self.container.clone(), self.key.clone())
    }

    pub(crate) fn is_for(&self, object: &ObjectReference) -> bool {
        self.container == object.container && self.key == object.key
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Converts single objects. Cheap to share behind an [`Arc`].
pub struct ObjectConverter {
    reader: Arc<dyn SourceReader>,
    store: Arc<dyn ObjectStore>,
    layout: OutputLayout,
    output_container: String,
    options: EncodeOptions,
}

impl ObjectConverter {
    pub fn new(
        reader: Arc<dyn SourceReader>,
        store: Arc<dyn ObjectStore>,
        layout: OutputLayout,
        output_container: impl Into<String>,
        options: EncodeOptions,
    ) -> Self {
        Self {
            reader,
            store,
            layout,
            output_container: output_container.into(),
            options,
        }
    }

    /// Wire a converter from configuration: the gateway gets the retry
    /// policy, and the read path gets the cache when `cache_size > 0`.
    pub fn from_config(config: &ConverterConfig, store: Arc<dyn ObjectStore>) -> Self {
        let store = store_for(store, &config.retry);
        let reader = reader_for(Arc::clone(&store), config.cache_size);
        Self::new(
            reader,
            store,
            config.layout(),
            config.output_container(),
            config.encode_options(),
        )
    }

    #[must_use]
    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    #[must_use]
    pub fn output_container(&self) -> &str {
        &self.output_container
    }

    #[must_use]
    pub fn output_keys(&self, key: &str) -> OutputKeys {
        self.layout.output_keys(key)
    }

    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.reader.cache_stats()
    }

    /// Convert one object, recording nothing beyond the log.
    pub fn convert(&self, object: &ObjectReference) -> ConversionOutcome {
        self.convert_recording(object, &BatchMetrics::new())
    }

    /// Convert one object and add its byte counts and result to `metrics`.
    pub fn convert_recording(
        &self,
        object: &ObjectReference,
        metrics: &BatchMetrics,
    ) -> ConversionOutcome {
        let start = Instant::now();
        info!(container = %object.container, key = %object.key, "converting object");

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.try_convert(object, metrics)))
            .unwrap_or_else(|payload| Err(ConversionError::Panicked(panic_message(&*payload))));
        let elapsed_secs = start.elapsed().as_secs_f64();

        metrics.record_outcome(result.is_ok());
        match result {
            Ok(()) => {
                info!(key = %object.key, elapsed_secs, "object converted");
                ConversionOutcome::succeeded(object, elapsed_secs)
            }
            Err(err) => {
                error!(key = %object.key, elapsed_secs, error = %err, "object conversion failed");
                ConversionOutcome::failed(object, elapsed_secs, err)
            }
        }
    }

    fn try_convert(
        &self,
        object: &ObjectReference,
        metrics: &BatchMetrics,
    ) -> Result<(), ConversionError> {
        let keys = self.layout.output_keys(&object.key);

        let data = self.reader.read(&object.container, &object.key)?;
        metrics.record_read(data.len());

        let rows = parse_csv_named(&object.key, &data).map_err(|e| ConversionError::Parse {
            key: object.key.clone(),
            message: format!("{e:#}"),
        })?;
        debug!(key = %object.key, rows = rows.num_rows(), columns = rows.num_columns(), "parsed CSV");

        let (parquet, avro) = rayon::join(
            || self.write_format(&rows, OutputFormat::Parquet, &keys, &object.key, metrics),
            || self.write_format(&rows, OutputFormat::Avro, &keys, &object.key, metrics),
        );
        ConversionError::all_ok([parquet, avro])
    }

    fn write_format(
        &self,
        rows: &RowSet,
        format: OutputFormat,
        keys: &OutputKeys,
        source_key: &str,
        metrics: &BatchMetrics,
    ) -> Result<(), ConversionError> {
        let start = Instant::now();
        let output_key = keys.get(format);

        let bytes = encode(rows, format, &self.options).map_err(|e| ConversionError::Encode {
            format,
            key: source_key.to_string(),
            message: format!("{e:#}"),
        })?;
        self.store
            .put(&self.output_container, output_key, &bytes)
            .map_err(|source| ConversionError::Write {
                format,
                container: self.output_container.clone(),
                key: output_key.to_string(),
                source,
            })?;
        metrics.record_write(bytes.len());

        debug!(
            %format,
            key = output_key,
            bytes = bytes.len(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "output written"
        );
        Ok(())
    }
}
