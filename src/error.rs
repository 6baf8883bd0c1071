//! Error taxonomy for a conversion batch.
//!
//! Only [`EnumerationError`] concerns the batch as a whole, and even that is
//! absorbed by the orchestrator into an empty result. Everything else is
//! scoped to one object and ends up inside a failed
//! [`ConversionOutcome`](crate::convert::ConversionOutcome).

use crate::format::OutputFormat;
use crate::io::store::StoreError;
use thiserror::Error;

/// The input listing could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to enumerate {container}/{prefix}: {source}")]
pub struct EnumerationError {
    pub container: String,
    pub prefix: String,
    pub source: StoreError,
}

/// A source object could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to read {container}/{key}: {source}")]
pub struct ReadFailure {
    pub container: String,
    pub key: String,
    pub source: StoreError,
}

impl ReadFailure {
    pub fn new(container: impl Into<String>, key: impl Into<String>, source: StoreError) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
            source,
        }
    }
}

/// Why one object failed to convert.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error(transparent)]
    Read(#[from] ReadFailure),

    #[error("malformed CSV in {key}: {message}")]
    Parse { key: String, message: String },

    #[error("failed to encode {format} for {key}: {message}")]
    Encode {
        format: OutputFormat,
        key: String,
        message: String,
    },

    #[error("failed to write {format} to {container}/{key}: {source}")]
    Write {
        format: OutputFormat,
        container: String,
        key: String,
        source: StoreError,
    },

    #[error("{}", join_errors(.0))]
    Multiple(Vec<ConversionError>),

    #[error("conversion panicked: {0}")]
    Panicked(String),
}

fn join_errors(errors: &[ConversionError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConversionError {
    /// Fold the results of independent sub-operations: all must succeed.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`ConversionError::Multiple`] when more than one failed
    pub fn all_ok(results: impl IntoIterator<Item = Result<(), Self>>) -> Result<(), Self> {
        let mut errors: Vec<Self> = results.into_iter().filter_map(Result::err).collect();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }

    /// Whether any part of this failure happened on the write side.
    #[must_use]
    pub fn is_write_failure(&self) -> bool {
        match self {
            Self::Encode { .. } | Self::Write { .. } => true,
            Self::Multiple(errors) => errors.iter().any(Self::is_write_failure),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::StoreErrorKind;

    fn write_err(format: OutputFormat) -> ConversionError {
        ConversionError::Write {
            format,
            container: "out".into(),
            key: format!("processed/a.{}", format.extension()),
            source: StoreError::new(StoreErrorKind::AccessDenied, "denied"),
        }
    }

    #[test]
    fn all_ok_folds_results() {
        assert!(ConversionError::all_ok([Ok(()), Ok(())]).is_ok());

        let single = ConversionError::all_ok([Ok(()), Err(write_err(OutputFormat::Avro))]);
        assert_eq!(single.unwrap_err(), write_err(OutputFormat::Avro));

        let both = ConversionError::all_ok([
            Err(write_err(OutputFormat::Parquet)),
            Err(write_err(OutputFormat::Avro)),
        ])
        .unwrap_err();
        assert!(matches!(&both, ConversionError::Multiple(v) if v.len() == 2));
        assert!(both.is_write_failure());
        assert!(both.to_string().contains("processed/a.parquet"));
        assert!(both.to_string().contains("processed/a.avro"));
    }

    #[test]
    fn read_failure_renders_location() {
        let err = ConversionError::from(ReadFailure::new(
            "in",
            "data/a.csv",
            StoreError::not_found("in", "data/a.csv"),
        ));
        assert!(!err.is_write_failure());
        assert!(err.to_string().starts_with("failed to read in/data/a.csv"));
    }
}
