//! Converter configuration.
//!
//! A [`ConverterConfig`] can be built in code, read from environment
//! variables, or loaded from a JSON file. Every field except
//! `input_container` has a default, so partial JSON documents are accepted.

use crate::format::{EncodeOptions, ParquetCompression};
use crate::io::helpers::RetryConfig;
use crate::layout::OutputLayout;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OUTPUT_PREFIX: &str = "processed/";
pub const DEFAULT_MAX_WORKERS: usize = 20;
pub const DEFAULT_CACHE_SIZE: usize = 128;

/// Why a configuration could not be loaded or is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}: {message}")]
    InvalidValue {
        name: &'static str,
        value: String,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to build worker pool: {0}")]
    Pool(String),
}

/// Settings for one converter deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Container whose objects are converted.
    pub input_container: String,
    /// Destination container; `None` writes next to the inputs.
    pub output_container: Option<String>,
    /// Only keys starting with this prefix are converted.
    pub prefix: String,
    /// Prefix prepended to every derived output key.
    pub output_prefix: String,
    /// Upper bound on objects converted at the same time.
    pub max_workers: usize,
    /// Source-read cache capacity in entries; `0` disables caching.
    pub cache_size: usize,
    pub parquet_compression: ParquetCompression,
    /// Optional glob matched against the key with `prefix` removed.
    pub key_pattern: Option<String>,
    pub retry: RetryConfig,
    /// Wall-clock limit for one batch, in (possibly fractional) seconds.
    pub deadline_secs: Option<f64>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            input_container: String::new(),
            output_container: None,
            prefix: String::new(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            cache_size: DEFAULT_CACHE_SIZE,
            parquet_compression: ParquetCompression::default(),
            key_pattern: None,
            retry: RetryConfig::default(),
            deadline_secs: None,
        }
    }
}

fn parse_var<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            message: e.to_string(),
            value,
        })
}

impl ConverterConfig {
    pub fn new(input_container: impl Into<String>) -> Self {
        Self {
            input_container: input_container.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_output_container(mut self, container: impl Into<String>) -> Self {
        self.output_container = Some(container.into());
        self
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = prefix.into();
        self
    }

    #[must_use]
    pub const fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    #[must_use]
    pub const fn with_cache_size(mut self, entries: usize) -> Self {
        self.cache_size = entries;
        self
    }

    #[must_use]
    pub const fn with_parquet_compression(mut self, compression: ParquetCompression) -> Self {
        self.parquet_compression = compression;
        self
    }

    #[must_use]
    pub fn with_key_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.key_pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_secs = Some(deadline.as_secs_f64());
        self
    }

    /// Read settings from the process environment.
    ///
    /// # Errors
    /// Returns an error if `INPUT_BUCKET` is unset or a variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, using the same variable names as
    /// [`from_env`](Self::from_env). Empty values count as unset.
    ///
    /// `MAX_RETRIES` is the number of retries after the first attempt.
    ///
    /// # Errors
    /// Returns an error if `INPUT_BUCKET` is missing or a value fails to parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut config = Self::new(get("INPUT_BUCKET").ok_or(ConfigError::Missing("INPUT_BUCKET"))?);
        config.output_container = get("OUTPUT_BUCKET");
        if let Some(v) = get("PREFIX") {
            config.prefix = v;
        }
        if let Some(v) = get("OUTPUT_PREFIX") {
            config.output_prefix = v;
        }
        if let Some(v) = get("MAX_WORKERS") {
            config.max_workers = parse_var("MAX_WORKERS", v)?;
        }
        if let Some(v) = get("CACHE_SIZE") {
            config.cache_size = parse_var("CACHE_SIZE", v)?;
        }
        if let Some(v) = get("PARQUET_COMPRESSION") {
            config.parquet_compression = parse_var("PARQUET_COMPRESSION", v)?;
        }
        config.key_pattern = get("KEY_PATTERN");
        if let Some(v) = get("MAX_RETRIES") {
            let retries: u32 = parse_var("MAX_RETRIES", v)?;
            config.retry.max_attempts = retries.saturating_add(1);
        }
        if let Some(v) = get("DEADLINE_SECS") {
            config.deadline_secs = Some(parse_var("DEADLINE_SECS", v)?);
        }
        Ok(config)
    }

    /// Load settings from a JSON document.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the settings for values the converter cannot run with.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_container.trim().is_empty() {
            return Err(ConfigError::Invalid("input container must not be empty".into()));
        }
        if self.output_container.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid("output container must not be empty".into()));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.deadline_secs.is_some_and(|secs| !(secs.is_finite() && secs > 0.0)) {
            return Err(ConfigError::Invalid(
                "deadline_secs must be a positive number of seconds".into(),
            ));
        }
        self.key_matcher()?;

        let same_container = self.output_container() == self.input_container;
        let same_prefix = self.output_prefix.trim_end_matches('/') == self.prefix.trim_end_matches('/');
        if same_container && same_prefix {
            return Err(ConfigError::Invalid(format!(
                "output location {}/{} is the input location",
                self.input_container, self.output_prefix
            )));
        }
        Ok(())
    }

    /// Effective destination container.
    #[must_use]
    pub fn output_container(&self) -> &str {
        self.output_container
            .as_deref()
            .unwrap_or(&self.input_container)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    #[must_use]
    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(self.prefix.clone(), self.output_prefix.clone())
    }

    #[must_use]
    pub const fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            parquet_compression: self.parquet_compression,
        }
    }

    /// Compiled `key_pattern`, if any.
    ///
    /// # Errors
    /// Returns an error if the pattern is not a valid glob.
    pub fn key_matcher(&self) -> Result<Option<Pattern>, ConfigError> {
        self.key_pattern
            .as_deref()
            .map(|p| {
                Pattern::new(p).map_err(|e| ConfigError::InvalidValue {
                    name: "key_pattern",
                    value: p.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = ConverterConfig::new("in");
        assert_eq!(config.output_container(), "in");
        assert_eq!(config.output_prefix, "processed/");
        assert_eq!(config.max_workers, 20);
        assert_eq!(config.cache_size, 128);
        assert_eq!(config.parquet_compression, ParquetCompression::Snappy);
        assert!(config.deadline().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn env_lookup_reads_every_setting() {
        let config = ConverterConfig::from_lookup(lookup(&[
            ("INPUT_BUCKET", "raw"),
            ("OUTPUT_BUCKET", "curated"),
            ("PREFIX", "data/2024/"),
            ("OUTPUT_PREFIX", "out/"),
            ("MAX_WORKERS", "4"),
            ("CACHE_SIZE", "0"),
            ("PARQUET_COMPRESSION", "zstd"),
            ("KEY_PATTERN", "*.csv"),
            ("MAX_RETRIES", "0"),
            ("DEADLINE_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.input_container, "raw");
        assert_eq!(config.output_container(), "curated");
        assert_eq!(config.prefix, "data/2024/");
        assert_eq!(config.output_prefix, "out/");
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.cache_size, 0);
        assert_eq!(config.parquet_compression, ParquetCompression::Zstd);
        assert_eq!(config.key_pattern.as_deref(), Some("*.csv"));
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.deadline(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn sub_second_deadlines_are_kept() {
        let config = ConverterConfig::new("in").with_deadline(Duration::from_millis(500));
        assert!(config.validate().is_ok());
        assert_eq!(config.deadline(), Some(Duration::from_millis(500)));

        let config = ConverterConfig::new("in").with_deadline(Duration::from_millis(1900));
        let kept = config.deadline().unwrap().as_secs_f64();
        assert!((kept - 1.9).abs() < 1e-6, "{kept}");

        assert!(ConverterConfig::new("in").with_deadline(Duration::ZERO).validate().is_err());
        let lookup_config =
            ConverterConfig::from_lookup(lookup(&[("INPUT_BUCKET", "raw"), ("DEADLINE_SECS", "0.25")]))
                .unwrap();
        assert_eq!(lookup_config.deadline(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn env_lookup_requires_input_bucket() {
        let err = ConverterConfig::from_lookup(lookup(&[("INPUT_BUCKET", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("INPUT_BUCKET")));
    }

    #[test]
    fn env_lookup_rejects_bad_numbers() {
        let err = ConverterConfig::from_lookup(lookup(&[
            ("INPUT_BUCKET", "raw"),
            ("MAX_WORKERS", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "MAX_WORKERS", .. }));
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        assert!(ConverterConfig::default().validate().is_err());
        assert!(ConverterConfig::new("in").with_max_workers(0).validate().is_err());
        assert!(ConverterConfig::new("in").with_key_pattern("[").validate().is_err());
        assert!(
            ConverterConfig::new("in")
                .with_prefix("processed")
                .validate()
                .is_err()
        );
        assert!(
            ConverterConfig::new("in")
                .with_prefix("processed/")
                .with_output_container("out")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn json_file_uses_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "input_container": "raw", "max_workers": 8, "parquet_compression": "gzip" }"#,
        )
        .unwrap();

        let config = ConverterConfig::from_json_file(&path).unwrap();
        assert_eq!(config.input_container, "raw");
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.parquet_compression, ParquetCompression::Gzip);
        assert_eq!(config.cache_size, DEFAULT_CACHE_SIZE);

        assert!(matches!(
            ConverterConfig::from_json_file(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
