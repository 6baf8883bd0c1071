//! Deterministic mapping from input keys to output keys.
//!
//! Re-running a batch over the same inputs must overwrite the same outputs,
//! so the mapping depends only on the input key and the two prefixes.

use crate::format::OutputFormat;
use crate::format::compression::strip_codec_suffix;

/// Where the two outputs of one input object go.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputKeys {
    pub parquet: String,
    pub avro: String,
}

impl OutputKeys {
    #[must_use]
    pub fn get(&self, format: OutputFormat) -> &str {
        match format {
            OutputFormat::Parquet => &self.parquet,
            OutputFormat::Avro => &self.avro,
        }
    }
}

/// Prefix remapping from the input tree to the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    input_prefix: String,
    output_prefix: String,
}

impl OutputLayout {
    /// A non-empty `output_prefix` without a trailing `/` gets one.
    pub fn new(input_prefix: impl Into<String>, output_prefix: impl Into<String>) -> Self {
        let mut output_prefix = output_prefix.into();
        if !output_prefix.is_empty() && !output_prefix.ends_with('/') {
            output_prefix.push('/');
        }
        Self {
            input_prefix: input_prefix.into(),
            output_prefix,
        }
    }

    #[must_use]
    pub fn input_prefix(&self) -> &str {
        &self.input_prefix
    }

    #[must_use]
    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }

    /// Key relative to the input prefix, with any compression suffix and
    /// the file extension removed. Sub-directories below the prefix are kept.
    #[must_use]
    pub fn stem<'a>(&self, key: &'a str) -> &'a str {
        let relative = key.strip_prefix(self.input_prefix.as_str()).unwrap_or(key);
        let relative = relative.trim_start_matches('/');
        let relative = strip_codec_suffix(relative);

        let file_start = relative.rfind('/').map_or(0, |i| i + 1);
        match relative[file_start..].rfind('.') {
            Some(dot) if dot > 0 => &relative[..file_start + dot],
            _ => relative,
        }
    }

    /// Output key for `key` in one format.
    #[must_use]
    pub fn output_key(&self, key: &str, format: OutputFormat) -> String {
        format!("{}{}.{}", self.output_prefix, self.stem(key), format.extension())
    }

    /// Both output keys for `key`.
    #[must_use]
    pub fn output_keys(&self, key: &str) -> OutputKeys {
        OutputKeys {
            parquet: self.output_key(key, OutputFormat::Parquet),
            avro: self.output_key(key, OutputFormat::Avro),
        }
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::new("", "processed/")
    }
}
