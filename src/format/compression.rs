//! Transparent decompression of CSV payloads.
//!
//! Detection strategy:
//! 1. The object key's suffix (`.gz`, `.zst`, `.bz2`, `.xz`) names the codec.
//! 2. Otherwise the payload's magic bytes are sniffed. A payload that only
//!    looks compressed and fails to decode is treated as plain text.
//!
//! When a codec's feature is disabled, payloads carrying its signature pass
//! through untouched (and will usually fail to parse as CSV).

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::io::Read;

/// Compression formats recognised on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCodec {
    Gzip,
    Zstd,
    Bzip2,
    Xz,
}

impl InputCodec {
    const ALL: [Self; 4] = [Self::Gzip, Self::Zstd, Self::Bzip2, Self::Xz];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
        }
    }

    /// Whether `data` starts with this codec's stream signature.
    ///
    /// The bzip2 magic `BZh` is printable text, so it must be followed by a
    /// block size digit and a block or end-of-stream marker.
    fn matches_signature(self, data: &[u8]) -> bool {
        match self {
            Self::Gzip => data.starts_with(&[0x1f, 0x8b]),
            Self::Zstd => data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]),
            Self::Bzip2 => match data {
                [b'B', b'Z', b'h', level, rest @ ..] if (b'1'..=b'9').contains(level) => {
                    rest.starts_with(&[0x31, 0x41, 0x59, 0x26, 0x53, 0x59])
                        || rest.starts_with(&[0x17, 0x72, 0x45, 0x38, 0x50, 0x90])
                }
                _ => false,
            },
            Self::Xz => data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]),
        }
    }

    const fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Gzip => &[".gz", ".gzip"],
            Self::Zstd => &[".zst", ".zstd"],
            Self::Bzip2 => &[".bz2", ".bzip2"],
            Self::Xz => &[".xz"],
        }
    }

    const fn enabled(self) -> bool {
        match self {
            Self::Gzip => cfg!(feature = "compression-gzip"),
            Self::Zstd => cfg!(feature = "compression-zstd"),
            Self::Bzip2 => cfg!(feature = "compression-bzip2"),
            Self::Xz => cfg!(feature = "compression-xz"),
        }
    }

    /// Identify a codec from the leading bytes of a payload.
    #[must_use]
    pub fn detect(data: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|codec| codec.enabled() && codec.matches_signature(data))
    }

    /// Identify a codec from an object key's suffix, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|codec| {
            codec
                .extensions()
                .iter()
                .any(|ext| lower.ends_with(*ext) && lower.len() > ext.len())
        })
    }

    fn inflate(self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len().saturating_mul(4));
        self.decoder(data)?
            .read_to_end(&mut out)
            .with_context(|| format!("decompress {} payload", self.name()))?;
        Ok(out)
    }

    fn decoder<'a>(self, data: &'a [u8]) -> Result<Box<dyn Read + 'a>> {
        match self {
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => Ok(Box::new(flate2::read::MultiGzDecoder::new(data))),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => Ok(Box::new(
                zstd::stream::read::Decoder::new(data).context("init zstd decoder")?,
            )),
            #[cfg(feature = "compression-bzip2")]
            Self::Bzip2 => Ok(Box::new(bzip2::read::MultiBzDecoder::new(data))),
            #[cfg(feature = "compression-xz")]
            Self::Xz => Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(data))),
            #[allow(unreachable_patterns)]
            other => anyhow::bail!("{} support is not compiled in", other.name()),
        }
    }
}

/// Decompress `data` if it carries a recognised signature.
///
/// A payload that fails to decode under the sniffed codec is returned
/// as-is.
#[must_use]
pub fn decompress(data: &[u8]) -> Cow<'_, [u8]> {
    InputCodec::detect(data)
        .and_then(|codec| codec.inflate(data).ok())
        .map_or(Cow::Borrowed(data), Cow::Owned)
}

/// Decompress the payload of object `name`.
///
/// A codec suffix on `name` is authoritative; without one the payload is
/// sniffed as in [`decompress`].
///
/// # Errors
/// Returns an error if `name` names a codec and the payload fails to decode
/// with it.
pub fn decompress_named<'a>(name: &str, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
    match InputCodec::from_name(name) {
        Some(codec) if codec.enabled() => codec.inflate(data).map(Cow::Owned),
        Some(_) => Ok(Cow::Borrowed(data)),
        None => Ok(decompress(data)),
    }
}

/// Drop a trailing compression extension (`a.csv.gz` → `a.csv`).
#[must_use]
pub fn strip_codec_suffix(name: &str) -> &str {
    let lower = name.to_ascii_lowercase();
    InputCodec::from_name(name)
        .and_then(|codec| codec.extensions().iter().find(|ext| lower.ends_with(*ext)))
        .map_or(name, |ext| &name[..name.len() - ext.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_payloads_pass_through() {
        let out = decompress(b"id,name\n1,a\n");
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn text_starting_with_bzip2_magic_is_plain() {
        let csv = b"BZh_score,name\n1,a\n";
        assert_eq!(InputCodec::detect(csv), None);
        assert_eq!(&*decompress(csv), csv);
        assert_eq!(&*decompress_named("scores.csv", csv).unwrap(), csv);
    }

    #[test]
    fn codec_is_named_by_suffix() {
        assert_eq!(InputCodec::from_name("a.csv.GZ"), Some(InputCodec::Gzip));
        assert_eq!(InputCodec::from_name("a.csv.bz2"), Some(InputCodec::Bzip2));
        assert_eq!(InputCodec::from_name("a.csv"), None);
        assert_eq!(InputCodec::from_name(".xz"), None);
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn corrupt_payload_under_codec_suffix_is_an_error() {
        assert!(decompress_named("a.csv.gz", b"id,name\n1,a\n").is_err());
    }

    #[cfg(feature = "compression-bzip2")]
    #[test]
    fn bzip2_payloads_are_sniffed() {
        use bzip2::Compression;
        use bzip2::write::BzEncoder;
        use std::io::Write;

        let mut enc = BzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"id,name\n1,a\n").unwrap();
        let bz = enc.finish().unwrap();

        assert_eq!(InputCodec::detect(&bz), Some(InputCodec::Bzip2));
        assert_eq!(&*decompress(&bz), b"id,name\n1,a\n");
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn gzip_payloads_are_inflated() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"id,name\n1,a\n").unwrap();
        let gz = enc.finish().unwrap();

        assert_eq!(InputCodec::detect(&gz), Some(InputCodec::Gzip));
        assert_eq!(&*decompress(&gz), b"id,name\n1,a\n");
        assert_eq!(&*decompress_named("a.csv.gz", &gz).unwrap(), b"id,name\n1,a\n");
    }

    #[cfg(feature = "compression-zstd")]
    #[test]
    fn zstd_payloads_are_inflated() {
        let zst = zstd::encode_all(&b"x,y\n1,2\n"[..], 3).unwrap();
        assert_eq!(&*decompress(&zst), b"x,y\n1,2\n");
    }

    #[test]
    fn codec_suffixes_are_stripped() {
        assert_eq!(strip_codec_suffix("file.csv.gz"), "file.csv");
        assert_eq!(strip_codec_suffix("file.csv.ZST"), "file.csv");
        assert_eq!(strip_codec_suffix("file.csv"), "file.csv");
        assert_eq!(strip_codec_suffix(".gz"), ".gz");
    }
}
