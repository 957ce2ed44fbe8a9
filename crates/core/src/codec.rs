//! Payload compression codecs.
//!
//! `compress` is a pure function; outputs call it per message once the
//! batch has been routed.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use serde::Serialize;

use crate::error::CodecError;

/// Supported compression codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Gzip,
    Zlib,
    /// LZ4 block format with the uncompressed size prepended
    Lz4,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gzip => write!(f, "gzip"),
            Self::Zlib => write!(f, "zlib"),
            Self::Lz4 => write!(f, "lz4"),
        }
    }
}

impl FromStr for Codec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(Self::Gzip),
            "zlib" | "deflate" => Ok(Self::Zlib),
            "lz4" => Ok(Self::Lz4),
            other => Err(CodecError::Unsupported(other.to_owned())),
        }
    }
}

/// Compresses `input` with `codec`.
pub fn compress(input: &[u8], codec: Codec) -> Result<Bytes, CodecError> {
    match codec {
        Codec::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(input.len() / 2), Compression::default());
            encoder
                .write_all(input)
                .map_err(|e| CodecError::Compress(e.to_string()))?;
            encoder
                .finish()
                .map(Bytes::from)
                .map_err(|e| CodecError::Compress(e.to_string()))
        }
        Codec::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(input.len() / 2), Compression::default());
            encoder
                .write_all(input)
                .map_err(|e| CodecError::Compress(e.to_string()))?;
            encoder
                .finish()
                .map(Bytes::from)
                .map_err(|e| CodecError::Compress(e.to_string()))
        }
        Codec::Lz4 => Ok(Bytes::from(lz4_flex::compress_prepend_size(input))),
    }
}
