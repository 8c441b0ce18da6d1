//! Container-level compression
//!
//! Chunks of arrays stored in master and data containers are compressed
//! independently of the compression used on the wire. The scheme is chosen
//! per writer through `compressionScheme` and recorded in each array's layout,
//! so readers never have to guess.
//!
//! # Supported Algorithms
//!
//! - **Deflate (raw zlib stream)**: good ratio, slower
//! - **Gzip**: compatible with standard gzip tooling
//! - **LZ4**: LZ4 block with a 4-byte little-endian size prefix
//! - **Bitshuffle + LZ4**: the detector's own format, best for integer images
//! - **None**: passthrough
//!
//! # Examples
//!
//! ```
//! use eiger_stream_rust::compression::{compress, decompress, CompressionLevel, ContainerCompression};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = vec![0u8; 10000];
//!
//! let compressed = compress(&data, ContainerCompression::Deflate, CompressionLevel::Default, 2)?;
//! let decompressed = decompress(&compressed, ContainerCompression::Deflate, 2, data.len())?;
//! assert_eq!(data, decompressed);
//! # Ok(())
//! # }
//! ```

use crate::codec::bitshuffle;
use crate::error::{Result, StreamError};
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::{debug, trace};

/// Compression applied to container chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerCompression {
    /// No compression
    None,
    /// Deflate compression
    Deflate,
    /// Gzip compression
    Gzip,
    /// LZ4 block with size prefix
    Lz4,
    /// Bitshuffle + LZ4
    #[default]
    Bslz4,
}

impl ContainerCompression {
    /// Get the compression type name
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Deflate => "deflate",
            Self::Gzip => "gzip",
            Self::Lz4 => "lz4",
            Self::Bslz4 => "bslz4",
        }
    }

    /// Check if compression is enabled
    pub fn is_compressed(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Parse a scheme name as used in configuration files
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "deflate" => Ok(Self::Deflate),
            "gzip" => Ok(Self::Gzip),
            "lz4" => Ok(Self::Lz4),
            "bslz4" | "bitshuffle" => Ok(Self::Bslz4),
            other => Err(StreamError::Config(format!(
                "unknown compression scheme '{}'",
                other
            ))),
        }
    }
}

/// Compression level for deflate and gzip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    None,
    Fast,
    #[default]
    Default,
    Best,
    /// flate2 level, 0 to 9
    Custom(u32),
}

impl CompressionLevel {
    fn to_flate2(self) -> Compression {
        match self {
            Self::None => Compression::none(),
            Self::Fast => Compression::fast(),
            Self::Default => Compression::default(),
            Self::Best => Compression::best(),
            Self::Custom(level) => Compression::new(level),
        }
    }

    /// Numeric flate2 level
    pub fn level(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fast => 1,
            Self::Default => 6,
            Self::Best => 9,
            Self::Custom(level) => *level,
        }
    }
}

fn io_context(e: std::io::Error, what: &str) -> StreamError {
    StreamError::Io(std::io::Error::new(e.kind(), format!("{}: {}", what, e)))
}

/// Compress one chunk
///
/// `elem_size` is only used by [`ContainerCompression::Bslz4`].
pub fn compress(
    data: &[u8],
    compression: ContainerCompression,
    level: CompressionLevel,
    elem_size: usize,
) -> Result<Vec<u8>> {
    trace!(
        compression = compression.name(),
        level = level.level(),
        input_size = data.len(),
        "Starting compression"
    );

    let compressed = match compression {
        ContainerCompression::None => data.to_vec(),
        ContainerCompression::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), level.to_flate2());
            encoder
                .write_all(data)
                .map_err(|e| io_context(e, "Deflate compression failed"))?;
            encoder
                .finish()
                .map_err(|e| io_context(e, "Deflate compression finish failed"))?
        }
        ContainerCompression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), level.to_flate2());
            encoder
                .write_all(data)
                .map_err(|e| io_context(e, "Gzip compression failed"))?;
            encoder
                .finish()
                .map_err(|e| io_context(e, "Gzip compression finish failed"))?
        }
        ContainerCompression::Lz4 => lz4_flex::block::compress_prepend_size(data),
        ContainerCompression::Bslz4 => bitshuffle::compress_lz4(data, elem_size, None)?,
    };

    debug!(
        compression = compression.name(),
        original_size = data.len(),
        compressed_size = compressed.len(),
        "Chunk compressed"
    );

    Ok(compressed)
}

/// Decompress one chunk
///
/// `expected_len` is the uncompressed size in bytes recorded in the chunk
/// layout; a mismatch is reported as [`StreamError::InvalidSize`].
pub fn decompress(
    data: &[u8],
    compression: ContainerCompression,
    elem_size: usize,
    expected_len: usize,
) -> Result<Vec<u8>> {
    let decompressed = match compression {
        ContainerCompression::None => data.to_vec(),
        ContainerCompression::Deflate => {
            let mut decoder = DeflateDecoder::new(data);
            let mut out = Vec::with_capacity(expected_len);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| io_context(e, "Deflate decompression failed"))?;
            out
        }
        ContainerCompression::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut out = Vec::with_capacity(expected_len);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| io_context(e, "Gzip decompression failed"))?;
            out
        }
        ContainerCompression::Lz4 => lz4_flex::block::decompress_size_prepended(data)
            .map_err(|e| StreamError::Decompression(format!("LZ4 chunk: {}", e)))?,
        ContainerCompression::Bslz4 => {
            let elem_size = elem_size.max(1);
            bitshuffle::decompress_lz4(data, elem_size, expected_len / elem_size)?
        }
    };

    if decompressed.len() != expected_len {
        return Err(StreamError::InvalidSize {
            expected: expected_len,
            actual: decompressed.len(),
        });
    }

    trace!(
        compression = compression.name(),
        compressed_size = data.len(),
        decompressed_size = decompressed.len(),
        "Chunk decompressed"
    );

    Ok(decompressed)
}
