//! Compressed image payload decoding
//!
//! The detector sends each image as a compressed blob together with an element
//! type, a shape and an encoding tag. Two encodings exist on the wire:
//!
//! - `lz4<`: a raw LZ4 block whose 4-byte size prefix has been stripped
//! - `bs8-lz4<`, `bs16-lz4<`, `bs32-lz4<`: bitshuffle + LZ4 (see [`bitshuffle`])
//!
//! The declared shape lists the fastest-varying dimension first. Decoded arrays
//! are row-major, so the shape is reversed: a declared `[width, height]` decodes
//! to an array of shape `[height, width]`.
//!
//! # Examples
//!
//! ```
//! use eiger_stream_rust::array::{DataArray, ElementType};
//! use eiger_stream_rust::codec::{decode_payload, encode_payload, Encoding};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let image = DataArray::from_vec(vec![2, 4], (0u16..8).collect())?;
//! let blob = encode_payload(&image, Encoding::BitshuffleLz4)?;
//!
//! // wire shape is [width, height]
//! let decoded = decode_payload(ElementType::Uint16, &[4, 2], Encoding::BitshuffleLz4, &blob)?;
//! assert_eq!(decoded, image);
//! # Ok(())
//! # }
//! ```

pub mod bitshuffle;

use crate::array::{element_count, DataArray, ElementType};
use crate::error::{Result, StreamError};
use bytes::{BufMut, BytesMut};
use tracing::{debug, trace};

/// Wire compression scheme of an image payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Raw LZ4 block without size prefix
    Lz4,
    /// Bitshuffle + LZ4 with 12-byte header
    BitshuffleLz4,
}

impl Encoding {
    /// Parse the `encoding` tag from an image info part
    ///
    /// # Examples
    ///
    /// ```
    /// use eiger_stream_rust::codec::Encoding;
    ///
    /// assert_eq!(Encoding::parse("lz4<").unwrap(), Encoding::Lz4);
    /// assert_eq!(Encoding::parse("bs16-lz4<").unwrap(), Encoding::BitshuffleLz4);
    /// assert!(Encoding::parse("<").is_err());
    /// ```
    pub fn parse(tag: &str) -> Result<Self> {
        if tag == "lz4<" {
            Ok(Self::Lz4)
        } else if tag.starts_with("bs") && tag.ends_with("-lz4<") {
            Ok(Self::BitshuffleLz4)
        } else {
            Err(StreamError::UnsupportedEncoding(tag.to_string()))
        }
    }

    /// Wire tag for an element type
    pub fn tag(&self, dtype: ElementType) -> String {
        match self {
            Self::Lz4 => "lz4<".to_string(),
            Self::BitshuffleLz4 => format!("bs{}-lz4<", dtype.bits()),
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::BitshuffleLz4 => "bslz4",
        }
    }
}

/// Decode a compressed payload into a row-major array
///
/// `shape` is the declared wire shape (fastest-varying first); the returned
/// array has the reversed shape.
pub fn decode_payload(
    dtype: ElementType,
    shape: &[usize],
    encoding: Encoding,
    blob: &[u8],
) -> Result<DataArray> {
    let elements = element_count(shape)?;
    let size = elements.checked_mul(dtype.size()).ok_or_else(|| {
        StreamError::InvalidShape(format!("byte size of {:?} {} overflows", shape, dtype))
    })?;
    trace!(
        encoding = encoding.name(),
        dtype = dtype.name(),
        ?shape,
        compressed_size = blob.len(),
        "Decoding payload"
    );

    let raw = match encoding {
        Encoding::Lz4 => {
            if shape.len() != 2 {
                return Err(StreamError::InvalidShape(format!(
                    "raw LZ4 payloads must be 2-D, got {:?}",
                    shape
                )));
            }
            let prefix = u32::try_from(size).map_err(|_| {
                StreamError::InvalidShape(format!(
                    "raw LZ4 image {:?} exceeds the 4 GiB block limit",
                    shape
                ))
            })?;
            let mut prefixed = BytesMut::with_capacity(4 + blob.len());
            prefixed.put_u32_le(prefix);
            prefixed.put_slice(blob);
            let raw = lz4_flex::block::decompress_size_prepended(&prefixed)
                .map_err(|e| StreamError::Decompression(format!("LZ4 block: {}", e)))?;
            if raw.len() != size {
                return Err(StreamError::InvalidSize {
                    expected: size,
                    actual: raw.len(),
                });
            }
            raw
        }
        Encoding::BitshuffleLz4 => bitshuffle::decompress_lz4(blob, dtype.size(), elements)?,
    };

    let memory_shape: Vec<usize> = shape.iter().rev().copied().collect();
    let array = DataArray::new(dtype, memory_shape, raw)?;
    debug!(
        encoding = encoding.name(),
        decoded_size = array.as_bytes().len(),
        "Unpacked payload"
    );
    Ok(array)
}

/// Decode using the string tags found in an image info part
pub fn decode_tagged(dtype: &str, shape: &[usize], encoding: &str, blob: &[u8]) -> Result<DataArray> {
    let dtype = ElementType::parse(dtype)?;
    let encoding = Encoding::parse(encoding)?;
    decode_payload(dtype, shape, encoding, blob)
}

/// Encode an array the way the detector puts it on the wire
///
/// Inverse of [`decode_payload`]: the declared wire shape of the result is the
/// reverse of `array.shape()`.
pub fn encode_payload(array: &DataArray, encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Lz4 => Ok(lz4_flex::block::compress(array.as_bytes())),
        Encoding::BitshuffleLz4 => {
            bitshuffle::compress_lz4(array.as_bytes(), array.dtype().size(), None)
        }
    }
}

/// Declared wire shape for an in-memory array
pub fn wire_shape(array: &DataArray) -> Vec<usize> {
    array.shape().iter().rev().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Element;

    fn roundtrip<T: Element>(values: Vec<T>, encoding: Encoding) {
        let image = DataArray::from_vec(vec![6, 20], values).unwrap();
        let blob = encode_payload(&image, encoding).unwrap();
        let decoded = decode_payload(T::TYPE, &wire_shape(&image), encoding, &blob).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_roundtrip_all_types() {
        for encoding in [Encoding::Lz4, Encoding::BitshuffleLz4] {
            roundtrip((0..120).map(|i| i as u8).collect::<Vec<u8>>(), encoding);
            roundtrip((0..120).map(|i| i * 300).collect::<Vec<u16>>(), encoding);
            roundtrip((0..120).map(|i| i * 70_000).collect::<Vec<u32>>(), encoding);
            roundtrip((0..120).map(|i| i << 40).collect::<Vec<u64>>(), encoding);
            roundtrip((0..120).map(|i| -(i as i16)).collect::<Vec<i16>>(), encoding);
            roundtrip((0..120).map(|i| i as f32 * 0.25).collect::<Vec<f32>>(), encoding);
            roundtrip((0..120).map(|i| i as f64 / 3.0).collect::<Vec<f64>>(), encoding);
        }
    }

    #[test]
    fn test_axis_reversal_matches_transpose() {
        // wire data for a 3 (w) x 2 (h) image, fastest-varying first
        let wire: Vec<u16> = vec![1, 2, 3, 4, 5, 6];
        let blob = lz4_flex::block::compress(
            &wire.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>(),
        );
        let decoded = decode_payload(ElementType::Uint16, &[3, 2], Encoding::Lz4, &blob).unwrap();
        assert_eq!(decoded.shape(), &[2, 3]);

        // reference: wire is column-major [w, h]; its transpose is row-major [h, w]
        let (w, h) = (3, 2);
        let column_major = |x: usize, y: usize| wire[x + y * w];
        let mut reference = vec![0u16; w * h];
        for y in 0..h {
            for x in 0..w {
                reference[y * w + x] = column_major(x, y);
            }
        }
        assert_eq!(decoded.to_vec::<u16>().unwrap(), reference);
    }

    #[test]
    fn test_lz4_requires_2d() {
        let err = decode_payload(ElementType::Uint16, &[2, 2, 2], Encoding::Lz4, &[0]).unwrap_err();
        assert!(matches!(err, StreamError::InvalidShape(_)));
    }

    #[test]
    fn test_lz4_size_mismatch() {
        let image = DataArray::from_vec(vec![4, 4], vec![7u16; 16]).unwrap();
        let blob = encode_payload(&image, Encoding::Lz4).unwrap();
        let err = decode_payload(ElementType::Uint16, &[4, 5], Encoding::Lz4, &blob).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }

    #[test]
    fn test_overflowing_shape_is_decode_error() {
        for encoding in [Encoding::Lz4, Encoding::BitshuffleLz4] {
            let err = decode_payload(
                ElementType::Uint32,
                &[4294967296, 4294967296],
                encoding,
                &[0u8; 16],
            )
            .unwrap_err();
            assert!(matches!(err, StreamError::InvalidShape(_)), "{:?}", err);
            assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
        }
        let err =
            decode_payload(ElementType::Uint32, &[1 << 31, 2], Encoding::Lz4, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, StreamError::InvalidShape(_)));
    }

    #[test]
    fn test_unknown_encoding() {
        let err = decode_tagged("uint16", &[2, 2], "zstd<", &[]).unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedEncoding(_)));
        let err = decode_tagged("complex", &[2, 2], "lz4<", &[]).unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedElementType(_)));
    }

    #[test]
    fn test_encoding_tags() {
        assert_eq!(Encoding::BitshuffleLz4.tag(ElementType::Uint16), "bs16-lz4<");
        assert_eq!(Encoding::BitshuffleLz4.tag(ElementType::Uint32), "bs32-lz4<");
        assert_eq!(Encoding::parse("bs32-lz4<").unwrap(), Encoding::BitshuffleLz4);
    }
}
