//! Bitshuffle + LZ4 block codec
//!
//! Byte-compatible with the bitshuffle HDF5 filter format used by the detector:
//!
//! ```text
//! 0..8    uncompressed size in bytes      (u64, big-endian)
//! 8..12   block size in bytes             (u32, big-endian)
//! 12..    for each block: compressed size (u32, big-endian) + LZ4 block
//!         trailing (n % 8) elements copied verbatim
//! ```
//!
//! Inside a block of `n` elements (a multiple of 8) the bits are transposed so
//! that bit `k` of byte `j` of every element forms one contiguous row of `n`
//! bits, least significant bit first.

use crate::error::{Result, StreamError};
use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

/// Blocks are always a multiple of this many elements
pub const BLOCKED_MULT: usize = 8;

/// Size of the codec header in bytes
pub const HEADER_SIZE: usize = 12;

const TARGET_BLOCK_BYTES: usize = 8192;
const MIN_BLOCK_ELEMENTS: usize = 128;

/// Default block size in elements for a given element size
pub fn default_block_size(elem_size: usize) -> usize {
    let block = (TARGET_BLOCK_BYTES / elem_size.max(1)) / BLOCKED_MULT * BLOCKED_MULT;
    block.max(MIN_BLOCK_ELEMENTS)
}

/// Transpose bits of `input` into `out`
///
/// `input.len()` must be a multiple of `8 * elem_size`.
pub fn bitshuffle(input: &[u8], out: &mut [u8], elem_size: usize) {
    let n = input.len() / elem_size;
    let row = n / BLOCKED_MULT;
    out[..input.len()].fill(0);
    for (i, element) in input.chunks_exact(elem_size).enumerate() {
        for (j, &byte) in element.iter().enumerate() {
            if byte == 0 {
                continue;
            }
            for k in 0..8 {
                if (byte >> k) & 1 == 1 {
                    out[(j * 8 + k) * row + i / 8] |= 1 << (i % 8);
                }
            }
        }
    }
}

/// Inverse of [`bitshuffle`]
pub fn bitunshuffle(input: &[u8], out: &mut [u8], elem_size: usize) {
    let n = input.len() / elem_size;
    let row = n / BLOCKED_MULT;
    out[..input.len()].fill(0);
    for j in 0..elem_size {
        for k in 0..8 {
            let bits = &input[(j * 8 + k) * row..(j * 8 + k + 1) * row];
            for (ib, &byte) in bits.iter().enumerate() {
                if byte == 0 {
                    continue;
                }
                for m in 0..8 {
                    if (byte >> m) & 1 == 1 {
                        out[(ib * 8 + m) * elem_size + j] |= 1 << k;
                    }
                }
            }
        }
    }
}

/// Block sizes (in elements) used for `n` elements
fn block_plan(n: usize, block_size: usize) -> impl Iterator<Item = usize> {
    let full = n / block_size;
    let last = n % block_size;
    let last = last - last % BLOCKED_MULT;
    std::iter::repeat(block_size)
        .take(full)
        .chain((last > 0).then_some(last))
}

/// Compress `data` with bitshuffle + LZ4, header included
///
/// `block_size` is in elements; `None` selects [`default_block_size`].
pub fn compress_lz4(data: &[u8], elem_size: usize, block_size: Option<usize>) -> Result<Vec<u8>> {
    if elem_size == 0 || data.len() % elem_size != 0 {
        return Err(StreamError::InvalidSize {
            expected: data.len() / elem_size.max(1) * elem_size.max(1),
            actual: data.len(),
        });
    }
    let block_size = block_size.unwrap_or_else(|| default_block_size(elem_size));
    if block_size == 0 || block_size % BLOCKED_MULT != 0 {
        return Err(StreamError::Decompression(format!(
            "block size {} is not a positive multiple of {}",
            block_size, BLOCKED_MULT
        )));
    }

    let n = data.len() / elem_size;
    let mut out = BytesMut::with_capacity(HEADER_SIZE + data.len() / 2);
    out.put_u64(data.len() as u64);
    out.put_u32((block_size * elem_size) as u32);

    let mut scratch = vec![0u8; block_size * elem_size];
    let mut offset = 0;
    for count in block_plan(n, block_size) {
        let bytes = count * elem_size;
        bitshuffle(&data[offset..offset + bytes], &mut scratch, elem_size);
        let compressed = lz4_flex::block::compress(&scratch[..bytes]);
        out.put_u32(compressed.len() as u32);
        out.put_slice(&compressed);
        offset += bytes;
    }
    out.put_slice(&data[offset..]);

    trace!(
        elements = n,
        block_size,
        compressed_size = out.len(),
        "bitshuffle-lz4 compressed"
    );
    Ok(out.to_vec())
}

/// Decompress a bitshuffle + LZ4 blob holding `expected_elements` elements
///
/// The block size is read from header bytes 8..12 (in bytes) and divided by
/// `elem_size`. The uncompressed size in the header must equal
/// `expected_elements * elem_size`.
pub fn decompress_lz4(blob: &[u8], elem_size: usize, expected_elements: usize) -> Result<Vec<u8>> {
    if blob.len() < HEADER_SIZE {
        return Err(StreamError::Decompression(format!(
            "bitshuffle blob too short: {} bytes",
            blob.len()
        )));
    }
    let mut header = &blob[..HEADER_SIZE];
    let total_bytes = header.get_u64() as usize;
    let block_bytes = header.get_u32() as usize;

    let expected_bytes = expected_elements * elem_size;
    if total_bytes != expected_bytes {
        return Err(StreamError::InvalidSize {
            expected: expected_bytes,
            actual: total_bytes,
        });
    }
    if elem_size == 0 || block_bytes == 0 || block_bytes % elem_size != 0 {
        return Err(StreamError::Decompression(format!(
            "block size {} bytes is not a multiple of element size {}",
            block_bytes, elem_size
        )));
    }
    let block_size = block_bytes / elem_size;
    if block_size % BLOCKED_MULT != 0 {
        return Err(StreamError::Decompression(format!(
            "block size {} elements is not a multiple of {}",
            block_size, BLOCKED_MULT
        )));
    }

    let mut out = vec![0u8; expected_bytes];
    let mut scratch = vec![0u8; block_bytes];
    let mut pos = HEADER_SIZE;
    let mut offset = 0;
    for count in block_plan(expected_elements, block_size) {
        let bytes = count * elem_size;
        let size_end = pos + 4;
        if size_end > blob.len() {
            return Err(StreamError::Decompression(
                "truncated block header".to_string(),
            ));
        }
        let compressed_len = (&blob[pos..size_end]).get_u32() as usize;
        let block_end = size_end + compressed_len;
        if block_end > blob.len() {
            return Err(StreamError::Decompression(format!(
                "block of {} bytes exceeds blob",
                compressed_len
            )));
        }
        let written = lz4_flex::block::decompress_into(&blob[size_end..block_end], &mut scratch[..bytes])
            .map_err(|e| StreamError::Decompression(format!("LZ4 block: {}", e)))?;
        if written != bytes {
            return Err(StreamError::InvalidSize {
                expected: bytes,
                actual: written,
            });
        }
        bitunshuffle(&scratch[..bytes], &mut out[offset..offset + bytes], elem_size);
        offset += bytes;
        pos = block_end;
    }

    let leftover = expected_bytes - offset;
    if blob.len() - pos != leftover {
        return Err(StreamError::InvalidSize {
            expected: pos + leftover,
            actual: blob.len(),
        });
    }
    out[offset..].copy_from_slice(&blob[pos..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(bytes: usize) -> Vec<u8> {
        (0..bytes).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_bit_layout() {
        // eight u8 elements, only element 3 has bit 0 set
        let input = [0u8, 0, 0, 1, 0, 0, 0, 0];
        let mut out = [0u8; 8];
        bitshuffle(&input, &mut out, 1);
        assert_eq!(out, [0b0000_1000, 0, 0, 0, 0, 0, 0, 0]);

        // element 0 bit 1 of byte 1 (u16 value 0x0200)
        let input = [0x00, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut out = [0u8; 16];
        bitshuffle(&input, &mut out, 2);
        assert_eq!(out[9], 1);
        assert_eq!(out.iter().filter(|&&b| b != 0).count(), 1);
    }

    #[test]
    fn test_shuffle_unshuffle() {
        for elem_size in [1, 2, 4, 8] {
            let data = ramp(64 * elem_size);
            let mut shuffled = vec![0u8; data.len()];
            let mut restored = vec![0u8; data.len()];
            bitshuffle(&data, &mut shuffled, elem_size);
            bitunshuffle(&shuffled, &mut restored, elem_size);
            assert_eq!(data, restored);
        }
    }

    #[test]
    fn test_header_layout() {
        let data = ramp(2 * 1000);
        let blob = compress_lz4(&data, 2, Some(256)).unwrap();
        assert_eq!(&blob[..8], &2000u64.to_be_bytes());
        assert_eq!(&blob[8..12], &512u32.to_be_bytes());
    }

    #[test]
    fn test_partial_blocks_and_leftover() {
        // 1003 elements: three blocks of 256, one of 232, three verbatim elements
        let data = ramp(4 * 1003);
        let blob = compress_lz4(&data, 4, Some(256)).unwrap();
        assert_eq!(&blob[blob.len() - 12..], &data[data.len() - 12..]);
        let restored = decompress_lz4(&blob, 4, 1003).unwrap();
        assert_eq!(data, restored);
    }

    #[test]
    fn test_fewer_elements_than_one_group() {
        let data = ramp(5 * 2);
        let blob = compress_lz4(&data, 2, None).unwrap();
        assert_eq!(blob.len(), HEADER_SIZE + 10);
        assert_eq!(decompress_lz4(&blob, 2, 5).unwrap(), data);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let data = ramp(2 * 64);
        let blob = compress_lz4(&data, 2, None).unwrap();
        let err = decompress_lz4(&blob, 2, 65).unwrap_err();
        assert!(matches!(err, StreamError::InvalidSize { .. }));
    }

    #[test]
    fn test_truncated_blob() {
        let data = ramp(2 * 4096);
        let blob = compress_lz4(&data, 2, None).unwrap();
        assert!(decompress_lz4(&blob[..blob.len() / 2], 2, 4096).is_err());
        assert!(decompress_lz4(&blob[..6], 2, 4096).is_err());
    }

    #[test]
    fn test_default_block_size() {
        assert_eq!(default_block_size(1), 8192);
        assert_eq!(default_block_size(2), 4096);
        assert_eq!(default_block_size(4), 2048);
        assert_eq!(default_block_size(128), MIN_BLOCK_ELEMENTS);
    }
}
