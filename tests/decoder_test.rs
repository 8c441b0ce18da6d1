//! Decoder tests against hand-built wire payloads
//!
//! The payloads here are produced directly with `lz4_flex` and the bitshuffle
//! transform instead of the crate's own encoder.

use eiger_stream_rust::array::{DataArray, ElementType};
use eiger_stream_rust::codec::bitshuffle::{bitshuffle, HEADER_SIZE};
use eiger_stream_rust::codec::{decode_payload, decode_tagged, Encoding};
use eiger_stream_rust::error::{ErrorKind, StreamError};

fn le_bytes(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn test_raw_lz4_block_without_size_prefix() {
    // wire shape [w, h] = [4, 3]
    let values: Vec<u32> = (0..12).map(|i| i * 1000).collect();
    let blob = lz4_flex::block::compress(&le_bytes(&values));

    let image = decode_payload(ElementType::Uint32, &[4, 3], Encoding::Lz4, &blob).unwrap();
    assert_eq!(image.shape(), &[3, 4]);
    assert_eq!(image.to_vec::<u32>().unwrap(), values);
}

#[test]
fn test_bitshuffle_blob_with_trailing_elements() {
    // 19 elements: two blocks of 8 plus 3 verbatim trailing elements
    let values: Vec<u16> = (0..19).map(|i| i * 37 + 1).collect();
    let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

    let mut blob = Vec::new();
    blob.extend_from_slice(&(raw.len() as u64).to_be_bytes());
    blob.extend_from_slice(&(8u32 * 2).to_be_bytes());
    for block in raw[..32].chunks(16) {
        let mut shuffled = vec![0u8; 16];
        bitshuffle(block, &mut shuffled, 2);
        let compressed = lz4_flex::block::compress(&shuffled);
        blob.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        blob.extend_from_slice(&compressed);
    }
    blob.extend_from_slice(&raw[32..]);

    let image = decode_tagged("uint16", &[19, 1], "bs16-lz4<", &blob).unwrap();
    assert_eq!(image.shape(), &[1, 19]);
    assert_eq!(image.to_vec::<u16>().unwrap(), values);
}

#[test]
fn test_element_count_mismatch_is_decode_error() {
    let image = DataArray::from_vec(vec![4, 4], vec![3u32; 16]).unwrap();
    let blob = eiger_stream_rust::codec::encode_payload(&image, Encoding::BitshuffleLz4).unwrap();
    assert!(blob.len() > HEADER_SIZE);

    let err = decode_payload(ElementType::Uint32, &[4, 5], Encoding::BitshuffleLz4, &blob)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
}

#[test]
fn test_unsupported_encoding_and_type() {
    let err = decode_tagged("uint16", &[2, 2], "zstd<", &[0u8; 8]).unwrap_err();
    assert!(matches!(err, StreamError::UnsupportedEncoding(_)));

    let err = decode_tagged("complex64", &[2, 2], "lz4<", &[0u8; 8]).unwrap_err();
    assert!(matches!(err, StreamError::UnsupportedElementType(_)));
}

#[test]
fn test_corrupt_lz4_is_decode_error() {
    let err = decode_payload(ElementType::Uint16, &[2, 2], Encoding::Lz4, &[0xff; 6]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
}
