//! Payload decoding benchmarks
//!
//! Measures decode throughput of full detector frames for both stream
//! encodings, without any container I/O.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use eiger_stream_rust::array::{DataArray, ElementType};
use eiger_stream_rust::codec::{decode_payload, encode_payload, wire_shape, Encoding};

/// 1 Mpixel frame with a smooth gradient and sparse hot pixels
fn frame() -> DataArray {
    let (height, width) = (1024usize, 1030usize);
    let values: Vec<u16> = (0..height * width)
        .map(|i| {
            if i % 997 == 0 {
                u16::MAX
            } else {
                ((i / width + i % width) % 64) as u16
            }
        })
        .collect();
    DataArray::from_vec(vec![height, width], values).unwrap()
}

fn bench_decode(c: &mut Criterion) {
    let image = frame();
    let shape = wire_shape(&image);
    let mut group = c.benchmark_group("decode_frame");
    group.throughput(Throughput::Bytes(image.as_bytes().len() as u64));

    for encoding in [Encoding::BitshuffleLz4, Encoding::Lz4] {
        let blob = encode_payload(&image, encoding).unwrap();
        group.bench_function(encoding.name(), |b| {
            b.iter(|| {
                let decoded =
                    decode_payload(ElementType::Uint16, &shape, encoding, black_box(&blob)).unwrap();
                black_box(decoded)
            });
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let image = frame();
    c.bench_function("encode_frame_bslz4", |b| {
        b.iter(|| {
            let blob = encode_payload(black_box(&image), Encoding::BitshuffleLz4).unwrap();
            black_box(blob)
        });
    });
}

criterion_group!(benches, bench_decode, bench_encode);

criterion_main!(benches);
