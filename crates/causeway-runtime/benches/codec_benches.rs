//! Benchmarks for the streaming wire codec.

use causeway_runtime::{encode_to_vec, BufferReader, WireCodec};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_string_encode(c: &mut Criterion) {
    let value = "the quick brown fox jumps over the lazy dog".repeat(8);
    c.bench_function("encode_string_344b", |b| {
        b.iter(|| encode_to_vec(black_box(&value)).unwrap())
    });
}

fn bench_string_decode(c: &mut Criterion) {
    let value = "the quick brown fox jumps over the lazy dog".repeat(8);
    let encoded = encode_to_vec(&value).unwrap();
    c.bench_function("decode_string_344b", |b| {
        b.iter(|| {
            let mut reader = BufferReader::new(black_box(&encoded));
            String::read(&mut reader).unwrap()
        })
    });
}

fn bench_record_roundtrip(c: &mut Criterion) {
    let value: Vec<Option<u64>> = (0..256)
        .map(|i| if i % 3 == 0 { None } else { Some(i) })
        .collect();
    c.bench_function("roundtrip_option_u64_x256", |b| {
        b.iter(|| {
            let encoded = encode_to_vec(black_box(&value)).unwrap();
            let mut reader = BufferReader::new(&encoded);
            Vec::<Option<u64>>::read(&mut reader).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_string_encode,
    bench_string_decode,
    bench_record_roundtrip
);
criterion_main!(benches);
