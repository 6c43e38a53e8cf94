//! Codec benchmarks for switchboard-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use switchboard_protocol::{codec, Envelope};

fn bench_encode_small(c: &mut Criterion) {
    let envelope = Envelope::new("notify", json!({"text": "x".repeat(64)}));

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::encode(black_box(&envelope)))
    });
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let envelope = Envelope::new("notify", json!({"text": "x".repeat(64)}));
    let encoded = codec::encode(&envelope).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::decode(black_box(encoded.as_bytes())))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let envelope = Envelope::new(
        "chat",
        json!({"room": "lobby", "from": 42, "body": "y".repeat(256)}),
    );

    c.bench_function("roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&envelope)).unwrap();
            codec::decode(black_box(encoded.as_bytes())).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_roundtrip
);
criterion_main!(benches);
