//! Fan-out benchmarks for switchboard-core.
//!
//! Connections run over the in-memory transport; each peer is drained by a
//! background task so queues never fill.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use switchboard_core::{handler_fn, Hub};
use switchboard_protocol::Envelope;
use switchboard_transport::memory;
use tokio::runtime::Runtime;

fn hub_with_connections(rt: &Runtime, users: usize, per_user: usize) -> Hub {
    let hub = Hub::default();
    rt.block_on(async {
        for user in 0..users {
            for _ in 0..per_user {
                let (transport, mut peer) = memory::duplex();
                hub.add(transport, user as u64, false, handler_fn(|_c, env| Ok(env)))
                    .await
                    .unwrap();
                tokio::spawn(async move { while peer.recv().await.is_some() {} });
            }
        }
    });
    hub
}

fn bench_broadcast(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let envelope = Envelope::new("notify", json!({"text": "x".repeat(64)}));

    let mut group = c.benchmark_group("broadcast");
    for connections in [10usize, 100, 1000] {
        let hub = hub_with_connections(&rt, connections, 1);
        group.throughput(Throughput::Elements(connections as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(connections),
            &connections,
            |b, _| b.iter(|| rt.block_on(hub.broadcast(black_box(&envelope))).unwrap()),
        );
        hub.cleanup();
    }
    group.finish();
}

fn bench_set_message(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let envelope = Envelope::new("notify", json!({"n": 1}));

    let mut group = c.benchmark_group("set_message");
    for per_user in [1usize, 4, 16] {
        let hub = hub_with_connections(&rt, 100, per_user);
        group.throughput(Throughput::Elements(per_user as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(per_user),
            &per_user,
            |b, _| b.iter(|| rt.block_on(hub.set_message(50u64, black_box(&envelope))).unwrap()),
        );
        hub.cleanup();
    }
    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_set_message);
criterion_main!(benches);
