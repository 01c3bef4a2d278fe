use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tacedge_gateway::crypto::CryptoEngine;

fn benchmark_encrypt(c: &mut Criterion) {
    let engine = CryptoEngine::new("benchmark-master-key");
    let plaintext = "FLASH PRECEDENCE MESSAGE PAYLOAD ".repeat(8);

    let mut group = c.benchmark_group("encrypt");
    group.sample_size(200);
    group.measurement_time(std::time::Duration::from_secs(10));

    group.bench_function("encrypt_short_message", |b| {
        b.iter(|| black_box(engine.encrypt(black_box(&plaintext)).unwrap()));
    });

    group.finish();
}

fn benchmark_roundtrip(c: &mut Criterion) {
    let engine = CryptoEngine::new("benchmark-master-key");
    let plaintext = "FLASH PRECEDENCE MESSAGE PAYLOAD ".repeat(8);
    let payload = engine.encrypt(&plaintext).unwrap();

    let mut group = c.benchmark_group("decrypt");
    group.sample_size(200);
    group.measurement_time(std::time::Duration::from_secs(10));

    group.bench_function("decrypt_short_message", |b| {
        b.iter(|| black_box(engine.decrypt(black_box(&payload)).unwrap()));
    });

    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .sample_size(200)
        .measurement_time(std::time::Duration::from_secs(10))
        .warm_up_time(std::time::Duration::from_secs(3));
    targets = benchmark_encrypt, benchmark_roundtrip
);
criterion_main!(benches);
