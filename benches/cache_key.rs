//! Benchmarks for cache key fingerprinting
//!
//! This benchmark measures:
//! - Key derivation for short and long prompts
//! - Salted keys
//! - In-process store round trips

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use omni_orchestrator::cache::{CacheConfig, CacheKeyGenerator, CacheStore};
use omni_orchestrator::types::{GenerationParams, Request, Response};
use std::time::Duration;

fn request(prompt_len: usize) -> Request {
    Request::new(
        "x".repeat(prompt_len),
        "openai",
        "gpt-4o",
        GenerationParams::default(),
    )
}

fn bench_key_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key");
    let keys = CacheKeyGenerator::new();
    let salted = CacheKeyGenerator::new().with_salt("tenant-a");

    for len in [64usize, 2_048, 32_768] {
        let req = request(len);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::new("plain", len), &req, |b, req| {
            b.iter(|| keys.for_request(black_box(req)))
        });
        group.bench_with_input(BenchmarkId::new("salted", len), &req, |b, req| {
            b.iter(|| salted.for_request(black_box(req)))
        });
    }
    group.finish();
}

fn bench_store_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let store = CacheStore::new(CacheConfig::new().with_sweep_interval(Duration::ZERO));
    let req = request(512);
    let key = store.key_for(&req);
    let response = Response::success("openai", "y".repeat(4_096), 900, Duration::from_millis(800));

    c.bench_function("cache_store_set_get", |b| {
        b.to_async(&rt).iter(|| async {
            store.set(&key, &response, Duration::from_secs(60)).await;
            black_box(store.get(&key).await)
        })
    });
}

criterion_group!(benches, bench_key_generation, bench_store_round_trip);
criterion_main!(benches);
