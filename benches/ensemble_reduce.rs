//! Benchmarks for ensemble reduction
//!
//! This benchmark measures:
//! - Best-of-N scoring across ensemble sizes
//! - Voting (equivalence-class partitioning)
//! - Weighted averaging of numeric answers

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use omni_orchestrator::ensemble::{
    EnsembleAggregator, EnsembleConfig, EnsembleMember, EnsembleStrategy,
};
use omni_orchestrator::types::Response;
use std::time::Duration;

fn fixture(n: usize) -> (EnsembleConfig, Vec<Response>) {
    let members = (0..n)
        .map(|i| EnsembleMember::new(format!("b{}", i), ""))
        .collect();
    let responses = (0..n)
        .map(|i| {
            let body = format!(
                "```yaml\napiVersion: apps/v1\nkind: Deployment\nspec:\n  replicas: {}\n{}```",
                i % 3,
                "  # padding line\n".repeat(20 + i)
            );
            Response::success(format!("b{}", i), body, 200, Duration::from_millis(50))
        })
        .collect();
    (EnsembleConfig::new(members), responses)
}

fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("ensemble_reduce");
    for n in [3usize, 8, 16] {
        let (config, responses) = fixture(n);
        for strategy in [
            EnsembleStrategy::BestOfN,
            EnsembleStrategy::Voting,
            EnsembleStrategy::Consensus { min_agreement: None },
        ] {
            group.bench_with_input(
                BenchmarkId::new(strategy.as_str(), n),
                &responses,
                |b, responses| {
                    b.iter(|| {
                        EnsembleAggregator::reduce(
                            black_box(&config),
                            strategy,
                            responses.clone(),
                        )
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_weighted_average(c: &mut Criterion) {
    let config = EnsembleConfig::new(
        (0..5)
            .map(|i| EnsembleMember::new(format!("b{}", i), "").with_weight(1.0 + i as f64))
            .collect(),
    );
    let responses: Vec<Response> = (0..5)
        .map(|i| {
            Response::success(
                format!("b{}", i),
                format!(r#"{{"security": {}, "cost": {}.5}}"#, 6 + i, i),
                12,
                Duration::ZERO,
            )
        })
        .collect();
    c.bench_function("weighted_average_json", |b| {
        b.iter(|| {
            EnsembleAggregator::reduce(
                black_box(&config),
                EnsembleStrategy::WeightedAverage,
                responses.clone(),
            )
        })
    });
}

criterion_group!(benches, bench_strategies, bench_weighted_average);
criterion_main!(benches);
