use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stackhist::{aggregate::Aggregator, binning::BinSpecRegistry, data::Dataset};

fn synthetic_dataset(n: usize) -> Dataset {
    let mut rng = fastrand::Rng::with_seed(0);
    Dataset::new("bench")
        .with_column("pt_l", (0..n).map(|_| rng.f64() * 5500.0).collect())
        .unwrap()
        .with_column("eta_l", (0..n).map(|_| rng.f64() * 5.0 - 2.5).collect())
        .unwrap()
        .with_column("mt", (0..n).map(|_| rng.f64() * 11000.0).collect())
        .unwrap()
        .with_column("weight", (0..n).map(|_| rng.f64()).collect())
        .unwrap()
}

fn aggregate_benchmark(c: &mut Criterion) {
    let registry = BinSpecRegistry::new()
        .with("pt_l", 500, 0.0, 5000.0)
        .unwrap()
        .with("eta_l", 30, -2.5, 2.5)
        .unwrap()
        .with("mt", 500, 0.0, 10000.0)
        .unwrap()
        .freeze();
    let dataset = synthetic_dataset(1_000_000);
    let observables = registry.observables();
    let mut group = c.benchmark_group("aggregate");
    for partitions in [1, 4, 16] {
        let aggregator = Aggregator::new(registry.clone()).with_partitions(partitions);
        group.bench_with_input(
            BenchmarkId::from_parameter(partitions),
            &partitions,
            |b, _| b.iter(|| black_box(aggregator.fill(&dataset, &observables).unwrap())),
        );
    }
    group.finish();
}

criterion_group!(benches, aggregate_benchmark);
criterion_main!(benches);
