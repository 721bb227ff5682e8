//! Search Benchmarks
//!
//! Run with: cargo bench --bench search

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::Rng;
use slabdb::simd::{dot_product, squared_norm};
use slabdb::FlatIndex;

fn random_vector(dim: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect()
}

fn bench_dot_product(c: &mut Criterion) {
    let dims = [64, 128, 256, 512];

    let mut group = c.benchmark_group("dot_product");

    for dim in dims {
        group.throughput(Throughput::Elements(dim as u64));

        let a = random_vector(dim);
        let b = random_vector(dim);

        group.bench_function(format!("dim_{}", dim), |bencher| {
            bencher.iter(|| dot_product(black_box(&a), black_box(&b)))
        });
    }

    group.finish();
}

fn bench_squared_norm(c: &mut Criterion) {
    let dims = [64, 128, 256, 512];

    let mut group = c.benchmark_group("squared_norm");

    for dim in dims {
        group.throughput(Throughput::Elements(dim as u64));

        let v = random_vector(dim);

        group.bench_function(format!("dim_{}", dim), |bencher| {
            bencher.iter(|| squared_norm(black_box(&v)))
        });
    }

    group.finish();
}

fn bench_batched_search(c: &mut Criterion) {
    let dim = 128;
    let rows = 10_000;

    let mut index = FlatIndex::new(dim, rows).unwrap();
    for _ in 0..rows {
        index.append(&random_vector(dim)).unwrap();
    }

    let mut group = c.benchmark_group("flat_search");
    group.sample_size(20);

    for batch in [1usize, 10, 100] {
        let queries: Vec<Vec<f32>> = (0..batch).map(|_| random_vector(dim)).collect();

        group.throughput(Throughput::Elements((rows * batch) as u64));
        group.bench_function(format!("10k_rows_batch_{}", batch), |bencher| {
            bencher.iter(|| index.search(black_box(&queries), 10).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dot_product,
    bench_squared_norm,
    bench_batched_search
);
criterion_main!(benches);
