//! Benchmarks for compiled reductions and slice writes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use spartan_rs::test_support::random_array;
use spartan_rs::{write, DType, DistArray, Expr, Master, SpartanConfig};
use std::hint::black_box;
use std::time::Duration;

fn master() -> Master {
    let mut config = SpartanConfig::default();
    config.array.tile_dim = 128;
    Master::start(config).expect("master starts")
}

fn bench_sum(c: &mut Criterion) {
    let master = master();
    let mut group = c.benchmark_group("sum");
    group.sample_size(20);
    group.warm_up_time(Duration::from_millis(500));

    for &n in &[256usize, 512, 1024] {
        let (array, _) = random_array(&master, &[n, n], 1).expect("array");
        group.throughput(Throughput::Elements((n * n) as u64));
        for axis in [0usize, 1] {
            group.bench_with_input(BenchmarkId::new(format!("axis{axis}"), n), &n, |b, _| {
                b.iter(|| {
                    let out = Expr::array(array.clone()).sum(axis).evaluate(&master).expect("sum");
                    out.destroy().expect("destroy");
                    black_box(out.id())
                })
            });
        }
    }
    group.finish();
}

fn bench_argmin(c: &mut Criterion) {
    let master = master();
    let mut group = c.benchmark_group("argmin");
    group.sample_size(20);

    for &n in &[256usize, 512] {
        let (array, _) = random_array(&master, &[n, n], 2).expect("array");
        group.throughput(Throughput::Elements((n * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let out = Expr::array(array.clone()).argmin(0).evaluate(&master).expect("argmin");
                out.destroy().expect("destroy");
                black_box(out.id())
            })
        });
    }
    group.finish();
}

fn bench_distributed_write(c: &mut Criterion) {
    let master = master();
    let mut group = c.benchmark_group("distributed_write");
    group.sample_size(20);

    let n = 512usize;
    let (source, _) = random_array(&master, &[n / 2, n / 2], 3).expect("array");
    let target = DistArray::ndarray(&master, &[n, n], DType::F64, false).expect("array");
    group.throughput(Throughput::Elements((n * n / 4) as u64));
    group.bench_function("offset_quarter", |b| {
        b.iter(|| {
            write(
                &target,
                &[n / 8..n / 8 + n / 2, n / 3..n / 3 + n / 2],
                source.clone(),
                &[0..n / 2, 0..n / 2],
            )
            .expect("write")
        })
    });
    group.finish();
}

criterion_group!(benches, bench_sum, bench_argmin, bench_distributed_write);
criterion_main!(benches);
