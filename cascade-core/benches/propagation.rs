//! Benchmarks for propagation.
//!
//! Run with: `cargo bench --package cascade-core --bench propagation`
//!
//! # Performance Baselines
//!
//! These benchmarks establish baselines for:
//! - A write through a long chain of computations
//! - A write fanning out to many independent computations
//! - A wide diamond where one consumer joins many derived inputs
//! - Batched writes to many cells

use std::hint::black_box;

use cascade_core::{
    batch, computation, configure, data, root, Computation, DataCell, EngineConfig,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

// ============================================================================
// Network Builders
// ============================================================================

fn quiet() {
    configure(EngineConfig::default().with_warn_unowned(false)).unwrap();
}

/// `source -> c1 -> c2 -> ... -> cN`
fn chain(len: usize) -> (DataCell<u64>, Computation<u64>) {
    let source = data(0u64).unwrap();
    let first = {
        let source = source.clone();
        computation(move || Ok(source.read())).unwrap()
    };
    let mut last = first;
    for _ in 0..len {
        let prev = last.clone();
        last = computation(move || Ok(prev.read()? + 1)).unwrap();
    }
    (source, last)
}

/// `source -> {c1, ..., cN}`
fn fan_out(width: usize) -> DataCell<u64> {
    let source = data(0u64).unwrap();
    for i in 0..width as u64 {
        let source = source.clone();
        computation(move || Ok(source.read() + i)).unwrap();
    }
    source
}

/// `source -> {c1, ..., cN} -> sink`
fn diamond(width: usize) -> (DataCell<u64>, Computation<u64>) {
    let source = data(0u64).unwrap();
    let middle: Vec<Computation<u64>> = (0..width as u64)
        .map(|i| {
            let source = source.clone();
            computation(move || Ok(source.read() * i)).unwrap()
        })
        .collect();
    let sink = computation(move || {
        let mut total = 0;
        for m in &middle {
            total += m.read()?;
        }
        Ok(total)
    })
    .unwrap();
    (source, sink)
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_chain(c: &mut Criterion) {
    quiet();
    let mut group = c.benchmark_group("chain");
    for len in [10, 100, 1_000] {
        let (source, last) = root(|_| chain(len));
        let mut n = 0;
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                n += 1;
                source.write(n).unwrap();
                black_box(last.peek())
            })
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    quiet();
    let mut group = c.benchmark_group("fan_out");
    for width in [10, 100, 1_000] {
        let source = root(|_| fan_out(width));
        let mut n = 0;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                n += 1;
                black_box(source.write(n).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_diamond(c: &mut Criterion) {
    quiet();
    let mut group = c.benchmark_group("diamond");
    for width in [10, 100, 1_000] {
        let (source, sink) = root(|_| diamond(width));
        let mut n = 0;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                n += 1;
                source.write(n).unwrap();
                black_box(sink.peek())
            })
        });
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    quiet();
    let cells: Vec<DataCell<u64>> = (0..100).map(|_| data(0u64).unwrap()).collect();
    let sum = {
        let cells = cells.clone();
        root(|_| computation(move || Ok(cells.iter().map(DataCell::read).sum::<u64>())).unwrap())
    };

    let mut n = 0;
    c.bench_function("batch_100_writes", |b| {
        b.iter(|| {
            n += 1;
            batch(|| {
                for cell in &cells {
                    cell.write(n)?;
                }
                Ok(())
            })
            .unwrap();
            black_box(sum.peek())
        })
    });
}

criterion_group!(benches, bench_chain, bench_fan_out, bench_diamond, bench_batch);

criterion_main!(benches);
