//! Iterator algebra benchmarks: fixed scans, intersections, unions,
//! and end-to-end constraint reads.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::{Duration, Instant};

use quiver::constraint::{Constraint, StringCons};
use quiver::error::Advance;
use quiver::iter::{
    AndIterator, BoxedIter, Budget, Direction, FixedIterator, IdIterator, OrIterator,
};
use quiver::read::ReadEngine;
use quiver::store::{MemStore, PrimitiveData, PrimitiveStore};
use quiver::ticket::TicketPrinter;
use quiver::{Datatype, Id, Store};

fn fixed(ids: impl Iterator<Item = u64>) -> BoxedIter {
    Box::new(FixedIterator::new(
        ids.map(Id::new).collect(),
        Direction::Forward,
    ))
}

fn drain(it: &mut dyn IdIterator) -> u64 {
    let mut budget = Budget::unlimited();
    let mut n = 0;
    while let Advance::Id(_) = it.next_id(&mut budget).expect("next") {
        n += 1;
    }
    n
}

fn bench_fixed_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_scan");
    for size in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut it = FixedIterator::new(
                    (0..size).map(Id::new).collect(),
                    Direction::Forward,
                );
                drain(&mut it)
            });
        });
    }
    group.finish();
}

fn bench_and_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("and_merge");
    for size in [1_000u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let evens = fixed((0..size).map(|i| i * 2));
                let threes = fixed((0..size).map(|i| i * 3));
                let mut it = AndIterator::create_commit(
                    vec![evens, threes],
                    Direction::Forward,
                    Id::ZERO,
                    Id::NONE,
                )
                .expect("and");
                drain(it.as_mut())
            });
        });
    }
    group.finish();
}

fn bench_or_union(c: &mut Criterion) {
    let mut group = c.benchmark_group("or_union");
    for children in [2usize, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(children),
            &children,
            |b, &children| {
                b.iter(|| {
                    let streams: Vec<BoxedIter> = (0..children)
                        .map(|k| fixed((0..2_000u64).map(|i| i * children as u64 + k as u64)))
                        .collect();
                    let mut it = OrIterator::create_commit(
                        streams,
                        Direction::Forward,
                        Id::ZERO,
                        Id::NONE,
                        None,
                    )
                    .expect("or");
                    drain(it.as_mut())
                });
            },
        );
    }
    group.finish();
}

fn bench_constraint_read(c: &mut Criterion) {
    let store = MemStore::new();
    for i in 0..10_000u32 {
        store
            .primitive_alloc(PrimitiveData {
                name: Some("item".into()),
                value: Some(format!("v{}", i % 100)),
                datatype: Datatype::String,
                live: true,
                ..PrimitiveData::default()
            })
            .expect("alloc");
    }
    let store: Store = Arc::new(store);
    let engine = ReadEngine::new(store, TicketPrinter::new());

    c.bench_function("constraint_read_value_eq", |b| {
        b.iter(|| {
            let mut con = Constraint::new();
            con.name = vec![StringCons::eq("item")];
            con.value = vec![StringCons::eq("v42")];
            engine
                .execute(con, Instant::now() + Duration::from_secs(30))
                .expect("read")
                .count
        });
    });
}

criterion_group!(
    benches,
    bench_fixed_scan,
    bench_and_merge,
    bench_or_union,
    bench_constraint_read
);
criterion_main!(benches);
