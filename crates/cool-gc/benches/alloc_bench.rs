//! Allocation and collection benchmarks
//!
//! Run with: `cargo bench -p cool-gc`

use cool_gc::{Gc, Klass, MarkSweepGc, ObjectRef, ObjectType, ZeroGc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

const HEAP_SIZE: usize = 1 << 20;

/// Bump allocation until the arena is nearly full.
fn zero_gc_allocation(c: &mut Criterion) {
    let klass = Klass::new(2, ObjectType::Other);

    c.bench_function("zero_gc_allocate_1000", |b| {
        b.iter(|| {
            let mut gc = ZeroGc::new(HEAP_SIZE).unwrap();
            for _ in 0..1000 {
                black_box(gc.allocate(&klass));
            }
        });
    });
}

/// First-fit allocation under pressure, with collections triggered by
/// exhaustion.
fn mark_sweep_allocation(c: &mut Criterion) {
    let klass = Klass::new(2, ObjectType::Other);

    c.bench_function("mark_sweep_allocate_churn", |b| {
        b.iter(|| {
            let mut gc = MarkSweepGc::new(64 * 1024).unwrap();
            for _ in 0..10_000 {
                let obj = gc.allocate(&klass);
                unsafe { ObjectRef::from_address(obj) }.zero_fields(0);
            }
            black_box(gc.stats().collections)
        });
    });
}

/// Pause time for a heap where every other object is reachable.
fn mark_sweep_pause(c: &mut Criterion) {
    let mut group = c.benchmark_group("mark_sweep_pause");
    let node = Klass::new(2, ObjectType::Other);

    for num_objects in [100, 1000, 5000] {
        group.bench_with_input(
            BenchmarkId::new("objects", num_objects),
            &num_objects,
            |b, &n| {
                b.iter_custom(|iters| {
                    let mut total = std::time::Duration::ZERO;
                    for _ in 0..iters {
                        let mut gc = MarkSweepGc::new(HEAP_SIZE).unwrap();
                        let mut scope = gc.enter_scope();
                        for i in 0..n {
                            let obj = scope.allocate(&node);
                            unsafe { ObjectRef::from_address(obj) }.zero_fields(0);
                            if i % 2 == 0 {
                                scope.reg_root(obj);
                            }
                        }

                        let start = std::time::Instant::now();
                        black_box(scope.collect());
                        total += start.elapsed();
                    }
                    total
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    zero_gc_allocation,
    mark_sweep_allocation,
    mark_sweep_pause
);
criterion_main!(benches);
