//! Criterion measurements of the contention harness, one benchmark per primitive.
//!
//! Each iteration is a complete contention run including thread startup, so the numbers are
//! comparable with the CLI output rather than with per-lock microbenchmarks.

#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use sync_bench::primitives::{Primitive, Semaphore, SpinLock, SpinPolicy};
use sync_bench::{Scenario, run};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");

    for primitive in Primitive::ALL {
        for threads in [1, 4] {
            let scenario = Scenario::new(primitive, threads, 1000)
                .expect("benchmark parameters are valid");

            group.bench_with_input(
                BenchmarkId::new(primitive.to_string(), threads),
                &scenario,
                |b, scenario| {
                    b.iter(|| black_box(run(scenario)).final_counter());
                },
            );
        }
    }

    group.finish();

    // Uncontended acquire/release cost of the primitives this crate implements itself.
    let mut group = c.benchmark_group("uncontended");

    let semaphore = Semaphore::new(1);
    group.bench_function("semaphore_acquire_release", |b| {
        b.iter(|| drop(black_box(semaphore.acquire())));
    });

    let spin_lock = SpinLock::new(0_u64, SpinPolicy::Spin);
    group.bench_function("spin_lock_increment", |b| {
        b.iter(|| {
            let mut guard = spin_lock.lock();
            *guard = guard.wrapping_add(1);
        });
    });

    group.finish();
}
