//! Criterion measurements of complete dinners under each fork acquisition strategy.

#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use sync_bench::philosophers::{Dinner, DinnerConfig, PauseRange, Strategy};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("dinner");
    group.sample_size(20);

    for strategy in Strategy::ALL {
        for philosophers in [5, 10] {
            // No pauses, so the measurement is dominated by fork contention.
            let config = DinnerConfig::new(philosophers, strategy)
                .with_cycles(50)
                .with_eat(PauseRange::ZERO)
                .with_think(PauseRange::ZERO)
                .with_timeout(Duration::from_secs(30));

            let dinner = Dinner::new(config).expect("benchmark parameters are valid");

            group.bench_with_input(
                BenchmarkId::new(strategy.to_string(), philosophers),
                &dinner,
                |b, dinner| {
                    b.iter(|| {
                        assert!(dinner.run().is_completed(), "{} stalled", config.label());
                    });
                },
            );
        }
    }

    group.finish();
}
