//! The synchronization-primitive contention harness.
//!
//! A [`Scenario`] describes `T` worker threads that each perform `I` protected increments of a
//! shared counter. [`run()`] executes it and reports both the elapsed wall-clock time and the
//! final counter value. The counter is deliberately incremented with a separate load and store,
//! so only the primitive under test stands between the workers and a lost update. If the final
//! value is not exactly `T × I`, the primitive failed and [`ContentionOutcome::is_consistent()`]
//! says so.
//!
//! Workers are started together through a start barrier and the clock only runs from the
//! moment all of them are released until the last one has been joined, so thread spawning is
//! not part of the measurement.

use std::num::NonZero;
use std::panic;
use std::sync::Barrier;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::primitives::{Monitor, Primitive, Semaphore, SpinLock, SpinPolicy};
use crate::{BenchmarkResult, Error, Result, Stopwatch, micros};

/// One configuration of the contention harness: which primitive, how many threads and how
/// many increments per thread.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Scenario {
    primitive: Primitive,
    threads: NonZero<usize>,
    iterations: NonZero<u64>,
}

impl Scenario {
    /// The most worker threads a scenario may start. Every worker is a real OS thread.
    pub const MAX_THREADS: usize = 1024;

    /// Creates a scenario, rejecting zero thread or iteration counts and thread counts above
    /// [`MAX_THREADS`](Self::MAX_THREADS).
    ///
    /// # Examples
    ///
    /// ```
    /// use sync_bench::Scenario;
    /// use sync_bench::primitives::Primitive;
    ///
    /// let scenario = Scenario::new(Primitive::Mutex, 4, 1000).unwrap();
    /// assert_eq!(scenario.label(), "Mutex_4t_1000i");
    /// assert_eq!(scenario.expected_counter(), 4000);
    ///
    /// assert!(Scenario::new(Primitive::Mutex, 0, 1000).is_err());
    /// ```
    pub fn new(primitive: Primitive, threads: usize, iterations: u64) -> Result<Self> {
        let threads =
            NonZero::new(threads).ok_or_else(|| Error::invalid("threads", "must be at least 1"))?;
        let iterations = NonZero::new(iterations)
            .ok_or_else(|| Error::invalid("iterations", "must be at least 1"))?;

        if threads.get() > Self::MAX_THREADS {
            return Err(Error::invalid(
                "threads",
                format!("must be at most {}, got {threads}", Self::MAX_THREADS),
            ));
        }

        if u64::try_from(threads.get())
            .ok()
            .and_then(|t| t.checked_mul(iterations.get()))
            .is_none()
        {
            return Err(Error::invalid(
                "iterations",
                format!("{threads} threads x {iterations} iterations overflows the counter"),
            ));
        }

        Ok(Self {
            primitive,
            threads,
            iterations,
        })
    }

    /// The primitive protecting the counter.
    #[must_use]
    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    /// Number of concurrent worker threads.
    #[must_use]
    pub fn threads(&self) -> NonZero<usize> {
        self.threads
    }

    /// Number of increments each worker performs.
    #[must_use]
    pub fn iterations(&self) -> NonZero<u64> {
        self.iterations
    }

    /// The counter value a correct run ends with: threads × iterations.
    #[must_use]
    pub fn expected_counter(&self) -> u64 {
        // Overflow was ruled out in the constructor.
        (self.threads.get() as u64).wrapping_mul(self.iterations.get())
    }

    /// The result label, e.g. `Mutex_4t_1000i`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}_{}t_{}i", self.primitive, self.threads, self.iterations)
    }
}

/// What a single contention run observed.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentionOutcome {
    scenario: Scenario,
    elapsed: Duration,
    final_counter: u64,
}

impl ContentionOutcome {
    /// The scenario that was executed.
    #[must_use]
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Wall-clock time from releasing the workers until all of them finished.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The value of the shared counter after all workers finished.
    #[must_use]
    pub fn final_counter(&self) -> u64 {
        self.final_counter
    }

    /// The counter value a correct run ends with.
    #[must_use]
    pub fn expected_counter(&self) -> u64 {
        self.scenario.expected_counter()
    }

    /// How far the final counter is from the expected value. Zero for a correct run.
    #[must_use]
    pub fn lost_updates(&self) -> u64 {
        self.expected_counter().abs_diff(self.final_counter)
    }

    /// Whether every increment was observed, i.e. the primitive provided mutual exclusion.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.final_counter == self.expected_counter()
    }

    /// The timing of this run as an exportable result labelled with the scenario.
    #[must_use]
    pub fn to_result(&self) -> BenchmarkResult {
        BenchmarkResult::from_duration(self.scenario.label(), self.elapsed)
    }
}

/// A shared counter whose increment is a plain read followed by a write.
///
/// Two unsynchronized increments can interleave and lose one of the updates. Callers are
/// expected to serialize increments through some external primitive, which also provides the
/// memory ordering, so relaxed atomics suffice for the individual accesses.
#[derive(Debug, Default)]
struct RacyCounter {
    value: AtomicU64,
}

impl RacyCounter {
    fn increment(&self) {
        let current = self.value.load(Ordering::Relaxed);
        self.value.store(current.wrapping_add(1), Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Executes one contention scenario and reports what it observed.
///
/// A lost update is not an error: it shows up in the returned outcome.
pub fn run(scenario: &Scenario) -> ContentionOutcome {
    let counter = RacyCounter::default();
    let threads = scenario.threads.get();
    let iterations = scenario.iterations.get();

    debug!(label = %scenario.label(), "starting contention run");

    let elapsed = match scenario.primitive {
        Primitive::Mutex => {
            let lock = Mutex::new(());

            execute_workers(threads, || {
                for _ in 0..iterations {
                    let _guard = lock.lock();
                    counter.increment();
                }
            })
        }
        Primitive::Semaphore => {
            let semaphore = Semaphore::new(1);

            execute_workers(threads, || {
                for _ in 0..iterations {
                    let _permit = semaphore.acquire();
                    counter.increment();
                }
            })
        }
        Primitive::Barrier => {
            let lock = Mutex::new(());
            let rendezvous = Barrier::new(threads);

            execute_workers(threads, || {
                for _ in 0..iterations {
                    {
                        let _guard = lock.lock();
                        counter.increment();
                    }

                    // Every worker runs the same number of iterations, so every generation of
                    // the barrier is eventually filled.
                    rendezvous.wait();
                }
            })
        }
        Primitive::SpinLock | Primitive::SpinWait => {
            let policy = if scenario.primitive == Primitive::SpinLock {
                SpinPolicy::Spin
            } else {
                SpinPolicy::Yield
            };
            let lock = SpinLock::new((), policy);

            execute_workers(threads, || {
                for _ in 0..iterations {
                    let _guard = lock.lock();
                    counter.increment();
                }
            })
        }
        Primitive::Monitor => {
            let monitor = Monitor::new();

            execute_workers(threads, || {
                for _ in 0..iterations {
                    let _guard = monitor.enter();
                    counter.increment();
                }
            })
        }
    };

    let outcome = ContentionOutcome {
        scenario: *scenario,
        elapsed,
        final_counter: counter.get(),
    };

    debug!(
        label = %scenario.label(),
        elapsed_us = micros(elapsed),
        final_counter = outcome.final_counter,
        "finished contention run"
    );

    outcome
}

/// Runs `worker` on `threads` scoped threads released together, returning the time from
/// release until the last worker was joined.
fn execute_workers<F>(threads: usize, worker: F) -> Duration
where
    F: Fn() + Sync,
{
    let parties = threads
        .checked_add(1)
        .expect("thread count is capped at Scenario::MAX_THREADS");

    // All workers and the coordinator wait on this before starting, so they start together.
    let start = Barrier::new(parties);

    thread::scope(|s| {
        let handles = (0..threads)
            .map(|_| {
                s.spawn(|| {
                    start.wait();
                    worker();
                })
            })
            .collect::<Vec<_>>();

        start.wait();
        let stopwatch = Stopwatch::start();

        for handle in handles {
            if let Err(payload) = handle.join() {
                panic::resume_unwind(payload);
            }
        }

        stopwatch.elapsed()
    })
}

fn log_outcome(outcome: &ContentionOutcome) {
    if outcome.is_consistent() {
        info!(
            label = %outcome.scenario.label(),
            elapsed_us = micros(outcome.elapsed),
            "contention run completed"
        );
    } else {
        warn!(
            label = %outcome.scenario.label(),
            expected = outcome.expected_counter(),
            actual = outcome.final_counter,
            "lost updates detected, primitive failed to provide mutual exclusion"
        );
    }
}

/// Runs the same thread and iteration counts under each of the given primitives.
///
/// All scenarios are validated before the first one starts.
pub fn compare_primitives(
    threads: usize,
    iterations: u64,
    primitives: &[Primitive],
) -> Result<Vec<ContentionOutcome>> {
    if primitives.is_empty() {
        return Err(Error::invalid("primitives", "must name at least one primitive"));
    }

    let scenarios = primitives
        .iter()
        .map(|&primitive| Scenario::new(primitive, threads, iterations))
        .collect::<Result<Vec<_>>>()?;

    Ok(run_all(&scenarios))
}

/// Runs every combination of the given primitives, thread counts and iteration counts.
///
/// The grid is traversed thread count first, then iteration count, then primitive.
pub fn extended_sweep(
    primitives: &[Primitive],
    thread_counts: &[usize],
    iteration_counts: &[u64],
) -> Result<Vec<ContentionOutcome>> {
    if primitives.is_empty() || thread_counts.is_empty() || iteration_counts.is_empty() {
        return Err(Error::invalid(
            "extended",
            "primitives, thread counts and iteration counts must all be non-empty",
        ));
    }

    let mut scenarios = Vec::new();

    for &threads in thread_counts {
        for &iterations in iteration_counts {
            for &primitive in primitives {
                scenarios.push(Scenario::new(primitive, threads, iterations)?);
            }
        }
    }

    Ok(run_all(&scenarios))
}

fn run_all(scenarios: &[Scenario]) -> Vec<ContentionOutcome> {
    scenarios
        .iter()
        .map(|scenario| {
            let outcome = run(scenario);
            log_outcome(&outcome);
            outcome
        })
        .collect()
}

/// How one primitive scales as threads are added with a fixed per-thread workload.
#[derive(Clone, Debug)]
pub struct ScalabilityReport {
    points: Vec<ScalabilityPoint>,
}

/// One thread count in a [`ScalabilityReport`].
#[derive(Clone, Debug)]
pub struct ScalabilityPoint {
    outcome: ContentionOutcome,
    speedup: Option<f64>,
}

impl ScalabilityPoint {
    /// The contention run at this thread count.
    #[must_use]
    pub fn outcome(&self) -> &ContentionOutcome {
        &self.outcome
    }

    /// The first point's elapsed time divided by this point's elapsed time.
    ///
    /// `None` if this point completed in zero measurable time.
    #[must_use]
    pub fn speedup(&self) -> Option<f64> {
        self.speedup
    }
}

impl ScalabilityReport {
    /// The measured points, in the order the thread counts were given.
    #[must_use]
    pub fn points(&self) -> &[ScalabilityPoint] {
        &self.points
    }

    /// The outcomes as exportable results.
    pub fn to_results(&self) -> impl Iterator<Item = BenchmarkResult> + '_ {
        self.points.iter().map(|p| p.outcome.to_result())
    }
}

/// Runs one primitive at each of the given thread counts with the same per-thread iteration
/// count, computing speedup relative to the first thread count.
pub fn scalability(
    primitive: Primitive,
    thread_counts: &[usize],
    iterations: u64,
) -> Result<ScalabilityReport> {
    if thread_counts.is_empty() {
        return Err(Error::invalid("thread_counts", "must not be empty"));
    }

    let scenarios = thread_counts
        .iter()
        .map(|&threads| Scenario::new(primitive, threads, iterations))
        .collect::<Result<Vec<_>>>()?;

    let outcomes = run_all(&scenarios);

    let baseline = outcomes
        .first()
        .map(|o| o.elapsed.as_secs_f64())
        .expect("guarded by non-empty thread count list above");

    let points = outcomes
        .into_iter()
        .map(|outcome| {
            let elapsed = outcome.elapsed.as_secs_f64();
            let speedup = (elapsed > 0.0).then(|| baseline / elapsed);
            ScalabilityPoint { outcome, speedup }
        })
        .collect();

    Ok(ScalabilityReport { points })
}
