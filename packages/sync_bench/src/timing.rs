//! Wall-clock measurement shared by every benchmark family.

use std::time::{Duration, Instant};

/// Measures elapsed wall-clock time from the moment it was started.
///
/// # Examples
///
/// ```
/// use sync_bench::Stopwatch;
///
/// let stopwatch = Stopwatch::start();
/// std::hint::black_box((0..1000).sum::<u64>());
/// assert!(stopwatch.elapsed_micros() >= 0.0);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Stopwatch {
    started_at: Instant,
}

impl Stopwatch {
    /// Starts a new stopwatch at the current instant.
    #[must_use]
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    /// Time elapsed since the stopwatch was started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time elapsed since the stopwatch was started, in fractional microseconds.
    #[must_use]
    pub fn elapsed_micros(&self) -> f64 {
        micros(self.elapsed())
    }
}

/// Executes `f` and returns its result together with how long it took.
pub fn measure<F, R>(f: F) -> (R, Duration)
where
    F: FnOnce() -> R,
{
    let stopwatch = Stopwatch::start();
    let result = f();
    (result, stopwatch.elapsed())
}

/// Converts a duration to fractional microseconds, the unit used for all exported results.
#[must_use]
pub fn micros(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000_000.0
}
