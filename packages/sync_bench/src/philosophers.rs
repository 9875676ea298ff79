//! The dining-philosophers simulator.
//!
//! `N` philosophers sit around a table with `N` forks, one between each pair of neighbors.
//! To eat, a philosopher needs both adjacent forks. Each philosopher eats a fixed number of
//! cycles and then leaves, and the simulator measures how long the whole dinner takes under a
//! given fork acquisition [`Strategy`].
//!
//! Every blocking wait inside the simulation is bounded and re-checks a [`CancelToken`] between
//! attempts. A dinner that does not finish before its timeout (or that is cancelled from the
//! outside) is stopped cooperatively and reported as [`DinnerOutcome::TimedOut`] instead of
//! blocking the caller forever.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use sync_bench::philosophers::{Dinner, DinnerConfig, Strategy};
//!
//! let config = DinnerConfig::new(5, Strategy::OrderedLock)
//!     .with_cycles(10)
//!     .with_timeout(Duration::from_secs(5));
//!
//! let outcome = Dinner::new(config).unwrap().run();
//!
//! let report = outcome.report().expect("ordered locking cannot deadlock");
//! assert!(report.meals().iter().all(|&meals| meals == 10));
//! ```

mod cancel;
mod state;
mod table;

use std::panic;
use std::str::FromStr;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use derive_more::derive::Display;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info, warn};

pub use cancel::*;
pub(crate) use state::SharedState;
pub use state::PhilosopherState;
use table::Table;

use crate::{BenchmarkResult, Error, Result, Stopwatch, micros};

/// How philosophers acquire their two forks.
///
/// Displays as the variant name, which is also the suffix of result labels.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum Strategy {
    /// Every philosopher takes the lower-numbered fork first. The global order over forks
    /// makes a circular wait impossible.
    OrderedLock,

    /// A semaphore with `N - 1` permits limits how many philosophers may try to eat at once,
    /// so at least one of them can always get both forks.
    SemaphoreGated,

    /// Even-numbered philosophers take their left fork first, odd-numbered their right.
    Alternating,

    /// Philosophers only take a fork without waiting and put everything back, with a random
    /// back-off, if the second fork is busy.
    TryLock,

    /// A central arbitrator hands out both forks of a seat at once when both are free.
    Arbitrator,
}

impl Strategy {
    /// Every strategy, in the order they are reported.
    pub const ALL: [Self; 5] = [
        Self::OrderedLock,
        Self::SemaphoreGated,
        Self::Alternating,
        Self::TryLock,
        Self::Arbitrator,
    ];
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "ordered-lock" | "orderedlock" | "resource-hierarchy" => Ok(Self::OrderedLock),
            "semaphore-gated" | "semaphoregated" | "semaphore" => Ok(Self::SemaphoreGated),
            "alternating" => Ok(Self::Alternating),
            "try-lock" | "trylock" => Ok(Self::TryLock),
            "arbitrator" => Ok(Self::Arbitrator),
            _ => Err(format!(
                "Invalid strategy: '{s}'. Valid options are: ordered-lock, semaphore-gated, alternating, try-lock, arbitrator"
            )),
        }
    }
}

/// An inclusive range of durations from which a pause is drawn uniformly at random.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PauseRange {
    min: Duration,
    max: Duration,
}

impl PauseRange {
    /// No pause at all.
    pub const ZERO: Self = Self::fixed(Duration::ZERO);

    /// Creates a range, rejecting one whose minimum exceeds its maximum.
    pub fn new(min: Duration, max: Duration) -> Result<Self> {
        if min > max {
            return Err(Error::invalid(
                "pause",
                format!("minimum {min:?} exceeds maximum {max:?}"),
            ));
        }

        Ok(Self { min, max })
    }

    /// Creates a range from inclusive bounds in microseconds.
    pub fn from_micros(min: u64, max: u64) -> Result<Self> {
        Self::new(Duration::from_micros(min), Duration::from_micros(max))
    }

    /// A range that always yields `duration`.
    #[must_use]
    pub const fn fixed(duration: Duration) -> Self {
        Self {
            min: duration,
            max: duration,
        }
    }

    /// The shortest possible pause.
    #[must_use]
    pub fn min(&self) -> Duration {
        self.min
    }

    /// The longest possible pause.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    fn sample(&self, rng: &mut impl Rng) -> Duration {
        if self.min == self.max {
            self.min
        } else {
            rng.random_range(self.min..=self.max)
        }
    }
}

/// Parameters of one dinner.
///
/// Construct with [`DinnerConfig::new()`] and adjust with the `with_*` methods. The
/// configuration is checked when it is handed to [`Dinner::new()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DinnerConfig {
    philosophers: usize,
    strategy: Strategy,
    cycles: u32,
    eat: PauseRange,
    think: PauseRange,
    timeout: Duration,
}

impl DinnerConfig {
    /// Meals per philosopher unless configured otherwise.
    pub const DEFAULT_CYCLES: u32 = 100;

    /// How long a dinner may take unless configured otherwise.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// The largest table a dinner may set. Every philosopher is a real OS thread.
    pub const MAX_PHILOSOPHERS: usize = 1024;

    /// Default eating and thinking time, drawn per cycle.
    pub const DEFAULT_PAUSE: PauseRange = PauseRange {
        min: Duration::from_micros(10),
        max: Duration::from_micros(50),
    };

    /// Creates a configuration with default cycles, pauses and timeout.
    #[must_use]
    pub fn new(philosophers: usize, strategy: Strategy) -> Self {
        Self {
            philosophers,
            strategy,
            cycles: Self::DEFAULT_CYCLES,
            eat: Self::DEFAULT_PAUSE,
            think: Self::DEFAULT_PAUSE,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the number of philosophers (and forks).
    #[must_use]
    pub fn with_philosophers(mut self, philosophers: usize) -> Self {
        self.philosophers = philosophers;
        self
    }

    /// Sets the fork acquisition strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets how many meals each philosopher eats before leaving.
    #[must_use]
    pub fn with_cycles(mut self, cycles: u32) -> Self {
        self.cycles = cycles;
        self
    }

    /// Sets how long each meal lasts.
    #[must_use]
    pub fn with_eat(mut self, eat: PauseRange) -> Self {
        self.eat = eat;
        self
    }

    /// Sets how long philosophers think between meals.
    #[must_use]
    pub fn with_think(mut self, think: PauseRange) -> Self {
        self.think = think;
        self
    }

    /// Sets how long the dinner may take before it is stopped and reported as timed out.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of philosophers (and forks).
    #[must_use]
    pub fn philosophers(&self) -> usize {
        self.philosophers
    }

    /// The fork acquisition strategy.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Meals per philosopher.
    #[must_use]
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Duration of each meal.
    #[must_use]
    pub fn eat(&self) -> PauseRange {
        self.eat
    }

    /// Duration of thinking between meals.
    #[must_use]
    pub fn think(&self) -> PauseRange {
        self.think
    }

    /// Deadline for the whole dinner, measured from its start.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The result label for a dinner with this configuration, e.g. `5_philosophers_OrderedLock`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}_philosophers_{}", self.philosophers, self.strategy)
    }

    /// Checks that the configuration describes a dinner that can be run.
    pub fn validate(&self) -> Result<()> {
        if self.philosophers < 2 {
            return Err(Error::invalid(
                "philosophers",
                format!("must be at least 2, got {}", self.philosophers),
            ));
        }

        if self.philosophers > Self::MAX_PHILOSOPHERS {
            return Err(Error::invalid(
                "philosophers",
                format!(
                    "must be at most {}, got {}",
                    Self::MAX_PHILOSOPHERS,
                    self.philosophers
                ),
            ));
        }

        if self.cycles == 0 {
            return Err(Error::invalid("cycles", "must be at least 1"));
        }

        if self.timeout.is_zero() {
            return Err(Error::invalid("timeout", "must be greater than zero"));
        }

        Ok(())
    }
}

/// A validated dinner, ready to be run any number of times.
///
/// Every run sets a fresh table, so runs never share state.
#[derive(Clone, Copy, Debug)]
pub struct Dinner {
    config: DinnerConfig,
}

impl Dinner {
    /// Validates the configuration before any philosopher sits down.
    pub fn new(config: DinnerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration this dinner runs with.
    #[must_use]
    pub fn config(&self) -> &DinnerConfig {
        &self.config
    }

    /// Runs the dinner until every philosopher is done or the configured timeout passes.
    #[must_use]
    pub fn run(&self) -> DinnerOutcome {
        self.run_until_cancelled(&CancelToken::new())
    }

    /// Runs the dinner until every philosopher is done, the configured timeout passes or
    /// `cancel` is cancelled, whichever happens first.
    #[must_use]
    pub fn run_until_cancelled(&self, cancel: &CancelToken) -> DinnerOutcome {
        let config = &self.config;
        let count = config.philosophers;
        let table = Table::new(config);

        // Philosophers only ever watch this token. The coordinator trips it on timeout or
        // external cancellation, which keeps the caller's token untouched.
        let stop = CancelToken::new();

        let parties = count
            .checked_add(1)
            .expect("philosopher count is capped at DinnerConfig::MAX_PHILOSOPHERS");
        let start = Barrier::new(parties);

        debug!(label = %config.label(), cycles = config.cycles, "dinner starting");

        let (finished, elapsed) = thread::scope(|s| {
            let handles = (0..count)
                .map(|id| {
                    let table = &table;
                    let start = &start;
                    let stop = &stop;

                    s.spawn(move || {
                        start.wait();
                        table.dine(id, config, stop);
                    })
                })
                .collect::<Vec<_>>();

            start.wait();
            let stopwatch = Stopwatch::start();
            let deadline = Instant::now().checked_add(config.timeout);

            let finished = table.wait_until_finished(deadline, cancel);
            let elapsed = stopwatch.elapsed();

            if !finished {
                stop.cancel();
            }

            for handle in handles {
                if let Err(payload) = handle.join() {
                    panic::resume_unwind(payload);
                }
            }

            (finished, elapsed)
        });

        if finished {
            debug!(label = %config.label(), elapsed_us = micros(elapsed), "dinner finished");

            DinnerOutcome::Completed(DinnerReport {
                config: *config,
                elapsed,
                meals: table.meals(),
                fork_uses: table.fork_uses(),
                peak_active: table.peak_active(),
            })
        } else {
            let cause = if cancel.is_cancelled() {
                StallCause::Cancelled
            } else {
                StallCause::DeadlineExceeded
            };

            let stalled = StalledDinner {
                config: *config,
                waited: elapsed,
                cause,
                states: table.states(),
                meals: table.meals(),
            };

            warn!(
                label = %config.label(),
                waited_us = micros(elapsed),
                ?cause,
                unfinished = stalled.unfinished(),
                "dinner did not complete"
            );

            DinnerOutcome::TimedOut(stalled)
        }
    }
}

/// What became of a dinner.
#[derive(Clone, Debug)]
#[must_use]
pub enum DinnerOutcome {
    /// Every philosopher ate every cycle.
    Completed(DinnerReport),

    /// The dinner was stopped before every philosopher finished. There is no valid timing.
    TimedOut(StalledDinner),
}

impl DinnerOutcome {
    /// Whether every philosopher finished.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The report of a completed dinner.
    #[must_use]
    pub fn report(&self) -> Option<&DinnerReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::TimedOut(_) => None,
        }
    }

    /// Details of a dinner that did not complete.
    #[must_use]
    pub fn stalled(&self) -> Option<&StalledDinner> {
        match self {
            Self::Completed(_) => None,
            Self::TimedOut(stalled) => Some(stalled),
        }
    }

    /// The timing of a completed dinner as an exportable result. A dinner that did not
    /// complete has no timing and yields `None`.
    #[must_use]
    pub fn to_result(&self) -> Option<BenchmarkResult> {
        self.report().map(DinnerReport::to_result)
    }
}

/// Measurements of a completed dinner.
#[derive(Clone, Debug)]
pub struct DinnerReport {
    config: DinnerConfig,
    elapsed: Duration,
    meals: Vec<u32>,
    fork_uses: Vec<u64>,
    peak_active: usize,
}

impl DinnerReport {
    /// The configuration the dinner ran with.
    #[must_use]
    pub fn config(&self) -> &DinnerConfig {
        &self.config
    }

    /// Wall-clock time from seating the philosophers until the last one finished.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Meals eaten by each philosopher, indexed by philosopher id.
    #[must_use]
    pub fn meals(&self) -> &[u32] {
        &self.meals
    }

    /// How many meals each fork was used for, indexed by fork id.
    #[must_use]
    pub fn fork_uses(&self) -> &[u64] {
        &self.fork_uses
    }

    /// The largest number of philosophers that were hungry or eating at the same time.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.peak_active
    }

    /// The timing as an exportable result labelled with the configuration.
    #[must_use]
    pub fn to_result(&self) -> BenchmarkResult {
        BenchmarkResult::from_duration(self.config.label(), self.elapsed)
    }
}

/// Why a dinner was stopped before completing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum StallCause {
    /// The configured timeout passed.
    DeadlineExceeded,

    /// The caller's [`CancelToken`] was cancelled.
    Cancelled,
}

/// The state of the table when a dinner was stopped.
#[derive(Clone, Debug)]
pub struct StalledDinner {
    config: DinnerConfig,
    waited: Duration,
    cause: StallCause,
    states: Vec<PhilosopherState>,
    meals: Vec<u32>,
}

impl StalledDinner {
    /// The configuration the dinner ran with.
    #[must_use]
    pub fn config(&self) -> &DinnerConfig {
        &self.config
    }

    /// How long the coordinator waited before stopping the dinner.
    #[must_use]
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Why the dinner was stopped.
    #[must_use]
    pub fn cause(&self) -> StallCause {
        self.cause
    }

    /// The state each philosopher was in when it left the table.
    #[must_use]
    pub fn states(&self) -> &[PhilosopherState] {
        &self.states
    }

    /// Meals each philosopher managed to eat.
    #[must_use]
    pub fn meals(&self) -> &[u32] {
        &self.meals
    }

    /// Number of philosophers that did not reach [`PhilosopherState::Done`].
    #[must_use]
    pub fn unfinished(&self) -> usize {
        self.states
            .iter()
            .filter(|&&state| state != PhilosopherState::Done)
            .count()
    }
}

/// One dinner of a strategy benchmark.
#[derive(Clone, Debug)]
pub struct StrategyRun {
    label: String,
    outcome: DinnerOutcome,
}

impl StrategyRun {
    /// The result label, e.g. `10_philosophers_SemaphoreGated`.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// What became of the dinner.
    pub fn outcome(&self) -> &DinnerOutcome {
        &self.outcome
    }
}

/// Runs a dinner for every combination of philosopher count and strategy.
///
/// Everything other than the count and strategy comes from `template`. All configurations are
/// validated before the first dinner starts. A dinner that times out does not stop the
/// benchmark: it is recorded as such and the next one runs.
pub fn benchmark_strategies(
    philosopher_counts: &[usize],
    strategies: &[Strategy],
    template: &DinnerConfig,
) -> Result<Vec<StrategyRun>> {
    if philosopher_counts.is_empty() || strategies.is_empty() {
        return Err(Error::invalid(
            "philosophers",
            "philosopher counts and strategies must both be non-empty",
        ));
    }

    let dinners = philosopher_counts
        .iter()
        .flat_map(|&count| {
            strategies.iter().map(move |&strategy| {
                Dinner::new(
                    template
                        .with_philosophers(count)
                        .with_strategy(strategy),
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(dinners
        .iter()
        .map(|dinner| {
            let label = dinner.config().label();
            let outcome = dinner.run();

            if let Some(report) = outcome.report() {
                info!(
                    label = %label,
                    elapsed_us = micros(report.elapsed()),
                    peak_active = report.peak_active(),
                    "dinner completed"
                );
            }

            StrategyRun { label, outcome }
        })
        .collect())
}
