use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use rand::Rng;
use tracing::trace;

use crate::philosophers::{CancelToken, DinnerConfig, PhilosopherState, SharedState, Strategy};
use crate::primitives::{Semaphore, SemaphorePermit};

/// Upper bound on any single blocking wait, after which the waiter re-checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Back-off range for the try-lock strategy after failing to get both forks.
const RETRY_BACKOFF_MIN: Duration = Duration::from_micros(10);
const RETRY_BACKOFF_MAX: Duration = Duration::from_micros(50);

/// The shared state of one dinner: forks plus whatever the strategy coordinates through.
///
/// A table lives for exactly one run.
#[derive(Debug)]
pub(crate) struct Table {
    /// Fork `i` sits between philosopher `i` and philosopher `i - 1`. The value counts how many
    /// meals the fork was used for and is only ever touched by the philosopher holding it.
    forks: Box<[Mutex<u64>]>,

    /// Semaphore-gated strategy only: N - 1 permits to become hungry.
    gate: Option<Semaphore>,

    /// Arbitrator strategy only.
    arbitrator: Option<Arbitrator>,

    states: Box<[SharedState]>,
    meals: Box<[AtomicU32]>,

    /// Philosophers currently hungry or eating, and the most ever observed at once.
    active: AtomicUsize,
    peak_active: AtomicUsize,

    finished: Mutex<usize>,
    all_finished: Condvar,
}

/// Fork indexes of one philosopher.
#[derive(Clone, Copy, Debug)]
struct Seat {
    id: usize,
    left: usize,
    right: usize,
}

impl Table {
    pub(crate) fn new(config: &DinnerConfig) -> Self {
        let count = config.philosophers();

        let gate = (config.strategy() == Strategy::SemaphoreGated)
            .then(|| Semaphore::new(count.saturating_sub(1)));

        let arbitrator =
            (config.strategy() == Strategy::Arbitrator).then(|| Arbitrator::new(count));

        Self {
            forks: (0..count).map(|_| Mutex::new(0)).collect(),
            gate,
            arbitrator,
            states: (0..count).map(|_| SharedState::new()).collect(),
            meals: (0..count).map(|_| AtomicU32::new(0)).collect(),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
            finished: Mutex::new(0),
            all_finished: Condvar::new(),
        }
    }

    fn seat(&self, id: usize) -> Seat {
        let count = self.forks.len();

        Seat {
            id,
            left: id,
            right: id.wrapping_add(1) % count,
        }
    }

    fn fork(&self, index: usize) -> &Mutex<u64> {
        self.forks
            .get(index)
            .expect("fork indexes are always derived modulo the philosopher count")
    }

    fn state(&self, id: usize) -> &SharedState {
        self.states
            .get(id)
            .expect("philosopher ids are always below the philosopher count")
    }

    /// The life of philosopher `id`: think, get hungry, eat, repeat for every cycle.
    ///
    /// Returns early, without reaching `Done`, if `stop` is cancelled.
    pub(crate) fn dine(&self, id: usize, config: &DinnerConfig, stop: &CancelToken) {
        let seat = self.seat(id);
        let state = self.state(id);
        let mut rng = rand::rng();

        for cycle in 0..config.cycles() {
            state.set(PhilosopherState::Thinking);

            if !pause(config.think().sample(&mut rng), stop) {
                trace!(id, cycle, "left the table while thinking after cancellation");
                return;
            }

            let Some(mut meal) = self.take_seat(seat, config.strategy(), stop, &mut rng) else {
                trace!(id, cycle, "left the table hungry after cancellation");
                return;
            };

            state.set(PhilosopherState::Eating);
            meal.record();
            self.meals
                .get(id)
                .expect("philosopher ids are always below the philosopher count")
                .fetch_add(1, Ordering::Relaxed);

            trace!(id, cycle, "eating");
            let finished_meal = pause(config.eat().sample(&mut rng), stop);

            // Put the forks down before thinking again.
            drop(meal);

            if !finished_meal {
                trace!(id, cycle, "left the table mid-meal after cancellation");
                return;
            }
        }

        state.set(PhilosopherState::Done);

        let mut finished = self.finished.lock();
        *finished = finished.wrapping_add(1);
        drop(finished);

        self.all_finished.notify_all();
    }

    /// Acquires everything philosopher `seat.id` needs to eat under the given strategy.
    ///
    /// Returns `None` if `stop` was cancelled first, in which case nothing is held.
    fn take_seat<'t>(
        &'t self,
        seat: Seat,
        strategy: Strategy,
        stop: &CancelToken,
        rng: &mut impl Rng,
    ) -> Option<Meal<'t>> {
        // The gate is passed before becoming hungry, which is what bounds the number of
        // hungry-or-eating philosophers by the permit count.
        let permit = match &self.gate {
            Some(gate) => Some(wait_cooperatively(stop, || {
                gate.try_acquire_for(POLL_INTERVAL)
            })?),
            None => None,
        };

        let presence = self.become_hungry(seat.id);

        let grant = match &self.arbitrator {
            Some(arbitrator) => Some(wait_cooperatively(stop, || {
                arbitrator.try_grant_for(seat, POLL_INTERVAL)
            })?),
            None => None,
        };

        let forks = match strategy {
            Strategy::OrderedLock => {
                self.lock_in_order(seat.left.min(seat.right), seat.left.max(seat.right), stop)?
            }
            Strategy::Alternating if seat.id % 2 == 1 => {
                self.lock_in_order(seat.right, seat.left, stop)?
            }
            Strategy::SemaphoreGated | Strategy::Alternating | Strategy::Arbitrator => {
                self.lock_in_order(seat.left, seat.right, stop)?
            }
            Strategy::TryLock => self.try_lock_both(seat, stop, rng)?,
        };

        Some(Meal {
            forks,
            _grant: grant,
            _presence: presence,
            _permit: permit,
        })
    }

    fn become_hungry(&self, id: usize) -> Presence<'_> {
        self.state(id).set(PhilosopherState::Hungry);

        let now_active = self.active.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        self.peak_active.fetch_max(now_active, Ordering::AcqRel);

        Presence { table: self }
    }

    fn lock_in_order(
        &self,
        first_index: usize,
        second_index: usize,
        stop: &CancelToken,
    ) -> Option<[MutexGuard<'_, u64>; 2]> {
        let first = wait_cooperatively(stop, || {
            self.fork(first_index).try_lock_for(POLL_INTERVAL)
        })?;
        let second = wait_cooperatively(stop, || {
            self.fork(second_index).try_lock_for(POLL_INTERVAL)
        })?;

        Some([first, second])
    }

    /// Never waits while holding a fork: if the right fork is busy, the left one goes back on
    /// the table and the philosopher backs off for a random moment before trying again.
    fn try_lock_both(
        &self,
        seat: Seat,
        stop: &CancelToken,
        rng: &mut impl Rng,
    ) -> Option<[MutexGuard<'_, u64>; 2]> {
        loop {
            if stop.is_cancelled() {
                return None;
            }

            if let Some(left) = self.fork(seat.left).try_lock() {
                if let Some(right) = self.fork(seat.right).try_lock() {
                    return Some([left, right]);
                }
            }

            thread::sleep(rng.random_range(RETRY_BACKOFF_MIN..=RETRY_BACKOFF_MAX));
        }
    }

    /// Blocks until every philosopher is done, the deadline passes or `cancel` is cancelled.
    ///
    /// Returns whether every philosopher finished.
    pub(crate) fn wait_until_finished(
        &self,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> bool {
        let mut finished = self.finished.lock();

        loop {
            if *finished == self.forks.len() {
                return true;
            }

            if cancel.is_cancelled() {
                return false;
            }

            let now = Instant::now();
            let poll_until = now.checked_add(POLL_INTERVAL).unwrap_or(now);

            let wake_at = match deadline {
                Some(deadline) if deadline <= now => return false,
                Some(deadline) => deadline.min(poll_until),
                None => poll_until,
            };

            self.all_finished.wait_until(&mut finished, wake_at);
        }
    }

    pub(crate) fn states(&self) -> Vec<PhilosopherState> {
        self.states.iter().map(SharedState::get).collect()
    }

    pub(crate) fn meals(&self) -> Vec<u32> {
        self.meals
            .iter()
            .map(|meals| meals.load(Ordering::Relaxed))
            .collect()
    }

    /// Only meaningful once every philosopher has left the table.
    pub(crate) fn fork_uses(&self) -> Vec<u64> {
        self.forks.iter().map(|fork| *fork.lock()).collect()
    }

    pub(crate) fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::Acquire)
    }
}

/// Everything a philosopher holds while eating.
///
/// Fields drop in declaration order: forks first, then the arbitrator's grant, then the
/// philosopher stops counting as active, and only then is the gate permit returned.
struct Meal<'t> {
    forks: [MutexGuard<'t, u64>; 2],
    _grant: Option<Grant<'t>>,
    _presence: Presence<'t>,
    _permit: Option<SemaphorePermit<'t>>,
}

impl Meal<'_> {
    fn record(&mut self) {
        for fork in &mut self.forks {
            **fork = fork.wrapping_add(1);
        }
    }
}

/// Counts a philosopher as hungry or eating for as long as it lives.
struct Presence<'t> {
    table: &'t Table,
}

impl Drop for Presence<'_> {
    fn drop(&mut self) {
        self.table.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A waiter that hands out both forks of a seat at once, or neither.
#[derive(Debug)]
struct Arbitrator {
    available: Mutex<Vec<bool>>,
    returned: Condvar,
}

impl Arbitrator {
    fn new(forks: usize) -> Self {
        Self {
            available: Mutex::new(vec![true; forks]),
            returned: Condvar::new(),
        }
    }

    fn try_grant_for(&self, seat: Seat, timeout: Duration) -> Option<Grant<'_>> {
        let deadline = Instant::now().checked_add(timeout)?;
        let mut available = self.available.lock();

        loop {
            if both_available(&available, seat) {
                set_both(&mut available, seat, false);
                return Some(Grant {
                    arbitrator: self,
                    seat,
                });
            }

            if self.returned.wait_until(&mut available, deadline).timed_out() {
                return None;
            }
        }
    }
}

fn both_available(available: &[bool], seat: Seat) -> bool {
    available.get(seat.left).copied().unwrap_or(false)
        && available.get(seat.right).copied().unwrap_or(false)
}

fn set_both(available: &mut [bool], seat: Seat, value: bool) {
    for index in [seat.left, seat.right] {
        if let Some(slot) = available.get_mut(index) {
            *slot = value;
        }
    }
}

/// Permission from the [`Arbitrator`] to use both forks of a seat.
struct Grant<'t> {
    arbitrator: &'t Arbitrator,
    seat: Seat,
}

impl Drop for Grant<'_> {
    fn drop(&mut self) {
        set_both(&mut self.arbitrator.available.lock(), self.seat, true);
        self.arbitrator.returned.notify_all();
    }
}

/// Repeats a bounded wait until it succeeds or `stop` is cancelled.
fn wait_cooperatively<T>(stop: &CancelToken, mut attempt: impl FnMut() -> Option<T>) -> Option<T> {
    loop {
        if stop.is_cancelled() {
            return None;
        }

        if let Some(acquired) = attempt() {
            return Some(acquired);
        }
    }
}

/// Sleeps for `duration` in slices of at most [`POLL_INTERVAL`], returning early if `stop` is
/// cancelled. Returns whether the whole pause elapsed.
fn pause(duration: Duration, stop: &CancelToken) -> bool {
    if duration.is_zero() {
        return !stop.is_cancelled();
    }

    // A pause too long to represent as an instant is one that never ends on its own.
    let deadline = Instant::now().checked_add(duration);

    loop {
        if stop.is_cancelled() {
            return false;
        }

        let now = Instant::now();
        let slice = match deadline {
            Some(deadline) if deadline <= now => return true,
            Some(deadline) => deadline.duration_since(now).min(POLL_INTERVAL),
            None => POLL_INTERVAL,
        };

        thread::sleep(slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::philosophers::PauseRange;

    fn config(philosophers: usize, strategy: Strategy) -> DinnerConfig {
        DinnerConfig::new(philosophers, strategy)
            .with_cycles(3)
            .with_eat(PauseRange::ZERO)
            .with_think(PauseRange::ZERO)
    }

    #[test]
    fn seats_wrap_around() {
        let table = Table::new(&config(5, Strategy::OrderedLock));

        let last = table.seat(4);
        assert_eq!((last.left, last.right), (4, 0));

        let first = table.seat(0);
        assert_eq!((first.left, first.right), (0, 1));
    }

    #[test]
    fn gate_exists_only_for_gated_strategy() {
        let gated = Table::new(&config(4, Strategy::SemaphoreGated));
        assert_eq!(gated.gate.as_ref().unwrap().available_permits(), 3);

        let ordered = Table::new(&config(4, Strategy::OrderedLock));
        assert!(ordered.gate.is_none());
        assert!(ordered.arbitrator.is_none());
    }

    #[test]
    fn single_philosopher_loop_records_meals_and_forks() {
        let cfg = config(3, Strategy::OrderedLock);
        let table = Table::new(&cfg);
        let stop = CancelToken::new();

        table.dine(1, &cfg, &stop);

        assert_eq!(table.meals(), [0, 3, 0]);
        assert_eq!(table.fork_uses(), [0, 3, 3]);
        assert_eq!(table.states().get(1), Some(&PhilosopherState::Done));
        assert_eq!(table.peak_active(), 1);
    }

    #[test]
    fn cancelled_philosopher_does_not_finish() {
        let cfg = config(2, Strategy::OrderedLock);
        let table = Table::new(&cfg);
        let stop = CancelToken::new();
        stop.cancel();

        table.dine(0, &cfg, &stop);

        assert_eq!(table.meals(), [0, 0]);
        assert_ne!(table.states().first(), Some(&PhilosopherState::Done));
        assert!(!table.wait_until_finished(None, &stop));
    }

    #[test]
    fn held_fork_blocks_until_cancelled() {
        let cfg = config(2, Strategy::OrderedLock);
        let table = Table::new(&cfg);
        let stop = CancelToken::new();

        let _held = table.fork(0).lock();

        thread::scope(|s| {
            let waiter = s.spawn(|| table.lock_in_order(0, 1, &stop).is_none());

            thread::sleep(Duration::from_millis(5));
            stop.cancel();

            assert!(waiter.join().unwrap());
        });
    }

    #[test]
    fn arbitrator_grants_both_forks_or_neither() {
        let arbitrator = Arbitrator::new(3);
        let table = Table::new(&config(3, Strategy::Arbitrator));

        let grant = arbitrator
            .try_grant_for(table.seat(0), POLL_INTERVAL)
            .unwrap();

        // Seat 1 shares fork 1 with seat 0.
        let blocked = arbitrator.try_grant_for(table.seat(1), POLL_INTERVAL);
        assert!(blocked.is_none());

        drop(grant);
        let granted = arbitrator.try_grant_for(table.seat(1), POLL_INTERVAL);
        assert!(granted.is_some());
    }

    #[test]
    fn pause_runs_to_completion_without_cancellation() {
        let started = Instant::now();

        assert!(pause(Duration::from_millis(3), &CancelToken::new()));
        assert!(started.elapsed() >= Duration::from_millis(3));
        assert!(pause(Duration::ZERO, &CancelToken::new()));
    }

    #[test]
    fn long_pause_ends_soon_after_cancellation() {
        let stop = CancelToken::new();

        thread::scope(|s| {
            let sleeper = s.spawn(|| {
                let started = Instant::now();
                let completed = pause(Duration::from_secs(30), &stop);
                (completed, started.elapsed())
            });

            thread::sleep(Duration::from_millis(5));
            stop.cancel();

            let (completed, slept) = sleeper.join().unwrap();
            assert!(!completed);
            assert!(slept < Duration::from_secs(5), "slept {slept:?}");
        });
    }

    #[test]
    fn philosopher_leaves_mid_meal_when_cancelled() {
        let cfg = config(2, Strategy::OrderedLock)
            .with_eat(PauseRange::fixed(Duration::from_secs(30)));
        let table = Table::new(&cfg);
        let stop = CancelToken::new();

        thread::scope(|s| {
            let diner = s.spawn(|| table.dine(0, &cfg, &stop));

            thread::sleep(Duration::from_millis(5));
            stop.cancel();
            diner.join().unwrap();
        });

        assert_eq!(table.meals(), [1, 0]);
        assert_eq!(table.states().first(), Some(&PhilosopherState::Eating));
        assert!(table.fork(0).try_lock().is_some());
        assert!(table.fork(1).try_lock().is_some());
    }

    #[test]
    fn wait_until_finished_respects_deadline() {
        let table = Table::new(&config(2, Strategy::OrderedLock));

        let deadline = Instant::now().checked_add(Duration::from_millis(5));
        assert!(!table.wait_until_finished(deadline, &CancelToken::new()));
    }
}
