use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A counting semaphore built on a mutex-protected permit count and a condition variable.
///
/// Permits are handed out as [`SemaphorePermit`] guards that return the permit on drop.
///
/// # Examples
///
/// ```
/// use sync_bench::primitives::Semaphore;
///
/// let semaphore = Semaphore::new(1);
///
/// let permit = semaphore.acquire();
/// assert!(semaphore.try_acquire().is_none());
///
/// drop(permit);
/// assert_eq!(semaphore.available_permits(), 1);
/// ```
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    released: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            released: Condvar::new(),
        }
    }

    /// Blocks until a permit is available and takes it.
    pub fn acquire(&self) -> SemaphorePermit<'_> {
        let mut permits = self.permits.lock();

        while *permits == 0 {
            self.released.wait(&mut permits);
        }

        *permits = permits.wrapping_sub(1);
        SemaphorePermit { semaphore: self }
    }

    /// Takes a permit if one is available right now.
    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        let mut permits = self.permits.lock();

        if *permits == 0 {
            return None;
        }

        *permits = permits.wrapping_sub(1);
        Some(SemaphorePermit { semaphore: self })
    }

    /// Waits up to `timeout` for a permit.
    ///
    /// Returns `None` if no permit became available in time.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<SemaphorePermit<'_>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.acquire());
        };

        let mut permits = self.permits.lock();

        while *permits == 0 {
            if self.released.wait_until(&mut permits, deadline).timed_out() && *permits == 0 {
                return None;
            }
        }

        *permits = permits.wrapping_sub(1);
        Some(SemaphorePermit { semaphore: self })
    }

    /// Number of permits not currently held.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        *self.permits.lock()
    }

    fn release(&self) {
        let mut permits = self.permits.lock();
        *permits = permits
            .checked_add(1)
            .expect("permit count cannot overflow because every release follows an acquire");
        drop(permits);

        self.released.notify_one();
    }
}

/// A permit taken from a [`Semaphore`], returned when dropped.
#[derive(Debug)]
#[must_use = "the permit is released immediately if it is not held"]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    static_assertions::assert_impl_all!(Semaphore: Send, Sync);

    #[test]
    fn permits_are_counted() {
        let semaphore = Semaphore::new(2);

        let first = semaphore.acquire();
        let second = semaphore.try_acquire().unwrap();
        assert_eq!(semaphore.available_permits(), 0);
        assert!(semaphore.try_acquire().is_none());

        drop(first);
        assert_eq!(semaphore.available_permits(), 1);

        drop(second);
        assert_eq!(semaphore.available_permits(), 2);
    }

    #[test]
    fn try_acquire_for_times_out_without_permits() {
        let semaphore = Semaphore::new(0);

        let started = Instant::now();
        assert!(semaphore.try_acquire_for(Duration::from_millis(5)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn try_acquire_for_wakes_on_release() {
        let semaphore = Semaphore::new(1);
        let permit = semaphore.acquire();

        thread::scope(|s| {
            let waiter = s.spawn(|| {
                semaphore
                    .try_acquire_for(Duration::from_secs(10))
                    .is_some()
            });

            thread::sleep(Duration::from_millis(5));
            drop(permit);

            assert!(waiter.join().unwrap());
        });
    }

    #[test]
    fn never_exceeds_permit_count() {
        const PERMITS: usize = 3;

        let semaphore = Semaphore::new(PERMITS);
        let inside = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let _permit = semaphore.acquire();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert!(peak.load(Ordering::SeqCst) <= PERMITS);
        assert_eq!(semaphore.available_permits(), PERMITS);
    }
}
