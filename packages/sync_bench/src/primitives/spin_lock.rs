use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// What a [`SpinLock`] does between failed acquisition attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SpinPolicy {
    /// Busy-wait, hinting the processor that we are in a spin loop.
    Spin,

    /// Give the rest of the time slice to another thread before retrying.
    Yield,
}

/// A mutual exclusion lock that busy-waits on an atomic flag instead of blocking.
///
/// Acquisition is a compare-and-swap from unlocked to locked. Contended waiters only read the
/// flag until it looks free, which keeps the cache line shared while the holder works.
///
/// # Examples
///
/// ```
/// use sync_bench::primitives::{SpinLock, SpinPolicy};
///
/// let lock = SpinLock::new(0_u64, SpinPolicy::Spin);
/// *lock.lock() += 1;
/// assert_eq!(*lock.lock(), 1);
/// ```
#[derive(Debug)]
pub struct SpinLock<T> {
    locked: AtomicBool,
    policy: SpinPolicy,
    data: UnsafeCell<T>,
}

// SAFETY: `SpinLock` is Send if T is Send, because it owns the T.
unsafe impl<T: Send> Send for SpinLock<T> {}
// SAFETY: `SpinLock` is Sync if T is Send, because it hands out access to T to one thread
// at a time, serialized by the atomic flag.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates an unlocked spin lock around `data`.
    #[must_use]
    pub const fn new(data: T, policy: SpinPolicy) -> Self {
        Self {
            locked: AtomicBool::new(false),
            policy,
            data: UnsafeCell::new(data),
        }
    }

    /// Waits until the lock is free and takes it.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                self.pause();
            }
        }

        SpinLockGuard { lock: self }
    }

    /// Takes the lock if it is free right now.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// The waiting policy this lock was created with.
    #[must_use]
    pub fn policy(&self) -> SpinPolicy {
        self.policy
    }

    fn pause(&self) {
        match self.policy {
            SpinPolicy::Spin => hint::spin_loop(),
            SpinPolicy::Yield => thread::yield_now(),
        }
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// Exclusive access to the data inside a [`SpinLock`], released on drop.
#[derive(Debug)]
#[must_use = "the lock is released immediately if the guard is not held"]
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

// SAFETY: Sharing the guard shares `&T` between threads, which is only sound if T is Sync.
// This also stops the guard from inheriting Sync from `&SpinLock<T>`, which only needs T: Send.
unsafe impl<T: Sync> Sync for SpinLockGuard<'_, T> {}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: We hold the lock, so nobody else has access to the data.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: We hold the lock, so nobody else has access to the data.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    static_assertions::assert_impl_all!(SpinLock<u64>: Send, Sync);
    static_assertions::assert_impl_all!(SpinLock<Cell<u64>>: Send, Sync);
    static_assertions::assert_impl_all!(SpinLockGuard<'static, u64>: Sync);
    static_assertions::assert_not_impl_any!(SpinLockGuard<'static, Cell<u64>>: Sync);

    #[test]
    fn lock_simple() {
        let lock = SpinLock::new(0, SpinPolicy::Spin);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new((), SpinPolicy::Yield);

        let guard = lock.lock();
        assert!(lock.try_lock().is_none());

        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn contention_loses_no_updates() {
        for policy in [SpinPolicy::Spin, SpinPolicy::Yield] {
            let lock = SpinLock::new(0_u64, policy);

            thread::scope(|s| {
                for _ in 0..8 {
                    s.spawn(|| {
                        for _ in 0..500 {
                            *lock.lock() += 1;
                        }
                    });
                }
            });

            assert_eq!(*lock.lock(), 4000, "{policy:?}");
        }
    }
}
