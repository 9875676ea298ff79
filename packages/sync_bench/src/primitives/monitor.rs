use parking_lot::{Condvar, Mutex};

/// A monitor-style critical section: callers enter when the monitor is available and block on
/// a condition variable otherwise.
///
/// Unlike a plain mutex, the "occupied" state is an explicit flag guarded by an inner lock,
/// so the inner lock is only held for the enter and exit transitions and never while the
/// caller is inside the critical section.
#[derive(Debug)]
pub struct Monitor {
    available: Mutex<bool>,
    vacated: Condvar,
}

impl Monitor {
    /// Creates an unoccupied monitor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: Mutex::new(true),
            vacated: Condvar::new(),
        }
    }

    /// Blocks until the monitor is available and occupies it.
    pub fn enter(&self) -> MonitorGuard<'_> {
        let mut available = self.available.lock();

        while !*available {
            self.vacated.wait(&mut available);
        }

        *available = false;
        MonitorGuard { monitor: self }
    }

    /// Whether nobody is inside the monitor right now.
    #[must_use]
    pub fn is_available(&self) -> bool {
        *self.available.lock()
    }

    fn exit(&self) {
        *self.available.lock() = true;
        self.vacated.notify_one();
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Occupancy of a [`Monitor`], vacated on drop.
#[derive(Debug)]
#[must_use = "the monitor is vacated immediately if the guard is not held"]
pub struct MonitorGuard<'a> {
    monitor: &'a Monitor,
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        self.monitor.exit();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn enter_and_exit_toggle_availability() {
        let monitor = Monitor::new();
        assert!(monitor.is_available());

        let guard = monitor.enter();
        assert!(!monitor.is_available());

        drop(guard);
        assert!(monitor.is_available());
    }

    #[test]
    fn only_one_thread_inside() {
        let monitor = Monitor::new();
        let occupied = AtomicBool::new(false);

        thread::scope(|s| {
            for _ in 0..6 {
                s.spawn(|| {
                    for _ in 0..300 {
                        let _guard = monitor.enter();
                        assert!(!occupied.swap(true, Ordering::SeqCst));
                        occupied.store(false, Ordering::SeqCst);
                    }
                });
            }
        });

        assert!(monitor.is_available());
    }
}
