#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing the synchronization benchmarks.
//!
//! Most code under test here spawns threads that wait on each other, so a bug tends to show up
//! as a hang rather than a failure. The watchdog turns such a hang into a test failure.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// How long [`with_watchdog()`] lets a test run.
///
/// Miri is dramatically slower at thread synchronization, so it gets a longer limit.
pub const DEFAULT_TIMEOUT: Duration = if cfg!(miri) {
    Duration::from_secs(120)
} else {
    Duration::from_secs(30)
};

/// Runs a test on a separate thread and fails it if it does not finish within
/// [`DEFAULT_TIMEOUT`].
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled
/// and the test function is executed directly, so that mutation testing can detect mutations
/// that make the code hang.
///
/// # Panics
///
/// Panics if the test exceeds the timeout, or resumes the test's own panic if it panicked.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    with_watchdog_timeout(DEFAULT_TIMEOUT, test_fn)
}

/// Like [`with_watchdog()`] but with a caller-chosen limit, for tests that run whole benchmark
/// suites or that intentionally wait for a deadline.
///
/// # Panics
///
/// Panics if the test exceeds `timeout`, or resumes the test's own panic if it panicked.
pub fn with_watchdog_timeout<F, R>(timeout: Duration, test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If the receiver is gone, the watchdog has already given up on us.
        drop(tx.send(result));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("test thread should not panic after sending its result");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded the {timeout:?} watchdog timeout, probably deadlocked");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread disconnected without a result"),
            Err(payload) => std::panic::resume_unwind(payload),
        },
    }
}
