//! Mutual exclusion primitives compared by the contention harness.
//!
//! The standard library and `parking_lot` already cover plain mutexes and barriers. This
//! module adds the primitives they do not: a counting semaphore, a spin lock with a
//! configurable waiting policy and a condition-variable monitor.

mod monitor;
mod semaphore;
mod spin_lock;

use std::str::FromStr;

use derive_more::derive::Display;
use serde::Deserialize;

pub use monitor::*;
pub use semaphore::*;
pub use spin_lock::*;

/// The mutual exclusion strategy that protects the shared counter in a contention scenario.
///
/// Displays as the variant name, which is also the prefix of result labels.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum Primitive {
    /// A blocking mutex around every increment.
    Mutex,

    /// A counting semaphore with a single permit around every increment.
    Semaphore,

    /// A mutex around every increment, followed by a rendezvous of all workers.
    Barrier,

    /// A compare-and-swap spin lock that busy-waits.
    SpinLock,

    /// A compare-and-swap spin lock that yields its time slice while waiting.
    SpinWait,

    /// An enter/exit monitor built on a condition variable.
    Monitor,
}

impl Primitive {
    /// Every primitive, in the order they are reported.
    pub const ALL: [Self; 6] = [
        Self::Mutex,
        Self::Semaphore,
        Self::Barrier,
        Self::SpinLock,
        Self::SpinWait,
        Self::Monitor,
    ];
}

impl FromStr for Primitive {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "mutex" | "lock" => Ok(Self::Mutex),
            "semaphore" => Ok(Self::Semaphore),
            "barrier" => Ok(Self::Barrier),
            "spin-lock" | "spinlock" => Ok(Self::SpinLock),
            "spin-wait" | "spinwait" => Ok(Self::SpinWait),
            "monitor" => Ok(Self::Monitor),
            _ => Err(format!(
                "Invalid primitive: '{s}'. Valid options are: mutex, semaphore, barrier, spin-lock, spin-wait, monitor"
            )),
        }
    }
}
