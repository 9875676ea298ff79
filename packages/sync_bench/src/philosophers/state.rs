use std::sync::atomic::{AtomicU8, Ordering};

use derive_more::derive::Display;

/// Where a philosopher is in its eating cycle.
///
/// Philosophers move `Thinking → Hungry → Eating → Thinking` once per cycle and end in `Done`
/// after their last meal.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[repr(u8)]
#[non_exhaustive]
pub enum PhilosopherState {
    /// Not holding or waiting for any fork.
    Thinking = 0,

    /// Trying to acquire both forks.
    Hungry = 1,

    /// Holding both forks.
    Eating = 2,

    /// Finished every cycle and left the table.
    Done = 3,
}

impl PhilosopherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Thinking,
            1 => Self::Hungry,
            2 => Self::Eating,
            3 => Self::Done,
            _ => unreachable!("only valid states are ever stored"),
        }
    }
}

/// A philosopher state that can be published by the philosopher and read by the coordinator.
#[derive(Debug)]
pub(crate) struct SharedState {
    value: AtomicU8,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            value: AtomicU8::new(PhilosopherState::Thinking as u8),
        }
    }

    pub(crate) fn set(&self, state: PhilosopherState) {
        self.value.store(state as u8, Ordering::Release);
    }

    pub(crate) fn get(&self) -> PhilosopherState {
        PhilosopherState::from_u8(self.value.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_thinking() {
        assert_eq!(SharedState::new().get(), PhilosopherState::Thinking);
    }

    #[test]
    fn displays_variant_name() {
        assert_eq!(PhilosopherState::Hungry.to_string(), "Hungry");
        assert_eq!(PhilosopherState::Done.to_string(), "Done");
    }

    #[test]
    fn stores_every_state() {
        let shared = SharedState::new();

        for state in [
            PhilosopherState::Hungry,
            PhilosopherState::Eating,
            PhilosopherState::Thinking,
            PhilosopherState::Done,
        ] {
            shared.set(state);
            assert_eq!(shared.get(), state);
        }
    }
}
