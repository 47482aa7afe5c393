use std::fmt;
use std::thread;
use std::time::Duration;

use crate::{collector, Error, RetentionCounter};

/// The outcome of a retention observation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// Every payload that was created has been released.
    FullyReclaimed,
    /// Some payloads are still retained.
    PartiallyReclaimed {
        /// The number of payloads still retained.
        outstanding: u64,
    },
    /// Payloads were still retained after the retry budget ran out.
    LeakSuspected {
        /// The number of payloads still retained.
        outstanding: u64,
    },
}

impl Verdict {
    /// The number of payloads still retained.
    #[must_use]
    pub const fn outstanding(&self) -> u64 {
        match self {
            Self::FullyReclaimed => 0,
            Self::PartiallyReclaimed { outstanding } | Self::LeakSuspected { outstanding } => {
                *outstanding
            }
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullyReclaimed => f.write_str("fully reclaimed"),
            Self::PartiallyReclaimed { outstanding } => {
                write!(f, "partially reclaimed, {outstanding} still retained")
            }
            Self::LeakSuspected { outstanding } => {
                write!(f, "leak suspected, {outstanding} still retained")
            }
        }
    }
}

/// One reading of a [`RetentionCounter`] taken after a collection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Observation {
    /// Payloads released so far.
    pub released: u64,
    /// Payloads created but not yet released.
    pub outstanding: u64,
    /// How the reading compares to the expected total.
    pub verdict: Verdict,
}

/// Requests collections and reads a [`RetentionCounter`] afterwards.
///
/// Collections and grace periods are heuristics: a reading only shows what
/// has been released so far, never that something will not be released later.
#[derive(Clone, Debug)]
pub struct RetentionObserver {
    counter: RetentionCounter,
    grace: Duration,
}

impl RetentionObserver {
    /// Returns an observer reading `counter`, waiting `grace` after each
    /// requested collection.
    #[must_use]
    pub fn new(counter: RetentionCounter, grace: Duration) -> Self {
        Self { counter, grace }
    }

    /// The counter being observed.
    #[must_use]
    pub fn counter(&self) -> &RetentionCounter {
        &self.counter
    }

    /// Requests a collection, waits for the grace period and compares the
    /// number of released payloads with `expected_total`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollectorStopped`] if no collection can run.
    pub fn observe(&self, expected_total: u64) -> Result<Observation, Error> {
        collector::collect()?;
        thread::sleep(self.grace);
        Ok(self.read(expected_total))
    }

    /// Reads the counter without collecting.
    #[must_use]
    pub fn read(&self, expected_total: u64) -> Observation {
        let released = self.counter.released();
        let outstanding = expected_total.saturating_sub(released);
        let verdict = if outstanding == 0 {
            Verdict::FullyReclaimed
        } else {
            Verdict::PartiallyReclaimed { outstanding }
        };
        Observation {
            released,
            outstanding,
            verdict,
        }
    }

    /// Observes repeatedly until two consecutive observations release
    /// nothing new, or until `max_rounds` observations have been made.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollectorStopped`] if no collection can run.
    pub fn settle(&self, expected_total: u64, max_rounds: u32) -> Result<Observation, Error> {
        let mut previous = self.counter.released();
        let mut observation = self.observe(expected_total)?;
        for _ in 1..max_rounds {
            if observation.released == previous {
                break;
            }
            previous = observation.released;
            observation = self.observe(expected_total)?;
        }
        Ok(observation)
    }
}
