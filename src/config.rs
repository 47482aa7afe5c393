//! Probe configuration.
//!
//! [`ProbeConfig`] carries every knob the probes use. The defaults reproduce
//! the classic setup: five workers, fifty 5 MiB payloads, and a two second
//! grace period after each collection.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::payload::DEFAULT_PAYLOAD_SIZE;
use crate::Error;

/// Default number of pool workers.
pub const DEFAULT_WORKERS: usize = 5;

/// Default number of work units submitted by the bounded probes.
pub const DEFAULT_TOTAL: usize = 50;

/// Default wait after requesting a collection.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Default delay before the interactive probe requests a collection.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Default number of retry rounds before a leak is reported.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default number of indirect-expunge reads submitted per retry round.
pub const DEFAULT_PROBE_READS: usize = 50;

/// Default interval between queue polls while waiting for a pool to drain.
pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_millis(10);

/// How the bounded-leak probe tries to release stale entries between
/// collections.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ExpungeStrategy {
    /// Read one probe slot shared by every round. Reads keep landing on the
    /// same table positions, so some stale entries may never be reached.
    #[default]
    SharedProbe,
    /// Read a newly created probe slot each time, spreading the opportunistic
    /// scans across each table.
    FreshProbe,
    /// Skip the reads and run one explicit sweep over every table per round.
    Sweep,
    /// Only collect; never touch the tables.
    None,
}

impl ExpungeStrategy {
    /// The name accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SharedProbe => "shared",
            Self::FreshProbe => "fresh",
            Self::Sweep => "sweep",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ExpungeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpungeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::SharedProbe),
            "fresh" => Ok(Self::FreshProbe),
            "sweep" => Ok(Self::Sweep),
            "none" => Ok(Self::None),
            _ => Err(Error::InvalidEnv {
                var: "LINGERING_EXPUNGE",
                value: s.to_string(),
            }),
        }
    }
}

/// Settings shared by all probes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct ProbeConfig {
    workers: usize,
    total: usize,
    payload_size: usize,
    grace: Duration,
    settle_delay: Duration,
    max_retries: u32,
    probe_reads: usize,
    drain_poll: Duration,
    expunge: ExpungeStrategy,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            total: DEFAULT_TOTAL,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            grace: DEFAULT_GRACE,
            settle_delay: DEFAULT_SETTLE_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            probe_reads: DEFAULT_PROBE_READS,
            drain_poll: DEFAULT_DRAIN_POLL,
            expunge: ExpungeStrategy::default(),
        }
    }
}

impl ProbeConfig {
    /// Returns the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the default configuration with any `LINGERING_*` environment
    /// variables applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEnv`] for a value that does not parse and
    /// [`Error::InvalidConfig`] if the result fails [`ProbeConfig::validate`].
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, Error> {
        fn parse<T: FromStr>(var: &'static str, value: &str) -> Result<T, Error> {
            value.trim().parse().map_err(|_| Error::InvalidEnv {
                var,
                value: value.to_string(),
            })
        }

        let mut config = Self::default();
        if let Some(value) = lookup("LINGERING_WORKERS") {
            config.workers = parse("LINGERING_WORKERS", &value)?;
        }
        if let Some(value) = lookup("LINGERING_TOTAL") {
            config.total = parse("LINGERING_TOTAL", &value)?;
        }
        if let Some(value) = lookup("LINGERING_PAYLOAD_BYTES") {
            config.payload_size = parse("LINGERING_PAYLOAD_BYTES", &value)?;
        }
        if let Some(value) = lookup("LINGERING_GRACE_MS") {
            config.grace = Duration::from_millis(parse("LINGERING_GRACE_MS", &value)?);
        }
        if let Some(value) = lookup("LINGERING_SETTLE_MS") {
            config.settle_delay = Duration::from_millis(parse("LINGERING_SETTLE_MS", &value)?);
        }
        if let Some(value) = lookup("LINGERING_MAX_RETRIES") {
            config.max_retries = parse("LINGERING_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("LINGERING_PROBE_READS") {
            config.probe_reads = parse("LINGERING_PROBE_READS", &value)?;
        }
        if let Some(value) = lookup("LINGERING_EXPUNGE") {
            config.expunge = value.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration can drive a probe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the worker count, the total or the
    /// retry budget is zero.
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be non-zero"));
        }
        if self.total == 0 {
            return Err(Error::InvalidConfig("total must be non-zero"));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidConfig("max_retries must be non-zero"));
        }
        Ok(())
    }

    /// Sets the number of pool workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the number of work units the bounded probes submit.
    pub fn with_total(mut self, total: usize) -> Self {
        self.total = total;
        self
    }

    /// Sets the size of each payload in bytes.
    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = size;
        self
    }

    /// Sets the wait after each requested collection.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Sets the delay before the interactive probe requests a collection.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the number of retry rounds before a leak is reported.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the number of indirect-expunge reads per retry round.
    pub fn with_probe_reads(mut self, reads: usize) -> Self {
        self.probe_reads = reads;
        self
    }

    /// Sets the queue polling interval used while waiting for a drain.
    pub fn with_drain_poll(mut self, poll: Duration) -> Self {
        self.drain_poll = poll;
        self
    }

    /// Sets the indirect-expunge strategy of the bounded-leak probe.
    pub fn with_expunge(mut self, strategy: ExpungeStrategy) -> Self {
        self.expunge = strategy;
        self
    }

    /// The number of pool workers.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// The number of work units the bounded probes submit.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// The size of each payload in bytes.
    #[must_use]
    pub const fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// The wait after each requested collection.
    #[must_use]
    pub const fn grace(&self) -> Duration {
        self.grace
    }

    /// The delay before the interactive probe requests a collection.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// The number of retry rounds before a leak is reported.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The number of indirect-expunge reads per retry round.
    #[must_use]
    pub const fn probe_reads(&self) -> usize {
        self.probe_reads
    }

    /// The queue polling interval used while waiting for a drain.
    #[must_use]
    pub const fn drain_poll(&self) -> Duration {
        self.drain_poll
    }

    /// The indirect-expunge strategy of the bounded-leak probe.
    #[must_use]
    pub const fn expunge(&self) -> ExpungeStrategy {
        self.expunge
    }
}
