use lingering_pool::PoolError;

/// Errors returned by the retention probes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The worker pool could not be started or no longer accepts work.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// An environment variable could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv {
        /// The variable name.
        var: &'static str,
        /// The value that failed to parse.
        value: String,
    },
    /// The background collector thread is gone. A probe cannot wait for a
    /// collection without it, so this aborts the probe.
    #[error("the background collector has stopped")]
    CollectorStopped,
    /// A probe thread panicked before handing back its result.
    #[error("a probe thread panicked")]
    ThreadPanicked,
    /// Spawning a probe thread or reading operator input failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[test]
fn messages() {
    assert_eq!(
        Error::from(PoolError::NoWorkers).to_string(),
        "a worker pool needs at least one worker"
    );
    assert_eq!(
        Error::InvalidEnv {
            var: "LINGERING_TOTAL",
            value: String::from("many"),
        }
        .to_string(),
        "invalid value \"many\" for LINGERING_TOTAL"
    );
}
