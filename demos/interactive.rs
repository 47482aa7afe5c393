//! Stores a payload from a short-lived thread that hands out a reference to
//! its slot table, then waits for enter. The payload outlives its thread.
use std::io;
use std::process::ExitCode;

use lingering::ProbeConfig;

#[path = "support.rs"]
mod support;

fn main() -> ExitCode {
    support::init_logging();
    support::finish(
        ProbeConfig::from_env()
            .and_then(|config| lingering::interactive(&config, io::stdin().lock())),
    )
}
