//! Every unit clears its slot when it finishes, so every payload is released
//! once the queue drains.
use std::process::ExitCode;

use lingering::ProbeConfig;

#[path = "support.rs"]
mod support;

fn main() -> ExitCode {
    support::init_logging();
    support::finish(ProbeConfig::from_env().and_then(|config| lingering::best_practice(&config)))
}
