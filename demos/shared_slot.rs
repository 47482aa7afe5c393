//! Shares one slot across every unit. Once the pool drains, each worker still
//! caches its most recent payload.
use std::process::ExitCode;

use lingering::ProbeConfig;

#[path = "support.rs"]
mod support;

fn main() -> ExitCode {
    support::init_logging();
    support::finish(ProbeConfig::from_env().and_then(|config| lingering::shared_slot(&config)))
}
