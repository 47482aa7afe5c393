//! Submits a fixed number of units that each store a payload in a private
//! slot and never clear it, then tries to get the stale entries expunged.
//!
//! Set `LINGERING_EXPUNGE` to `shared`, `fresh`, `sweep` or `none` to pick
//! how.
use std::process::ExitCode;

use lingering::ProbeConfig;

#[path = "support.rs"]
mod support;

fn main() -> ExitCode {
    support::init_logging();
    support::finish(ProbeConfig::from_env().and_then(|config| lingering::bounded_leak(&config)))
}
