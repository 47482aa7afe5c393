//! Submits work forever. Every unit stores a 5 MiB payload in a private slot
//! and never clears it, and the count of unreleased payloads never reaches
//! zero. Stop it with Ctrl-C.
use std::process::ExitCode;

use lingering::ProbeConfig;

#[path = "support.rs"]
mod support;

fn main() -> ExitCode {
    support::init_logging();
    support::finish(
        ProbeConfig::from_env().and_then(|config| lingering::unbounded_leak(&config, None)),
    )
}
