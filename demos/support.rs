use std::process::ExitCode;

use lingering::{Error, ProbeReport};
use tracing_subscriber::EnvFilter;

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();
}

pub fn finish(result: Result<ProbeReport, Error>) -> ExitCode {
    match result {
        Ok(report) => {
            tracing::info!(%report, "probe finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(%err, "probe failed");
            ExitCode::FAILURE
        }
    }
}
