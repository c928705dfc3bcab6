//! symbion-fetch-worker: runs a single fetch job
//!
//! Reads a [`FetchJob`] from stdin and prints the [`FetchOutcome`] on stdout.
//! Logs go to stderr. The exit code is non-zero only when the job cannot be
//! read; fetch failures are part of the outcome.

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use symbion_fetchers::config::load_config;
use symbion_fetchers::worker::{run_job, FetchJob, FetchStatus};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("symbion_fetchers=info")))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config();

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read fetch job from stdin")?;
    let job: FetchJob = serde_json::from_str(&input).context("Failed to decode fetch job")?;
    info!("Fetching {} ({:?}, mode {})", job.host_name, job.fetcher.fetcher_type(), job.mode);

    let default_context = config.snmp_context(Arc::default());
    let outcome = run_job(job, &default_context);
    match &outcome.status {
        FetchStatus::Ok { .. } => info!("{}: fetched in {} ms", outcome.host_name, outcome.duration_ms),
        FetchStatus::Timeout { message } => info!("{}: timeout: {}", outcome.host_name, message),
        FetchStatus::Error { message } => info!("{}: error: {}", outcome.host_name, message),
    }

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &outcome).context("Failed to write fetch outcome")?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}
