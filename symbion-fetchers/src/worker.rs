//! Isolated fetch workers
//!
//! Each host is fetched in its own `symbion-fetch-worker` process:
//! - the job ([`FetchJob`]) is written to the worker's stdin as JSON
//! - the worker answers with one [`FetchOutcome`] on stdout
//! - [`WorkerPool`] runs many workers concurrently and kills stuck ones
//!
//! One failing or hanging job never affects the others.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::FileCache;
use crate::error::FetchError;
use crate::fetchers::{get_raw_data, Fetcher, FetcherState, SnmpContext};
use crate::mode::Mode;
use crate::types::{HostName, RawData};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchJob {
    #[serde(default = "Uuid::new_v4")]
    pub job_id: Uuid,
    pub host_name: HostName,
    pub fetcher: FetcherState,
    pub file_cache: FileCache,
    pub mode: Mode,
    #[serde(default)]
    pub snmp_context: Option<SnmpContext>,
}

impl FetchJob {
    pub fn new(host_name: HostName, fetcher: FetcherState, file_cache: FileCache, mode: Mode) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            host_name,
            fetcher,
            file_cache,
            mode,
            snmp_context: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchStatus {
    Ok { raw_data: RawData },
    Timeout { message: String },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub job_id: Uuid,
    pub host_name: HostName,
    #[serde(flatten)]
    pub status: FetchStatus,
    pub duration_ms: u64,
}

/// Runs one job in the current process.
pub fn run_job(job: FetchJob, default_snmp_context: &SnmpContext) -> FetchOutcome {
    let started = Instant::now();
    let snmp_context = job.snmp_context.as_ref().unwrap_or(default_snmp_context);
    let mut fetcher = Fetcher::from_transport_state(job.fetcher, snmp_context);
    debug!("[{}] Running job {} for {}", fetcher, job.job_id, job.host_name);

    let status = match get_raw_data(&job.file_cache, &mut fetcher, job.mode) {
        Ok(raw_data) => FetchStatus::Ok { raw_data },
        Err(FetchError::Timeout(timeout)) => FetchStatus::Timeout { message: timeout.0 },
        Err(FetchError::Fetcher(error)) => FetchStatus::Error { message: error.message().to_string() },
    };
    FetchOutcome {
        job_id: job.job_id,
        host_name: job.host_name,
        status,
        duration_ms: elapsed_ms(started),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Runs jobs in worker processes, at most `max_parallel` at a time.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    binary: PathBuf,
    timeout: Duration,
    max_parallel: usize,
}

impl WorkerPool {
    pub fn new(binary: PathBuf, timeout: Duration, max_parallel: usize) -> Self {
        Self { binary, timeout, max_parallel: max_parallel.max(1) }
    }

    /// One outcome per job, in job order.
    pub async fn run(&self, jobs: Vec<FetchJob>) -> Vec<FetchOutcome> {
        info!("Running {} fetch jobs ({} in parallel)", jobs.len(), self.max_parallel);
        let permits = Arc::new(Semaphore::new(self.max_parallel));
        let runs = jobs.into_iter().map(|job| {
            let permits = Arc::clone(&permits);
            async move {
                let _permit = permits.acquire_owned().await;
                self.run_one(job).await
            }
        });
        join_all(runs).await
    }

    async fn run_one(&self, job: FetchJob) -> FetchOutcome {
        let started = Instant::now();
        let (job_id, host_name) = (job.job_id, job.host_name.clone());
        match self.spawn_worker(&job).await {
            Ok(outcome) => outcome,
            Err(status) => {
                warn!("Fetch job {} for {} failed: {:?}", job_id, host_name, status);
                FetchOutcome {
                    job_id,
                    host_name,
                    status,
                    duration_ms: elapsed_ms(started),
                }
            }
        }
    }

    async fn spawn_worker(&self, job: &FetchJob) -> Result<FetchOutcome, FetchStatus> {
        let error = |message: String| FetchStatus::Error { message };
        let payload = serde_json::to_vec(job).map_err(|e| error(format!("Cannot encode fetch job: {e}")))?;

        let mut child = Command::new(&self.binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| error(format!("Cannot start fetch worker {}: {e}", self.binary.display())))?;

        // sending the job counts against the timeout
        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(&payload)
                    .await
                    .map_err(|e| error(format!("Cannot send job to fetch worker: {e}")))?;
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| error(format!("Fetch worker failed: {e}")))
        };

        let output = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(FetchStatus::Timeout {
                    message: format!(
                        "Fetch worker for {} did not finish within {}",
                        job.host_name,
                        humantime::format_duration(self.timeout)
                    ),
                })
            }
        };
        if !output.status.success() {
            return Err(error(format!("Fetch worker exited with {}", output.status)));
        }
        serde_json::from_slice(&output.stdout).map_err(|e| error(format!("Cannot decode fetch worker answer: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchers::ProgramParams;

    #[test]
    fn outcome_document_is_flat() {
        let outcome = FetchOutcome {
            job_id: Uuid::nil(),
            host_name: HostName::new("heute"),
            status: FetchStatus::Timeout { message: "too slow".into() },
            duration_ms: 3,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "timeout");
        assert_eq!(json["message"], "too slow");
        assert_eq!(serde_json::from_value::<FetchOutcome>(json).unwrap(), outcome);
    }

    #[test]
    fn job_without_id_gets_one() {
        let job = FetchJob::new(
            HostName::new("heute"),
            FetcherState::Program(ProgramParams { cmdline: "true".into(), stdin: None, is_cmc: false, timeout: None }),
            FileCache::no_cache(HostName::new("heute")),
            Mode::Checking,
        );
        let mut json = serde_json::to_value(&job).unwrap();
        json.as_object_mut().unwrap().remove("job_id");
        let decoded: FetchJob = serde_json::from_value(json).unwrap();
        assert_ne!(decoded.job_id, Uuid::nil());
        assert_eq!(decoded.fetcher, job.fetcher);
    }
}
