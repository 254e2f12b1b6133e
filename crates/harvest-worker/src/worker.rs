//! Worker loop
//!
//! One worker per process. The loop is an explicit state machine:
//!
//! ```text
//! Idle ──claim──▶ Downloading ──ok──▶ Uploading ──ok──▶ Finalizing(Completed)
//!  │  ▲               │                   │                  │
//!  │  │               └──err──────────────┴──err──▶ Finalizing(Failed)
//!  │  │                                                      │
//!  │  └──────────── Backoff(d) ◀─────────────────────────────┘
//!  └──empty / store error──▶ Backoff(d)
//! ```
//!
//! [`Worker::step`] performs exactly one transition, so each edge can be
//! exercised on its own. [`Worker::run`] drives `step` until the worker is
//! stopped by shutdown or the store has failed too many times in a row.
//!
//! Download and upload failures end the current job as `Failed`; they never
//! stop the loop. Only consecutive store failures are fatal.

use harvest_common::{Job, JobStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::db::{JobStore, StoreError};
use crate::downloader::{Artifact, DownloadError, DownloadRequest, Downloader};
use crate::storage::{UploadError, Uploader};

/// Reason recorded on a job aborted by shutdown
pub const SHUTDOWN_REASON: &str = "interrupted by shutdown";

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Job store unavailable after {attempts} consecutive failures: {source}")]
    StoreUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

/// How a claimed job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every artifact uploaded; remote locations in upload order
    Completed { locations: Vec<String> },
    Failed { reason: String },
}

impl JobOutcome {
    fn failed(reason: impl ToString) -> Self {
        Self::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Ready to claim
    Idle,
    /// Sleeping before the next claim
    Backoff(Duration),
    Downloading(Job),
    Uploading {
        job: Job,
        artifacts: Vec<Artifact>,
    },
    /// Writing the terminal status of `job`
    Finalizing {
        job: Job,
        outcome: JobOutcome,
    },
    Stopped,
}

impl WorkerState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Backoff(_) => "backoff",
            WorkerState::Downloading(_) => "downloading",
            WorkerState::Uploading { .. } => "uploading",
            WorkerState::Finalizing { .. } => "finalizing",
            WorkerState::Stopped => "stopped",
        }
    }
}

pub struct Worker {
    worker_id: String,
    store: Arc<dyn JobStore>,
    downloader: Arc<dyn Downloader>,
    uploader: Arc<dyn Uploader>,
    config: WorkerConfig,
    shutdown: CancellationToken,
    store_failures: u32,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        downloader: Arc<dyn Downloader>,
        uploader: Arc<dyn Uploader>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let instance = Uuid::new_v4().simple().to_string();

        Self {
            worker_id: format!("{}-{}", hostname, &instance[..8]),
            store,
            downloader,
            uploader,
            config,
            shutdown,
            store_failures: 0,
        }
    }

    /// Consecutive store failures seen so far
    pub fn store_failures(&self) -> u32 {
        self.store_failures
    }

    /// Drive the state machine until shutdown or a fatal store error
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        let span = tracing::info_span!("worker", worker_id = %self.worker_id);

        async {
            info!("Worker started");
            let mut state = WorkerState::Idle;
            loop {
                if state == WorkerState::Stopped {
                    info!("Worker stopped");
                    return Ok(());
                }
                state = self.step(state).await?;
            }
        }
        .instrument(span)
        .await
    }

    /// Perform one transition from `state`
    pub async fn step(&mut self, state: WorkerState) -> Result<WorkerState, WorkerError> {
        let from = state.name();

        let next = match state {
            WorkerState::Idle => self.claim().await?,
            WorkerState::Backoff(delay) => self.backoff(delay).await,
            WorkerState::Downloading(job) => self.download(job).await,
            WorkerState::Uploading { job, artifacts } => self.upload(job, artifacts).await,
            WorkerState::Finalizing { job, outcome } => self.finalize(job, outcome).await?,
            WorkerState::Stopped => WorkerState::Stopped,
        };

        debug!(from, to = next.name(), "Worker transition");
        Ok(next)
    }

    async fn claim(&mut self) -> Result<WorkerState, WorkerError> {
        if self.shutdown.is_cancelled() {
            return Ok(WorkerState::Stopped);
        }

        match self.store.claim_next_pending().await {
            Ok(Some(job)) => {
                self.store_failures = 0;
                info!(job_id = %job.id, prefix = %job.prefix, url = %job.url, "Claimed job");
                Ok(WorkerState::Downloading(job))
            }
            Ok(None) => {
                self.store_failures = 0;
                debug!("No pending jobs");
                Ok(WorkerState::Backoff(self.config.empty_backoff))
            }
            Err(e) => {
                self.record_store_failure(e)?;
                Ok(WorkerState::Backoff(self.config.claim_retry_delay))
            }
        }
    }

    async fn backoff(&self, delay: Duration) -> WorkerState {
        tokio::select! {
            _ = self.shutdown.cancelled() => WorkerState::Stopped,
            _ = tokio::time::sleep(delay) => WorkerState::Idle,
        }
    }

    async fn download(&self, job: Job) -> WorkerState {
        let request = DownloadRequest::for_job(&job);
        let after = self.config.download_timeout;

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(DownloadError::Cancelled),
            result = tokio::time::timeout(after, self.downloader.download(&request)) => {
                result.unwrap_or(Err(DownloadError::TimedOut { after }))
            }
        };

        match result {
            Ok(artifacts) if artifacts.is_empty() => {
                warn!(job_id = %job.id, "Downloader reported success without artifacts");
                WorkerState::Finalizing {
                    job,
                    outcome: JobOutcome::failed("downloader produced no artifacts"),
                }
            }
            Ok(artifacts) => WorkerState::Uploading { job, artifacts },
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Download failed");
                let outcome = match e {
                    DownloadError::Cancelled => JobOutcome::failed(SHUTDOWN_REASON),
                    other => JobOutcome::failed(format!("download failed: {other}")),
                };
                WorkerState::Finalizing { job, outcome }
            }
        }
    }

    async fn upload(&self, job: Job, artifacts: Vec<Artifact>) -> WorkerState {
        let paths: Vec<PathBuf> = artifacts
            .iter()
            .flat_map(|a| a.paths().map(PathBuf::from))
            .collect();

        let mut locations = Vec::with_capacity(paths.len());
        for path in &paths {
            match self.upload_one(path, &job.prefix).await {
                Ok(location) => {
                    info!(job_id = %job.id, location = %location, "Uploaded artifact");
                    locations.push(location);
                }
                Err(e) => {
                    // Local files stay for manual recovery.
                    warn!(
                        job_id = %job.id,
                        path = %path.display(),
                        error = %e,
                        "Upload failed, keeping local files"
                    );
                    let outcome = match e {
                        UploadError::Cancelled => JobOutcome::failed(SHUTDOWN_REASON),
                        other => JobOutcome::failed(format!("upload failed: {other}")),
                    };
                    return WorkerState::Finalizing { job, outcome };
                }
            }
        }

        for path in &paths {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "Failed to delete local file");
            }
        }

        WorkerState::Finalizing {
            job,
            outcome: JobOutcome::Completed { locations },
        }
    }

    async fn upload_one(
        &self,
        path: &std::path::Path,
        prefix: &str,
    ) -> Result<String, UploadError> {
        let after = self.config.upload_timeout;

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(UploadError::Cancelled),
            result = tokio::time::timeout(after, self.uploader.upload(path, prefix)) => {
                result.unwrap_or_else(|_| {
                    Err(UploadError::TimedOut {
                        path: path.to_path_buf(),
                        after,
                    })
                })
            }
        }
    }

    /// Not interruptible: a claimed job always gets its terminal status
    /// written, or an error logged.
    async fn finalize(
        &mut self,
        job: Job,
        outcome: JobOutcome,
    ) -> Result<WorkerState, WorkerError> {
        let status = outcome.status();
        let reason = match &outcome {
            JobOutcome::Failed { reason } => Some(reason.as_str()),
            JobOutcome::Completed { .. } => None,
        };

        match self.store.update_status(&job.id, status, reason).await {
            Ok(updated) => {
                self.store_failures = 0;
                match &outcome {
                    JobOutcome::Completed { locations } => info!(
                        job_id = %updated.id,
                        prefix = %updated.prefix,
                        uploaded = locations.len(),
                        "Job completed"
                    ),
                    JobOutcome::Failed { reason } => {
                        warn!(job_id = %updated.id, reason = %reason, "Job failed")
                    }
                }
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    status = %status,
                    error = %e,
                    "Failed to record job status"
                );
                self.record_store_failure(e)?;
            }
        }

        Ok(WorkerState::Backoff(self.config.between_jobs_delay))
    }

    fn record_store_failure(&mut self, source: StoreError) -> Result<(), WorkerError> {
        self.store_failures += 1;

        if self.store_failures >= self.config.max_store_failures {
            return Err(WorkerError::StoreUnavailable {
                attempts: self.store_failures,
                source,
            });
        }

        warn!(
            attempt = self.store_failures,
            max_attempts = self.config.max_store_failures,
            error = %source,
            "Job store error, retrying"
        );
        Ok(())
    }
}
