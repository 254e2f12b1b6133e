//! Shared test utilities for harvest-worker integration tests
//!
//! - [`TestPostgres`]: PostgreSQL container with migrations applied
//! - [`MemoryJobStore`]: in-process [`JobStore`] with failure injection
//! - [`FakeDownloader`] / [`FakeUploader`]: scripted collaborators

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use harvest_common::{Job, JobStatus, NewJob, StatusCounts};
use harvest_worker::config::WorkerConfig;
use harvest_worker::db::{JobStore, StoreError};
use harvest_worker::downloader::{Artifact, DownloadError, DownloadRequest, Downloader};
use harvest_worker::storage::{UploadError, Uploader};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,harvest_worker=debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Millisecond-scale delays so loop tests finish quickly
pub fn fast_config() -> WorkerConfig {
    WorkerConfig {
        empty_backoff: Duration::from_millis(10),
        claim_retry_delay: Duration::from_millis(5),
        between_jobs_delay: Duration::from_millis(5),
        max_store_failures: 3,
        download_timeout: Duration::from_secs(10),
        upload_timeout: Duration::from_secs(10),
        run_migrations: false,
    }
}

pub fn new_job(id: &str) -> NewJob {
    NewJob::new(id, format!("https://www.youtube.com/watch?v={id}"), "31638062/Nature")
        .with_title(format!("Video {id}"))
        .with_duration(300)
}

fn unavailable() -> StoreError {
    StoreError::Sqlx(sqlx::Error::PoolTimedOut)
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        Self::start_with_max_connections(5).await
    }

    pub async fn start_with_max_connections(max_connections: u32) -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        harvest_worker::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}

// ============================================================================
// In-memory Job Store
// ============================================================================

/// Keeps jobs in insertion order, which doubles as claim order.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
    failing_claims: AtomicU32,
    failing_updates: AtomicU32,
}

impl MemoryJobStore {
    pub fn with_jobs(ids: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut jobs = store.jobs.lock().unwrap();
            for id in ids {
                let new = new_job(id);
                jobs.push(Job {
                    id: new.id,
                    title: new.title,
                    url: new.url,
                    duration_secs: new.duration_secs,
                    prefix: new.prefix,
                    version: new.version,
                    status: JobStatus::Pending,
                    start_at: None,
                    end_at: None,
                    last_error: None,
                    created_at: Utc::now(),
                });
            }
        }
        store
    }

    /// The next `n` claims fail with a connectivity error
    pub fn fail_next_claims(&self, n: u32) {
        self.failing_claims.store(n, Ordering::SeqCst);
    }

    /// The next `n` status updates fail with a connectivity error
    pub fn fail_next_updates(&self, n: u32) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    pub fn job(&self, id: &str) -> Job {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("job {id} not in store"))
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_new(&self, new_jobs: &[NewJob]) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut inserted = 0;
        for new in new_jobs {
            if jobs.iter().any(|j| j.id == new.id) {
                continue;
            }
            jobs.push(Job {
                id: new.id.clone(),
                title: new.title.clone(),
                url: new.url.clone(),
                duration_secs: new.duration_secs,
                prefix: new.prefix.clone(),
                version: new.version.clone(),
                status: JobStatus::Pending,
                start_at: None,
                end_at: None,
                last_error: None,
                created_at: Utc::now(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn claim_next_pending(&self) -> Result<Option<Job>, StoreError> {
        if Self::take_failure(&self.failing_claims) {
            return Err(unavailable());
        }

        let mut jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter_mut()
            .find(|j| j.status == JobStatus::Pending)
            .map(|job| {
                job.status = JobStatus::Cooking;
                job.start_at = Some(Utc::now());
                job.clone()
            }))
    }

    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job, StoreError> {
        if Self::take_failure(&self.failing_updates) {
            return Err(unavailable());
        }

        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::not_found(id))?;

        if !job.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: job.status,
                to: status,
            });
        }

        job.status = status;
        if status.is_terminal() {
            job.end_at = Some(Utc::now());
            job.last_error = error.map(str::to_string);
        } else {
            job.start_at = Some(Utc::now());
        }
        Ok(job.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned())
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for job in self.jobs.lock().unwrap().iter() {
            counts.set(job.status, counts.get(job.status) + 1);
        }
        Ok(counts)
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| jobs.iter().any(|j| &j.id == *id))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Collaborators
// ============================================================================

pub enum DownloadBehavior {
    /// Write `<hint>.mp4` and `<hint>.info.json` into the directory
    WriteFiles(PathBuf),
    Fail,
    /// Never return
    Hang,
}

pub struct FakeDownloader {
    behavior: DownloadBehavior,
    requests: Mutex<Vec<DownloadRequest>>,
}

impl FakeDownloader {
    pub fn new(behavior: DownloadBehavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<DownloadRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, request: &DownloadRequest) -> Result<Vec<Artifact>, DownloadError> {
        self.requests.lock().unwrap().push(request.clone());

        match &self.behavior {
            DownloadBehavior::WriteFiles(dir) => {
                let stem = format!("{}{}", request.naming_hint, request.suffix());
                let media = dir.join(format!("{stem}.mp4"));
                let sidecar = dir.join(format!("{stem}.info.json"));
                std::fs::write(&media, b"video")?;
                std::fs::write(&sidecar, b"{}")?;
                Ok(vec![Artifact {
                    media,
                    sidecar: Some(sidecar),
                }])
            }
            DownloadBehavior::Fail => Err(DownloadError::ExitStatus {
                code: Some(1),
                stderr: "ERROR: Video unavailable".to_string(),
            }),
            DownloadBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

#[derive(Default)]
pub struct FakeUploader {
    /// Fail any file whose name ends with this suffix
    fail_suffix: Option<String>,
    hang: bool,
    uploads: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeUploader {
    pub fn failing_on(suffix: &str) -> Self {
        Self {
            fail_suffix: Some(suffix.to_string()),
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, local: &Path, prefix: &str) -> Result<String, UploadError> {
        if self.hang {
            std::future::pending::<()>().await;
        }

        let name = local
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        if let Some(suffix) = &self.fail_suffix {
            if name.ends_with(suffix.as_str()) {
                return Err(UploadError::Storage {
                    key: format!("{prefix}/{name}"),
                    message: "AccessDenied".to_string(),
                });
            }
        }

        // The worker must still own the file while uploading.
        assert!(local.exists(), "{} uploaded after removal", local.display());
        self.uploads
            .lock()
            .unwrap()
            .push((local.to_path_buf(), prefix.to_string()));
        Ok(format!("https://harvest-test.s3.amazonaws.com/{prefix}/{name}"))
    }
}
