//! Worker configuration
//!
//! Loaded once at startup from the environment (after reading `.env`) and
//! handed to constructors. Nothing reads the environment after `Config::load`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::db::DbConfig;
use crate::storage::StorageConfig;

// ============================================================================
// Worker Loop Constants
// ============================================================================

/// Sleep after a claim finds no pending job.
pub const DEFAULT_EMPTY_BACKOFF_SECS: u64 = 5;

/// Sleep after a claim transaction fails.
pub const DEFAULT_CLAIM_RETRY_SECS: u64 = 2;

/// Pause after finalizing a job before the next claim.
pub const DEFAULT_BETWEEN_JOBS_SECS: u64 = 2;

/// Consecutive store failures tolerated before the worker gives up.
pub const DEFAULT_MAX_STORE_FAILURES: u32 = 10;

/// Upper bound on one downloader invocation (2 hours).
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 7200;

/// Upper bound on one file upload (30 minutes).
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 1800;

// ============================================================================
// Downloader Constants
// ============================================================================

pub const DEFAULT_YTDLP_BINARY: &str = "yt-dlp";

pub const DEFAULT_YTDLP_SLEEP_REQUESTS: u32 = 5;

pub const DEFAULT_YTDLP_SLEEP_INTERVAL: u32 = 30;

/// Passed to `--match-filter duration>=N`, matching the ingestion minimum.
pub const DEFAULT_YTDLP_MIN_DURATION_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DbConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub downloader: DownloaderConfig,
}

/// Timing and failure policy of the worker loop
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub empty_backoff: Duration,
    pub claim_retry_delay: Duration,
    pub between_jobs_delay: Duration,
    pub max_store_failures: u32,
    pub download_timeout: Duration,
    pub upload_timeout: Duration,
    pub run_migrations: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            empty_backoff: Duration::from_secs(DEFAULT_EMPTY_BACKOFF_SECS),
            claim_retry_delay: Duration::from_secs(DEFAULT_CLAIM_RETRY_SECS),
            between_jobs_delay: Duration::from_secs(DEFAULT_BETWEEN_JOBS_SECS),
            max_store_failures: DEFAULT_MAX_STORE_FAILURES,
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            run_migrations: true,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self {
            empty_backoff: env_secs("WORKER_EMPTY_BACKOFF_SECS", DEFAULT_EMPTY_BACKOFF_SECS),
            claim_retry_delay: env_secs("WORKER_CLAIM_RETRY_SECS", DEFAULT_CLAIM_RETRY_SECS),
            between_jobs_delay: env_secs("WORKER_BETWEEN_JOBS_SECS", DEFAULT_BETWEEN_JOBS_SECS),
            max_store_failures: env_or("WORKER_MAX_STORE_FAILURES", DEFAULT_MAX_STORE_FAILURES),
            download_timeout: env_secs(
                "WORKER_DOWNLOAD_TIMEOUT_SECS",
                DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            ),
            upload_timeout: env_secs("WORKER_UPLOAD_TIMEOUT_SECS", DEFAULT_UPLOAD_TIMEOUT_SECS),
            run_migrations: env_or("WORKER_RUN_MIGRATIONS", true),
        }
    }
}

/// Settings for the `yt-dlp` invocation
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub binary: PathBuf,
    /// Netscape cookie file handed to `--cookies`
    pub cookies: Option<PathBuf>,
    /// Directory the downloader writes into and artifacts are read from
    pub work_dir: PathBuf,
    pub sleep_requests: u32,
    pub sleep_interval: u32,
    pub min_duration_secs: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_YTDLP_BINARY),
            cookies: None,
            work_dir: PathBuf::from("."),
            sleep_requests: DEFAULT_YTDLP_SLEEP_REQUESTS,
            sleep_interval: DEFAULT_YTDLP_SLEEP_INTERVAL,
            min_duration_secs: DEFAULT_YTDLP_MIN_DURATION_SECS,
        }
    }
}

impl DownloaderConfig {
    pub fn from_env() -> Self {
        Self {
            binary: std::env::var("YTDLP_BINARY")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_YTDLP_BINARY)),
            cookies: std::env::var("YTDLP_COOKIES")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            work_dir: std::env::var("YTDLP_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            sleep_requests: env_or("YTDLP_SLEEP_REQUESTS", DEFAULT_YTDLP_SLEEP_REQUESTS),
            sleep_interval: env_or("YTDLP_SLEEP_INTERVAL", DEFAULT_YTDLP_SLEEP_INTERVAL),
            min_duration_secs: env_or("YTDLP_MIN_DURATION_SECS", DEFAULT_YTDLP_MIN_DURATION_SECS),
        }
    }
}

impl Config {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DbConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            worker: WorkerConfig::from_env(),
            downloader: DownloaderConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.database.validate()?;

        if self.storage.bucket.is_empty() {
            anyhow::bail!("S3_BUCKET cannot be empty");
        }

        if self.worker.max_store_failures == 0 {
            anyhow::bail!("WORKER_MAX_STORE_FAILURES must be greater than 0");
        }

        if self.worker.download_timeout.is_zero() || self.worker.upload_timeout.is_zero() {
            anyhow::bail!("Download and upload timeouts must be greater than 0");
        }

        if self.downloader.binary.as_os_str().is_empty() {
            anyhow::bail!("YTDLP_BINARY cannot be empty");
        }

        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(key, default))
}
