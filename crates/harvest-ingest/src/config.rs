//! Ingestion configuration
//!
//! Read from the environment by [`IngestConfig::from_env`]; the CLI overrides
//! individual fields afterwards and calls [`IngestConfig::validate`].

use anyhow::Context;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::youtube::DurationBucket;

// ============================================================================
// Ingestion Constants
// ============================================================================

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com";

/// Object key prefix for nature footage
pub const PREFIX_NATURE: &str = "31638062/Nature";

/// Object key prefix for wildlife footage
pub const PREFIX_WILDLIFE: &str = "31638062/Wildlife";

pub const DEFAULT_PREFIX: &str = PREFIX_NATURE;

/// Candidates shorter than this are never queued.
pub const DEFAULT_MIN_DURATION_SECS: i64 = 120;

/// Pause between result pages to stay clear of the API quota.
pub const DEFAULT_PAGE_DELAY_SECS: u64 = 2;

/// Largest page the search endpoint serves.
pub const MAX_PAGE_SIZE: u32 = 50;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_BUCKETS: [DurationBucket; 2] = [DurationBucket::Medium, DurationBucket::Long];

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub api_key: String,
    /// Scheme and host of the Data API; tests point this at a mock server
    pub api_base_url: String,
    pub prefix: String,
    pub version: Option<String>,
    pub min_duration_secs: i64,
    pub page_delay: Duration,
    /// Per-bucket page cap; `None` follows `nextPageToken` to the end
    pub max_pages: Option<u32>,
    pub page_size: u32,
    pub request_timeout: Duration,
    pub buckets: Vec<DurationBucket>,
}

impl IngestConfig {
    /// Defaults for everything except the API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            version: None,
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
            page_delay: Duration::from_secs(DEFAULT_PAGE_DELAY_SECS),
            max_pages: None,
            page_size: MAX_PAGE_SIZE,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            buckets: DEFAULT_BUCKETS.to_vec(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("YOUTUBE_API_KEY").context("YOUTUBE_API_KEY must be set")?;

        let mut config = Self::new(api_key);
        if let Ok(url) = env::var("YOUTUBE_API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Ok(prefix) = env::var("INGEST_PREFIX") {
            config.prefix = prefix;
        }
        config.version = env::var("INGEST_VERSION").ok().filter(|v| !v.is_empty());
        config.min_duration_secs = env_or("INGEST_MIN_DURATION_SECS", DEFAULT_MIN_DURATION_SECS);
        config.page_delay =
            Duration::from_secs(env_or("INGEST_PAGE_DELAY_SECS", DEFAULT_PAGE_DELAY_SECS));
        config.max_pages = env::var("INGEST_MAX_PAGES")
            .ok()
            .and_then(|s| s.trim().parse().ok());

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("YOUTUBE_API_KEY cannot be empty");
        }

        if self.api_base_url.is_empty() {
            anyhow::bail!("YOUTUBE_API_BASE_URL cannot be empty");
        }

        if self.prefix.trim_matches('/').is_empty() {
            anyhow::bail!("Ingest prefix cannot be empty");
        }

        if self.min_duration_secs < 0 {
            anyhow::bail!("INGEST_MIN_DURATION_SECS cannot be negative");
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            anyhow::bail!("Page size must be between 1 and {}", MAX_PAGE_SIZE);
        }

        if self.max_pages == Some(0) {
            anyhow::bail!("INGEST_MAX_PAGES must be greater than 0");
        }

        if self.buckets.is_empty() {
            anyhow::bail!("At least one duration bucket is required");
        }

        Ok(())
    }

    /// Watch page handed to the downloader
    pub fn watch_url(video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={video_id}")
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
