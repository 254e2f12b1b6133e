//! Shared test utilities for harvest-ingest integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use harvest_common::{Job, JobStatus, NewJob, StatusCounts};
use harvest_ingest::{
    DurationBucket, IngestConfig, IngestError, SearchItem, SearchPage, VideoSearch,
};
use harvest_worker::db::{JobStore, StoreError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,harvest_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// No page delay, default everything else
pub fn test_config() -> IngestConfig {
    let mut config = IngestConfig::new("test-key");
    config.page_delay = Duration::ZERO;
    config
}

fn unavailable() -> StoreError {
    StoreError::Sqlx(sqlx::Error::PoolTimedOut)
}

// ============================================================================
// Scripted Search
// ============================================================================

/// One scripted search response
pub enum ScriptedPage {
    Page(SearchPage),
    Error(IngestError),
}

/// Serves pages per `(query, bucket)` in order and durations from a table
#[derive(Default)]
pub struct FakeSearch {
    pages: Mutex<HashMap<(String, DurationBucket), Vec<ScriptedPage>>>,
    durations: HashMap<String, i64>,
    failing_durations: bool,
    searches: Mutex<Vec<(String, Option<String>, DurationBucket)>>,
    duration_lookups: Mutex<Vec<Vec<String>>>,
}

impl FakeSearch {
    pub fn with_durations(pairs: &[(&str, i64)]) -> Self {
        Self {
            durations: pairs.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
            ..Self::default()
        }
    }

    pub fn failing_durations(mut self) -> Self {
        self.failing_durations = true;
        self
    }

    /// Queue a page of `ids` for `(query, bucket)`, linked to the next one by `next`
    pub fn page(
        self,
        query: &str,
        bucket: DurationBucket,
        ids: &[&str],
        next: Option<&str>,
    ) -> Self {
        let page = SearchPage {
            items: ids
                .iter()
                .map(|id| SearchItem::new(*id, format!("Video {id}")))
                .collect(),
            next_page_token: next.map(str::to_string),
        };
        self.push(query, bucket, ScriptedPage::Page(page))
    }

    pub fn error(self, query: &str, bucket: DurationBucket, error: IngestError) -> Self {
        self.push(query, bucket, ScriptedPage::Error(error))
    }

    fn push(self, query: &str, bucket: DurationBucket, page: ScriptedPage) -> Self {
        self.pages
            .lock()
            .unwrap()
            .entry((query.to_string(), bucket))
            .or_default()
            .push(page);
        self
    }

    pub fn searches(&self) -> Vec<(String, Option<String>, DurationBucket)> {
        self.searches.lock().unwrap().clone()
    }

    pub fn duration_lookups(&self) -> Vec<Vec<String>> {
        self.duration_lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoSearch for FakeSearch {
    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
        bucket: DurationBucket,
    ) -> Result<SearchPage, IngestError> {
        self.searches.lock().unwrap().push((
            query.to_string(),
            page_token.map(str::to_string),
            bucket,
        ));

        let mut pages = self.pages.lock().unwrap();
        let queue = pages.entry((query.to_string(), bucket)).or_default();
        if queue.is_empty() {
            return Ok(SearchPage::default());
        }
        match queue.remove(0) {
            ScriptedPage::Page(page) => Ok(page),
            ScriptedPage::Error(e) => Err(e),
        }
    }

    async fn durations(&self, ids: &[String]) -> Result<HashMap<String, i64>, IngestError> {
        self.duration_lookups.lock().unwrap().push(ids.to_vec());
        if self.failing_durations {
            return Err(IngestError::api(500, "backendError"));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.durations.get(id).map(|s| (id.clone(), *s)))
            .collect())
    }
}

// ============================================================================
// In-memory Job Store
// ============================================================================

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
    failing_inserts: AtomicU32,
    insert_calls: AtomicU32,
}

impl MemoryJobStore {
    pub fn with_ids(ids: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut jobs = store.jobs.lock().unwrap();
            for id in ids {
                jobs.push(to_job(&NewJob::new(
                    *id,
                    IngestConfig::watch_url(id),
                    "31638062/Nature",
                )));
            }
        }
        store
    }

    /// The next `n` inserts fail with a connectivity error
    pub fn fail_next_inserts(&self, n: u32) {
        self.failing_inserts.store(n, Ordering::SeqCst);
    }

    /// Number of `insert_new` calls, failed ones included
    pub fn insert_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn ids(&self) -> Vec<String> {
        self.jobs.lock().unwrap().iter().map(|j| j.id.clone()).collect()
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }
}

fn to_job(new: &NewJob) -> Job {
    Job {
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
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_new(&self, new_jobs: &[NewJob]) -> Result<u64, StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(unavailable());
        }

        let mut jobs = self.jobs.lock().unwrap();
        let mut inserted = 0;
        for new in new_jobs {
            if !jobs.iter().any(|j| j.id == new.id) {
                jobs.push(to_job(new));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn claim_next_pending(&self) -> Result<Option<Job>, StoreError> {
        Ok(None)
    }

    async fn update_status(
        &self,
        id: &str,
        _status: JobStatus,
        _error: Option<&str>,
    ) -> Result<Job, StoreError> {
        Err(StoreError::not_found(id))
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.job(id))
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
