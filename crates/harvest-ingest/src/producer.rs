//! Ingestion producer
//!
//! Pages through search results for every query and duration bucket, drops
//! ids the store already knows, resolves durations for the rest and inserts
//! the candidates that are long enough as pending jobs.
//!
//! Failures are contained per bucket: a search or duration lookup error
//! abandons the current bucket and the run moves on to the next one. A job
//! store error only loses the current page.

use harvest_common::NewJob;
use harvest_worker::db::JobStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::youtube::{DurationBucket, SearchItem, VideoSearch};

/// Counters for one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub pages_fetched: u64,
    pub candidates_seen: u64,
    /// Already present in the store, skipped before the duration lookup
    pub already_known: u64,
    /// Too short, or unknown to the duration lookup
    pub filtered_out: u64,
    pub inserted: u64,
    /// Pages whose store calls failed
    pub failed_batches: u64,
    /// Buckets abandoned after a search or lookup error
    pub failed_buckets: u64,
}

impl IngestStats {
    fn absorb(&mut self, page: PageStats) {
        self.pages_fetched += 1;
        self.candidates_seen += page.candidates;
        self.already_known += page.already_known;
        self.filtered_out += page.filtered_out;
        self.inserted += page.inserted;
        if page.store_failed {
            self.failed_batches += 1;
        }
    }
}

#[derive(Debug, Default)]
struct PageStats {
    candidates: u64,
    already_known: u64,
    filtered_out: u64,
    inserted: u64,
    store_failed: bool,
}

/// Build pending jobs for the items whose duration meets the minimum.
///
/// Items missing from `durations` are dropped.
pub fn select_candidates(
    items: &[SearchItem],
    durations: &HashMap<String, i64>,
    config: &IngestConfig,
) -> Vec<NewJob> {
    items
        .iter()
        .filter_map(|item| {
            let secs = *durations.get(&item.id)?;
            if secs < config.min_duration_secs {
                return None;
            }
            Some(
                NewJob::new(&item.id, IngestConfig::watch_url(&item.id), &config.prefix)
                    .with_title(&item.title)
                    .with_duration(secs)
                    .with_version(config.version.clone()),
            )
        })
        .collect()
}

pub struct IngestionProducer {
    search: Arc<dyn VideoSearch>,
    store: Arc<dyn JobStore>,
    config: IngestConfig,
}

impl IngestionProducer {
    pub fn new(
        search: Arc<dyn VideoSearch>,
        store: Arc<dyn JobStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            search,
            store,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest every query across every configured bucket
    pub async fn run(&self, queries: &[String]) -> IngestStats {
        let mut stats = IngestStats::default();

        'queries: for query in queries {
            for &bucket in &self.config.buckets {
                match self.ingest_bucket(query, bucket, &mut stats).await {
                    Ok(pages) => {
                        info!(query = %query, bucket = %bucket, pages, "Bucket ingested");
                    }
                    Err(e) => {
                        stats.failed_buckets += 1;
                        error!(query = %query, bucket = %bucket, error = %e, "Bucket aborted");
                        if e.is_quota_exhausted() {
                            warn!("API quota exhausted, stopping ingestion");
                            break 'queries;
                        }
                    }
                }
            }
        }

        info!(
            pages = stats.pages_fetched,
            candidates = stats.candidates_seen,
            already_known = stats.already_known,
            filtered_out = stats.filtered_out,
            inserted = stats.inserted,
            failed_batches = stats.failed_batches,
            failed_buckets = stats.failed_buckets,
            "Ingestion finished"
        );

        stats
    }

    /// Follow `nextPageToken` through one bucket, returning the pages fetched
    #[instrument(skip(self, stats), fields(prefix = %self.config.prefix))]
    pub async fn ingest_bucket(
        &self,
        query: &str,
        bucket: DurationBucket,
        stats: &mut IngestStats,
    ) -> Result<u32, IngestError> {
        let mut page_token: Option<String> = None;
        let mut pages: u32 = 0;

        loop {
            if self.config.max_pages.is_some_and(|max| pages >= max) {
                info!(pages, "Page limit reached");
                break;
            }

            let page = self
                .search
                .search(query, page_token.as_deref(), bucket)
                .await?;
            pages += 1;

            let page_stats = self.ingest_page(&page.items).await?;
            stats.absorb(page_stats);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }

            if !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        Ok(pages)
    }

    /// Store the qualifying items of one page.
    ///
    /// Only duration lookup errors propagate; store errors are logged and
    /// recorded in the returned stats.
    async fn ingest_page(&self, items: &[SearchItem]) -> Result<PageStats, IngestError> {
        let mut page = PageStats {
            candidates: items.len() as u64,
            ..PageStats::default()
        };

        let mut seen = HashSet::new();
        let unique: Vec<&SearchItem> = items.iter().filter(|i| seen.insert(&i.id)).collect();
        let ids: Vec<String> = unique.iter().map(|i| i.id.clone()).collect();

        let known = match self.store.existing_ids(&ids).await {
            Ok(known) => known,
            Err(e) => {
                error!(error = %e, "Failed to check existing jobs");
                page.store_failed = true;
                return Ok(page);
            }
        };
        page.already_known = (items.len() - unique.len()) as u64 + known.len() as u64;

        let fresh: Vec<SearchItem> = unique
            .into_iter()
            .filter(|i| !known.contains(&i.id))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(page);
        }

        let fresh_ids: Vec<String> = fresh.iter().map(|i| i.id.clone()).collect();
        let durations = self.search.durations(&fresh_ids).await?;

        let jobs = select_candidates(&fresh, &durations, &self.config);
        page.filtered_out = (fresh.len() - jobs.len()) as u64;
        if jobs.is_empty() {
            return Ok(page);
        }

        match self.store.insert_new(&jobs).await {
            Ok(inserted) => page.inserted = inserted,
            Err(e) => {
                error!(error = %e, jobs = jobs.len(), "Failed to insert jobs");
                page.store_failed = true;
            }
        }

        Ok(page)
    }
}
