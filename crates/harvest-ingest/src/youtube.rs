//! YouTube Data API v3 search client
//!
//! Two endpoints are used:
//!
//! - `search` (`part=snippet`, `type=video`) pages through candidates for a
//!   query within one duration bucket
//! - `videos` (`part=contentDetails`) resolves exact durations, up to 50 ids
//!   per request

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::{IngestConfig, MAX_PAGE_SIZE};
use crate::duration::parse_iso8601_duration;
use crate::error::IngestError;

const USER_AGENT: &str = concat!("harvest-ingest/", env!("CARGO_PKG_VERSION"));

/// The `videoDuration` filter of the search endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum DurationBucket {
    /// No duration filter
    Any,
    /// Under 4 minutes
    Short,
    /// 4 to 20 minutes
    Medium,
    /// Over 20 minutes
    Long,
}

impl DurationBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationBucket::Any => "any",
            DurationBucket::Short => "short",
            DurationBucket::Medium => "medium",
            DurationBucket::Long => "long",
        }
    }
}

impl std::fmt::Display for DurationBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchItem {
    pub id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
}

impl SearchItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            channel_id: String::new(),
            channel_title: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub items: Vec<SearchItem>,
    pub next_page_token: Option<String>,
}

/// Source of ingestion candidates
#[async_trait]
pub trait VideoSearch: Send + Sync {
    /// Fetch one page of search results
    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
        bucket: DurationBucket,
    ) -> Result<SearchPage, IngestError>;

    /// Duration in seconds per id. Ids the service no longer knows are absent.
    async fn durations(&self, ids: &[String]) -> Result<HashMap<String, i64>, IngestError>;
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchListResponse {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: SearchResultId,
    #[serde(default)]
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Snippet {
    title: String,
    channel_id: String,
    channel_title: String,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource {
    id: String,
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

// ============================================================================
// Client
// ============================================================================

pub struct YouTubeClient {
    client: Client,
    base_url: String,
    api_key: String,
    page_size: u32,
}

impl YouTubeClient {
    pub fn new(config: &IngestConfig) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    /// GET `/youtube/v3/<endpoint>` and decode the JSON body.
    ///
    /// Transport errors drop the URL so the API key never reaches the logs.
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, IngestError> {
        let url = format!("{}/youtube/v3/{}", self.base_url, endpoint);

        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(reqwest::Error::without_url)?;

        if !status.is_success() {
            return Err(IngestError::api(status.as_u16(), body));
        }

        serde_json::from_str(&body).map_err(|e| IngestError::malformed(endpoint, e.to_string()))
    }
}

#[async_trait]
impl VideoSearch for YouTubeClient {
    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
        bucket: DurationBucket,
    ) -> Result<SearchPage, IngestError> {
        let page_size = self.page_size.to_string();
        let mut params = vec![
            ("part", "snippet"),
            ("type", "video"),
            ("q", query),
            ("maxResults", page_size.as_str()),
            ("videoDuration", bucket.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response: SearchListResponse = self.get_json("search", &params).await?;

        let total = response.items.len();
        let items: Vec<SearchItem> = response
            .items
            .into_iter()
            .filter_map(|result| {
                let id = result.id.video_id.filter(|id| !id.is_empty())?;
                Some(SearchItem {
                    id,
                    title: result.snippet.title,
                    channel_id: result.snippet.channel_id,
                    channel_title: result.snippet.channel_title,
                })
            })
            .collect();

        debug!(
            query,
            bucket = %bucket,
            results = total,
            videos = items.len(),
            "Fetched search page"
        );

        Ok(SearchPage {
            items,
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn durations(&self, ids: &[String]) -> Result<HashMap<String, i64>, IngestError> {
        let mut durations = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_PAGE_SIZE as usize) {
            let joined = chunk.join(",");
            let params = [("part", "contentDetails"), ("id", joined.as_str())];
            let response: VideoListResponse = self.get_json("videos", &params).await?;

            for video in response.items {
                let secs = match parse_iso8601_duration(&video.content_details.duration) {
                    Ok(secs) => secs,
                    Err(e) => {
                        warn!(
                            video_id = %video.id,
                            error = %e,
                            "Unparsable duration, treating as 0"
                        );
                        0
                    }
                };
                durations.insert(video.id, secs);
            }
        }

        Ok(durations)
    }
}
