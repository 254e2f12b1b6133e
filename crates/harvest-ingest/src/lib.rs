//! Harvest Ingest
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Fills the job store with pending videos found through the YouTube Data API.
//!
//! # Overview
//!
//! - [`youtube`]: the [`VideoSearch`] seam and its reqwest implementation
//! - [`duration`]: ISO-8601 duration parsing for `contentDetails.duration`
//! - [`producer`]: query x bucket pagination, dedup, duration filter, insert
//!
//! # Example
//!
//! ```no_run
//! use harvest_ingest::{IngestConfig, IngestionProducer, YouTubeClient};
//! use harvest_worker::db::{self, DbConfig, PgJobStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = IngestConfig::from_env()?;
//! let pool = db::create_pool(&DbConfig::from_env()?).await?;
//!
//! let producer = IngestionProducer::new(
//!     Arc::new(YouTubeClient::new(&config)?),
//!     Arc::new(PgJobStore::new(pool)),
//!     config,
//! );
//! let stats = producer.run(&["waterfall 4k".to_string()]).await;
//! println!("inserted {}", stats.inserted);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod duration;
pub mod error;
pub mod producer;
pub mod youtube;

pub use config::IngestConfig;
pub use error::IngestError;
pub use producer::{IngestStats, IngestionProducer};
pub use youtube::{DurationBucket, SearchItem, SearchPage, VideoSearch, YouTubeClient};
