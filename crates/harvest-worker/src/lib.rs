//! Harvest worker library
//!
//! Claims pending jobs from the `videos` table, downloads each with `yt-dlp`
//! and uploads the results to S3.
//!
//! # Overview
//!
//! - [`db`]: connection pool, [`db::JobStore`] and the claim transaction
//! - [`downloader`]: the [`downloader::Downloader`] collaborator and its
//!   `yt-dlp` implementation
//! - [`storage`]: the [`storage::Uploader`] collaborator and its S3
//!   implementation
//! - [`worker`]: the [`worker::Worker`] state machine
//! - [`config`]: environment-driven configuration
//!
//! Any number of worker processes may share one database. Mutual exclusion
//! comes entirely from the claim transaction's `FOR UPDATE SKIP LOCKED`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use harvest_worker::{
//!     config::Config,
//!     db::{create_pool, PgJobStore},
//!     downloader::YtDlpDownloader,
//!     storage::S3Uploader,
//!     worker::Worker,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = create_pool(&config.database).await?;
//!     let mut worker = Worker::new(
//!         Arc::new(PgJobStore::new(pool)),
//!         Arc::new(YtDlpDownloader::new(config.downloader.clone())),
//!         Arc::new(S3Uploader::new(config.storage.clone()).await),
//!         config.worker.clone(),
//!         CancellationToken::new(),
//!     );
//!     worker.run().await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod db;
pub mod downloader;
pub mod storage;
pub mod worker;

pub use db::{JobStore, PgJobStore, StoreError};
pub use worker::{JobOutcome, Worker, WorkerError, WorkerState};
