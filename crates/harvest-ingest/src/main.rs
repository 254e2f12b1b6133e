//! Harvest Ingest - queue videos for the harvest workers

use anyhow::{Context, Result};
use clap::Parser;
use harvest_common::logging::{init_logging, LogConfig, LogLevel};
use harvest_common::JobStatus;
use harvest_ingest::{DurationBucket, IngestConfig, IngestionProducer, YouTubeClient};
use harvest_worker::db::{self, DbConfig, JobStore, PgJobStore};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "harvest-ingest")]
#[command(author, version, about = "Queue YouTube videos for harvesting")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Search and insert new pending jobs
    Run {
        /// Search query (repeatable)
        #[arg(short, long = "query", required = true)]
        queries: Vec<String>,

        /// Duration bucket to search (repeatable, default medium and long)
        #[arg(short, long = "bucket", value_enum)]
        buckets: Vec<DurationBucket>,

        /// Object key prefix for the queued jobs
        #[arg(short, long)]
        prefix: Option<String>,

        /// Variant tag stored on the queued jobs
        #[arg(long)]
        version: Option<String>,

        /// Stop each bucket after this many pages
        #[arg(long)]
        max_pages: Option<u32>,
    },

    /// Log the number of jobs in each status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("harvest-ingest")
        .filter_directives("sqlx=warn,reqwest=info,hyper_util=info")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let db_config = DbConfig::from_env().context("Failed to load database configuration")?;
    let pool = db::create_pool(&db_config)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(PgJobStore::new(pool.clone()));

    let result = match cli.command {
        Command::Run {
            queries,
            buckets,
            prefix,
            version,
            max_pages,
        } => {
            let mut config = IngestConfig::from_env()?;
            if !buckets.is_empty() {
                config.buckets = buckets;
            }
            if let Some(prefix) = prefix {
                config.prefix = prefix;
            }
            if version.is_some() {
                config.version = version;
            }
            if max_pages.is_some() {
                config.max_pages = max_pages;
            }
            config.validate()?;

            db::run_migrations(&pool).await?;
            run(config, store, &queries).await
        }
        Command::Status => status(store.as_ref()).await,
    };

    pool.close().await;
    result
}

async fn run(config: IngestConfig, store: Arc<PgJobStore>, queries: &[String]) -> Result<()> {
    info!(
        queries = queries.len(),
        buckets = ?config.buckets,
        prefix = %config.prefix,
        version = ?config.version,
        "Starting ingestion"
    );

    let search = YouTubeClient::new(&config).context("Failed to build YouTube client")?;
    let producer = IngestionProducer::new(Arc::new(search), store, config);

    tokio::select! {
        stats = producer.run(queries) => {
            if stats.failed_buckets > 0 || stats.failed_batches > 0 {
                warn!(
                    failed_buckets = stats.failed_buckets,
                    failed_batches = stats.failed_batches,
                    "Ingestion finished with errors"
                );
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping ingestion");
        }
    }

    Ok(())
}

async fn status(store: &PgJobStore) -> Result<()> {
    let counts = store
        .status_counts()
        .await
        .context("Failed to count jobs")?;

    info!(
        pending = counts.get(JobStatus::Pending),
        cooking = counts.get(JobStatus::Cooking),
        failed = counts.get(JobStatus::Failed),
        completed = counts.get(JobStatus::Completed),
        total = counts.total(),
        "Job status counts"
    );

    Ok(())
}
