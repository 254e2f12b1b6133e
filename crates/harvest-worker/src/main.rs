//! Harvest worker - main entry point

use anyhow::{Context, Result};
use harvest_common::logging::{init_logging, LogConfig};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use harvest_worker::{
    config::Config,
    db::{self, PgJobStore},
    downloader::YtDlpDownloader,
    storage::S3Uploader,
    worker::Worker,
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("harvest-worker")
        .filter_directives("harvest_worker=debug,sqlx=warn,aws_config=warn,aws_smithy_runtime=warn")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    info!("Starting harvest worker");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        bucket = %config.storage.bucket,
        work_dir = %config.downloader.work_dir.display(),
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    if config.worker.run_migrations {
        db::run_migrations(&pool).await?;
    }

    let downloader = YtDlpDownloader::new(config.downloader.clone());
    match downloader.version().await {
        Ok(version) => info!(version = %version, "yt-dlp available"),
        // Not fatal: every job would fail, which is visible in the table.
        Err(e) => warn!(error = %e, "Failed to get yt-dlp version"),
    }

    let uploader = S3Uploader::new(config.storage.clone()).await;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let mut worker = Worker::new(
        Arc::new(PgJobStore::new(pool.clone())),
        Arc::new(downloader),
        Arc::new(uploader),
        config.worker.clone(),
        shutdown,
    );

    let result = worker.run().await;
    pool.close().await;

    if let Err(e) = result {
        error!(error = %e, "Worker exiting");
        return Err(e.into());
    }

    info!("Harvest worker shut down");
    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    token.cancel();
}
