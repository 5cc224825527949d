//! Ingest Worker - queue consumer for image processing
//!
//! Drains the image queue written by the catalog HTTP service: downloads
//! each product's source images, compresses them, uploads the compressed
//! copies to object storage, and records the resulting URLs on the product
//! rows. Runs a configurable number of consumer tasks; each processes one
//! work item at a time.
//!
//! Environment variables (see `Config::from_env` for defaults):
//! - DATABASE_URL: PostgreSQL URL for the products table
//! - REDIS_URL / QUEUE_REDIS_URL: cache and queue brokers
//! - QUEUE_STREAM, QUEUE_GROUP, QUEUE_DEAD_LETTER_STREAM
//! - QUEUE_MAX_DELIVERIES, QUEUE_CLAIM_MIN_IDLE_MS, QUEUE_BLOCK_MS
//! - S3_BUCKET, AWS_REGION, S3_ENDPOINT
//! - INGEST_CONCURRENCY, INGEST_FETCH_TIMEOUT_SECS

use catalog_service::cache::ProductCache;
use catalog_service::queue::ImageQueueConsumer;
use catalog_service::services::ingest::{HttpAssetFetcher, IngestWorker, S3AssetStore};
use catalog_service::Config;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ingest_worker=info".parse().expect("valid directive"))
                .add_directive("catalog_service=info".parse().expect("valid directive")),
        )
        .init();

    info!("Starting Ingest Worker");

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    info!(
        stream = %config.queue.stream,
        group = %config.queue.group,
        bucket = %config.s3.bucket,
        concurrency = config.ingest.concurrency,
        "Configuration loaded"
    );

    // Shared handles for all consumer tasks
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let cache_client = redis::Client::open(config.cache.redis_url.as_str())?;
    let product_cache = ProductCache::new(cache_client, Some(config.cache.ttl_seconds))
        .await
        .map_err(|e| format!("{e}"))?;

    let fetcher = HttpAssetFetcher::new(Duration::from_secs(config.ingest.fetch_timeout_secs))
        .map_err(|e| format!("{e}"))?;
    let asset_store = S3AssetStore::new(&config.s3).await;

    let queue_client = redis::Client::open(config.queue.redis_url.as_str())?;

    // Handle SIGTERM/SIGINT for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl+c");
        info!("Shutdown signal received");
        let _ = shutdown_tx_clone.send(true);
    });

    // One consumer task per configured slot, each with its own queue
    // connection so blocking reads stay independent.
    let mut tasks = JoinSet::new();
    for slot in 0..config.ingest.concurrency.max(1) {
        let consumer_name = format!("ingest-{}-{}", slot, Uuid::new_v4());
        let queue = ImageQueueConsumer::connect(
            queue_client.clone(),
            config.queue.clone(),
            consumer_name.clone(),
        )
        .await
        .map_err(|e| format!("{e}"))?;

        let worker = IngestWorker::new(
            fetcher.clone(),
            asset_store.clone(),
            db_pool.clone(),
            product_cache.clone(),
        );
        let shutdown = shutdown_rx.clone();

        tasks.spawn(async move {
            info!(consumer = %consumer_name, "Consumer task started");
            worker.run(queue, shutdown).await
        });
    }

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Consumer task failed"),
            Err(e) => error!(error = %e, "Consumer task panicked"),
        }
    }

    info!("Ingest Worker stopped");
    Ok(())
}
