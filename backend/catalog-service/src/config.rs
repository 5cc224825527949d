/// Configuration management for catalog-service
///
/// Loads configuration from environment variables with sensible defaults.
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub s3: S3Config,
    pub ingest: IngestConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheConfig {
    pub redis_url: String,
    pub ttl_seconds: u64,
}

/// Work-queue settings. The queue rides a Redis Stream with a consumer
/// group; pending entries left by a crashed or nacking consumer are
/// reclaimed once idle for `claim_min_idle_ms`, and entries delivered
/// `max_deliveries` times without an ack are moved to the dead-letter
/// stream. Durability across broker restarts depends on Redis persistence
/// (AOF) being enabled on the server.
#[derive(Clone, Debug, Deserialize)]
pub struct QueueConfig {
    pub redis_url: String,
    pub stream: String,
    pub group: String,
    pub dead_letter_stream: String,
    pub max_deliveries: u64,
    pub claim_min_idle_ms: u64,
    pub block_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IngestConfig {
    /// Number of concurrent consumer tasks in the worker process.
    pub concurrency: usize,
    /// Per-download timeout for source image fetches.
    pub fetch_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                host: std::env::var("CATALOG_SERVICE_HOST")
                    .unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("CATALOG_SERVICE_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost/catalog".to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            cache: CacheConfig {
                redis_url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost".to_string()),
                ttl_seconds: std::env::var("CACHE_TTL_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(24 * 60 * 60),
            },
            queue: QueueConfig {
                redis_url: std::env::var("QUEUE_REDIS_URL")
                    .or_else(|_| std::env::var("REDIS_URL"))
                    .unwrap_or_else(|_| "redis://localhost".to_string()),
                stream: std::env::var("QUEUE_STREAM")
                    .unwrap_or_else(|_| "catalog:image_queue".to_string()),
                group: std::env::var("QUEUE_GROUP")
                    .unwrap_or_else(|_| "ingest-worker".to_string()),
                dead_letter_stream: std::env::var("QUEUE_DEAD_LETTER_STREAM")
                    .unwrap_or_else(|_| "catalog:image_queue:dead".to_string()),
                max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
                claim_min_idle_ms: std::env::var("QUEUE_CLAIM_MIN_IDLE_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30_000),
                block_ms: std::env::var("QUEUE_BLOCK_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5_000),
            },
            s3: S3Config {
                bucket: std::env::var("S3_BUCKET").unwrap_or_else(|_| "catalog-images".to_string()),
                region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint: std::env::var("S3_ENDPOINT").ok(),
            },
            ingest: IngestConfig {
                concurrency: std::env::var("INGEST_CONCURRENCY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(4),
                fetch_timeout_secs: std::env::var("INGEST_FETCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            },
        })
    }
}
