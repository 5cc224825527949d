/// Caching layer for catalog-service
///
/// Read-through cache for product rows. Lookups that miss return `Ok(None)`;
/// repopulating from the store is the caller's job, which keeps this module
/// free of database dependencies. Writers of the product row never update
/// entries in place, they invalidate them.
use crate::error::{AppError, Result};
use crate::models::Product;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

const DEFAULT_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Redis-backed cache for product snapshots
#[derive(Clone)]
pub struct ProductCache {
    conn: Arc<Mutex<ConnectionManager>>,
    ttl_seconds: u64,
}

impl ProductCache {
    /// Initialize cache from Redis client
    pub async fn new(client: redis::Client, ttl_seconds: Option<u64>) -> Result<Self> {
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::CacheError(format!("Failed to connect to Redis: {e}")))?;

        Ok(Self::with_manager(Arc::new(Mutex::new(manager)), ttl_seconds))
    }

    pub fn with_manager(manager: Arc<Mutex<ConnectionManager>>, ttl_seconds: Option<u64>) -> Self {
        Self {
            conn: manager,
            ttl_seconds: ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS),
        }
    }

    /// Retrieve a cached product snapshot if present and unexpired
    pub async fn get(&self, product_id: i64) -> Result<Option<Product>> {
        self.get_json(&Self::product_key(product_id)).await
    }

    /// Cache a product snapshot, overwriting any existing entry
    pub async fn set(&self, product: &Product) -> Result<()> {
        self.set_json(&Self::product_key(product.id), product, None)
            .await
    }

    /// Drop the cache entry for a product. Missing keys are not an error.
    pub async fn invalidate(&self, product_id: i64) -> Result<()> {
        self.delete(&Self::product_key(product_id)).await
    }

    fn product_key(product_id: i64) -> String {
        format!("product:{}", product_id)
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<u64>) -> Result<()> {
        let payload = serde_json::to_string(value)
            .map_err(|e| AppError::CacheError(format!("Failed to serialize cache value: {e}")))?;

        let mut conn = self.conn.lock().await;
        let ttl = ttl.unwrap_or(self.ttl_seconds);
        conn.set_ex(key, payload, ttl)
            .await
            .map_err(|e| AppError::CacheError(format!("Failed to write to cache: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.lock().await;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| AppError::CacheError(format!("Failed to read from cache: {e}")))?;

        match value {
            Some(raw) => {
                let parsed = serde_json::from_str(&raw).map_err(|e| {
                    AppError::CacheError(format!("Failed to deserialize cache value: {e}"))
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.del(key)
            .await
            .map(|_: usize| ())
            .map_err(|e| AppError::CacheError(format!("Failed to delete cache key: {e}")))
    }
}
