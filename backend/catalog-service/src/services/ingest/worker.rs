//! Ingestion worker
//!
//! Drains the image queue: each work item is fetched, compressed, uploaded,
//! and recorded on its product row, in that order. The queue entry is
//! acknowledged only after the store write commits; acknowledging earlier
//! would lose the image if the process died between upload and persist.
//! After acknowledgement the product's cache entry is invalidated so the
//! next read repopulates from the store.
//!
//! Collaborators are injected through the traits below, which keeps the
//! state machine testable against in-memory fakes.

use crate::cache::ProductCache;
use crate::db::product_repo::{self, AppendOutcome};
use crate::queue::{DeliveryTag, ImageQueueConsumer, QueueError, WorkItem};
use crate::services::ingest::compressor::Compressor;
use crate::services::ingest::fetcher::{AssetFetcher, FetchError};
use crate::services::ingest::storage::{object_key, AssetStore};
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Store append failed for infrastructure reasons; the item is redelivered.
#[derive(Debug, Error)]
#[error("store append failed: {0}")]
pub struct PersistError(pub String);

/// Write access to the product rows mutated by the pipeline.
#[async_trait]
pub trait ProductWriter: Send + Sync {
    async fn append_compressed_image(
        &self,
        product_id: i64,
        source_url: &str,
        compressed_url: &str,
    ) -> Result<AppendOutcome, PersistError>;
}

#[async_trait]
impl ProductWriter for PgPool {
    async fn append_compressed_image(
        &self,
        product_id: i64,
        source_url: &str,
        compressed_url: &str,
    ) -> Result<AppendOutcome, PersistError> {
        product_repo::append_compressed_image(self, product_id, source_url, compressed_url)
            .await
            .map_err(|e| PersistError(e.to_string()))
    }
}

/// Cache eviction for products the pipeline has mutated.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, product_id: i64) -> crate::error::Result<()>;
}

#[async_trait]
impl CacheInvalidator for ProductCache {
    async fn invalidate(&self, product_id: i64) -> crate::error::Result<()> {
        ProductCache::invalidate(self, product_id).await
    }
}

/// Consumer side of the work queue, abstracted for tests.
#[async_trait]
pub trait WorkSource: Send {
    async fn next(&mut self) -> Result<Option<WorkItem>, QueueError>;
    async fn ack(&mut self, tag: &DeliveryTag) -> Result<(), QueueError>;
    async fn nack(&mut self, tag: &DeliveryTag) -> Result<(), QueueError>;
}

#[async_trait]
impl WorkSource for ImageQueueConsumer {
    async fn next(&mut self) -> Result<Option<WorkItem>, QueueError> {
        ImageQueueConsumer::next(self).await
    }

    async fn ack(&mut self, tag: &DeliveryTag) -> Result<(), QueueError> {
        ImageQueueConsumer::ack(self, tag).await
    }

    async fn nack(&mut self, tag: &DeliveryTag) -> Result<(), QueueError> {
        ImageQueueConsumer::nack(self, tag).await
    }
}

/// How a single work item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Pipeline ran to durable persistence; ack and invalidate the cache.
    Completed,
    /// The item can never succeed or is moot; ack without retrying.
    Dropped,
    /// Transient failure; leave the entry pending for redelivery.
    Retry,
}

pub struct IngestWorker<F, S, P, C> {
    fetcher: F,
    store: S,
    products: P,
    cache: C,
    compressor: Compressor,
}

impl<F, S, P, C> IngestWorker<F, S, P, C>
where
    F: AssetFetcher,
    S: AssetStore,
    P: ProductWriter,
    C: CacheInvalidator,
{
    pub fn new(fetcher: F, store: S, products: P, cache: C) -> Self {
        Self {
            fetcher,
            store,
            products,
            cache,
            compressor: Compressor::new(),
        }
    }

    /// Consume work items until the shutdown signal flips.
    pub async fn run<Q: WorkSource>(
        &self,
        mut queue: Q,
        mut shutdown: watch::Receiver<bool>,
    ) -> crate::error::Result<()> {
        info!("Starting ingestion loop");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Shutdown signal received, stopping consumer");
                        break;
                    }
                }

                next = queue.next() => {
                    match next {
                        Ok(Some(item)) => self.handle(&mut queue, item).await,
                        Ok(None) => {
                            // Block timeout with nothing to do; poll again.
                        }
                        Err(e) => {
                            error!(error = %e, "Queue read failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        info!("Ingestion loop stopped");
        Ok(())
    }

    async fn handle<Q: WorkSource>(&self, queue: &mut Q, item: WorkItem) {
        match self.process_item(&item).await {
            ItemOutcome::Completed => {
                if let Err(e) = queue.ack(&item.tag).await {
                    // The append is durable; a redelivery will land on the
                    // already-present path and ack again.
                    error!(entry_id = %item.tag.id, error = %e, "Ack failed after persist");
                }
                self.invalidate_cache(item.product_id).await;
            }
            ItemOutcome::Dropped => {
                if let Err(e) = queue.ack(&item.tag).await {
                    error!(entry_id = %item.tag.id, error = %e, "Ack failed for dropped item");
                }
            }
            ItemOutcome::Retry => {
                if let Err(e) = queue.nack(&item.tag).await {
                    error!(entry_id = %item.tag.id, error = %e, "Nack failed");
                }
            }
        }
    }

    /// Run one work item through the pipeline stages.
    ///
    /// Never acknowledges anything itself; it only reports how the item
    /// ended so [`run`](Self::run) can settle the queue entry.
    pub async fn process_item(&self, item: &WorkItem) -> ItemOutcome {
        debug!(
            product_id = item.product_id,
            source_url = %item.source_url,
            delivery = item.tag.deliveries,
            "Processing image"
        );

        let raw = match self.fetcher.fetch(&item.source_url).await {
            Ok(bytes) => bytes,
            Err(FetchError::Terminal(reason)) => {
                warn!(
                    product_id = item.product_id,
                    source_url = %item.source_url,
                    reason = %reason,
                    "Unfetchable source image, dropping"
                );
                return ItemOutcome::Dropped;
            }
            Err(FetchError::Retryable(reason)) => {
                warn!(
                    product_id = item.product_id,
                    source_url = %item.source_url,
                    reason = %reason,
                    "Fetch failed, leaving for redelivery"
                );
                return ItemOutcome::Retry;
            }
        };

        let compressed = match self.compressor.compress(&raw) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(source_url = %item.source_url, error = %e, "Compression failed");
                return ItemOutcome::Retry;
            }
        };

        let key = object_key(&item.source_url);
        let compressed_url = match self.store.put(&key, compressed).await {
            Ok(url) => url,
            Err(e) => {
                warn!(source_url = %item.source_url, key = %key, error = %e, "Upload failed");
                return ItemOutcome::Retry;
            }
        };

        match self
            .products
            .append_compressed_image(item.product_id, &item.source_url, &compressed_url)
            .await
        {
            Ok(AppendOutcome::Appended) => {
                info!(
                    product_id = item.product_id,
                    source_url = %item.source_url,
                    compressed_url = %compressed_url,
                    "Image processed"
                );
                ItemOutcome::Completed
            }
            Ok(AppendOutcome::AlreadyPresent) => {
                debug!(
                    product_id = item.product_id,
                    source_url = %item.source_url,
                    "Compressed URL already recorded"
                );
                ItemOutcome::Completed
            }
            Ok(AppendOutcome::Moot) => {
                debug!(
                    product_id = item.product_id,
                    source_url = %item.source_url,
                    "Product or source image gone, dropping"
                );
                ItemOutcome::Dropped
            }
            Err(e) => {
                warn!(
                    product_id = item.product_id,
                    source_url = %item.source_url,
                    error = %e,
                    "Persist failed, leaving for redelivery"
                );
                ItemOutcome::Retry
            }
        }
    }

    async fn invalidate_cache(&self, product_id: i64) {
        if let Err(e) = self.cache.invalidate(product_id).await {
            // Bounded staleness: the entry still expires with its TTL.
            warn!(product_id, error = %e, "Cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::services::ingest::storage::UploadError;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    type EventLog = Arc<Mutex<Vec<&'static str>>>;

    fn events(log: &EventLog) -> Vec<&'static str> {
        log.lock().unwrap().clone()
    }

    struct FakeFetcher {
        log: EventLog,
        responses: Mutex<VecDeque<Result<Bytes, FetchError>>>,
    }

    #[async_trait]
    impl AssetFetcher for FakeFetcher {
        async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
            self.log.lock().unwrap().push("fetch");
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected fetch call")
        }
    }

    struct FakeStore {
        log: EventLog,
        fail: bool,
    }

    #[async_trait]
    impl AssetStore for FakeStore {
        async fn put(&self, key: &str, _body: Bytes) -> Result<String, UploadError> {
            self.log.lock().unwrap().push("put");
            if self.fail {
                Err(UploadError("object store unreachable".to_string()))
            } else {
                Ok(format!("https://cdn.test/{key}"))
            }
        }
    }

    struct FakeWriter {
        log: EventLog,
        outcomes: Mutex<VecDeque<Result<AppendOutcome, PersistError>>>,
    }

    #[async_trait]
    impl ProductWriter for FakeWriter {
        async fn append_compressed_image(
            &self,
            _product_id: i64,
            _source_url: &str,
            _compressed_url: &str,
        ) -> Result<AppendOutcome, PersistError> {
            self.log.lock().unwrap().push("append");
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected append call")
        }
    }

    struct FakeCache {
        log: EventLog,
        fail: bool,
    }

    #[async_trait]
    impl CacheInvalidator for FakeCache {
        async fn invalidate(&self, _product_id: i64) -> crate::error::Result<()> {
            self.log.lock().unwrap().push("invalidate");
            if self.fail {
                Err(AppError::CacheError("cache unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct FakeQueue {
        log: EventLog,
        items: VecDeque<WorkItem>,
    }

    #[async_trait]
    impl WorkSource for FakeQueue {
        async fn next(&mut self) -> Result<Option<WorkItem>, QueueError> {
            match self.items.pop_front() {
                Some(item) => Ok(Some(item)),
                None => {
                    // Mimic the blocking read so the run loop does not spin.
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(None)
                }
            }
        }

        async fn ack(&mut self, _tag: &DeliveryTag) -> Result<(), QueueError> {
            self.log.lock().unwrap().push("ack");
            Ok(())
        }

        async fn nack(&mut self, _tag: &DeliveryTag) -> Result<(), QueueError> {
            self.log.lock().unwrap().push("nack");
            Ok(())
        }
    }

    fn item() -> WorkItem {
        WorkItem {
            product_id: 7,
            source_url: "https://example.com/a.png".to_string(),
            tag: DeliveryTag {
                id: "1-0".to_string(),
                deliveries: 1,
            },
        }
    }

    struct Fixture {
        log: EventLog,
        fetch: VecDeque<Result<Bytes, FetchError>>,
        append: VecDeque<Result<AppendOutcome, PersistError>>,
        store_fails: bool,
        cache_fails: bool,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                log: EventLog::default(),
                fetch: VecDeque::new(),
                append: VecDeque::new(),
                store_fails: false,
                cache_fails: false,
            }
        }

        fn worker(self) -> (EventLog, IngestWorker<FakeFetcher, FakeStore, FakeWriter, FakeCache>) {
            let log = self.log;
            let worker = IngestWorker::new(
                FakeFetcher {
                    log: log.clone(),
                    responses: Mutex::new(self.fetch),
                },
                FakeStore {
                    log: log.clone(),
                    fail: self.store_fails,
                },
                FakeWriter {
                    log: log.clone(),
                    outcomes: Mutex::new(self.append),
                },
                FakeCache {
                    log: log.clone(),
                    fail: self.cache_fails,
                },
            );
            (log, worker)
        }
    }

    #[tokio::test]
    async fn successful_item_is_acked_only_after_persist() {
        let mut fx = Fixture::new();
        fx.fetch.push_back(Ok(Bytes::from_static(b"raw image")));
        fx.append.push_back(Ok(AppendOutcome::Appended));
        let (log, worker) = fx.worker();

        let mut queue = FakeQueue {
            log: log.clone(),
            items: VecDeque::new(),
        };
        worker.handle(&mut queue, item()).await;

        assert_eq!(events(&log), ["fetch", "put", "append", "ack", "invalidate"]);
    }

    #[tokio::test]
    async fn terminal_fetch_failure_drops_without_retry() {
        let mut fx = Fixture::new();
        fx.fetch
            .push_back(Err(FetchError::Terminal("404 Not Found".to_string())));
        let (log, worker) = fx.worker();

        let mut queue = FakeQueue {
            log: log.clone(),
            items: VecDeque::new(),
        };
        worker.handle(&mut queue, item()).await;

        // Dropped items are acked so they never redeliver, and nothing
        // downstream of the fetch runs.
        assert_eq!(events(&log), ["fetch", "ack"]);
    }

    #[tokio::test]
    async fn transient_fetch_failure_is_left_for_redelivery() {
        let mut fx = Fixture::new();
        fx.fetch
            .push_back(Err(FetchError::Retryable("timed out".to_string())));
        let (log, worker) = fx.worker();

        let mut queue = FakeQueue {
            log: log.clone(),
            items: VecDeque::new(),
        };
        worker.handle(&mut queue, item()).await;

        assert_eq!(events(&log), ["fetch", "nack"]);
    }

    #[tokio::test]
    async fn upload_failure_is_left_for_redelivery() {
        let mut fx = Fixture::new();
        fx.fetch.push_back(Ok(Bytes::from_static(b"raw image")));
        fx.store_fails = true;
        let (log, worker) = fx.worker();

        let mut queue = FakeQueue {
            log: log.clone(),
            items: VecDeque::new(),
        };
        worker.handle(&mut queue, item()).await;

        assert_eq!(events(&log), ["fetch", "put", "nack"]);
    }

    #[tokio::test]
    async fn persist_failure_is_left_for_redelivery() {
        let mut fx = Fixture::new();
        fx.fetch.push_back(Ok(Bytes::from_static(b"raw image")));
        fx.append
            .push_back(Err(PersistError("connection reset".to_string())));
        let (log, worker) = fx.worker();

        let mut queue = FakeQueue {
            log: log.clone(),
            items: VecDeque::new(),
        };
        worker.handle(&mut queue, item()).await;

        assert_eq!(events(&log), ["fetch", "put", "append", "nack"]);
    }

    #[tokio::test]
    async fn reprocessing_does_not_duplicate_the_entry() {
        let mut fx = Fixture::new();
        fx.fetch.push_back(Ok(Bytes::from_static(b"raw image")));
        fx.append.push_back(Ok(AppendOutcome::AlreadyPresent));
        let (log, worker) = fx.worker();

        // A redelivered duplicate completes normally without a second append
        // taking effect.
        assert_eq!(worker.process_item(&item()).await, ItemOutcome::Completed);
        assert_eq!(events(&log), ["fetch", "put", "append"]);
    }

    #[tokio::test]
    async fn vanished_product_makes_the_item_moot() {
        let mut fx = Fixture::new();
        fx.fetch.push_back(Ok(Bytes::from_static(b"raw image")));
        fx.append.push_back(Ok(AppendOutcome::Moot));
        let (log, worker) = fx.worker();

        let mut queue = FakeQueue {
            log: log.clone(),
            items: VecDeque::new(),
        };
        worker.handle(&mut queue, item()).await;

        // Acked and forgotten; no cache invalidation for a row that is gone.
        assert_eq!(events(&log), ["fetch", "put", "append", "ack"]);
    }

    #[tokio::test]
    async fn cache_invalidation_failure_does_not_fail_the_item() {
        let mut fx = Fixture::new();
        fx.fetch.push_back(Ok(Bytes::from_static(b"raw image")));
        fx.append.push_back(Ok(AppendOutcome::Appended));
        fx.cache_fails = true;
        let (log, worker) = fx.worker();

        let mut queue = FakeQueue {
            log: log.clone(),
            items: VecDeque::new(),
        };
        worker.handle(&mut queue, item()).await;

        // Ack happened before the failed invalidation; the entry goes stale
        // only until its TTL.
        assert_eq!(events(&log), ["fetch", "put", "append", "ack", "invalidate"]);
    }

    #[tokio::test]
    async fn run_drains_the_queue_and_stops_on_shutdown() {
        let mut fx = Fixture::new();
        fx.fetch.push_back(Ok(Bytes::from_static(b"raw image")));
        fx.append.push_back(Ok(AppendOutcome::Appended));
        let (log, worker) = fx.worker();

        let queue = FakeQueue {
            log: log.clone(),
            items: VecDeque::from([item()]),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = tokio::spawn(async move { worker.run(queue, shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        run.await.unwrap().unwrap();
        assert_eq!(events(&log), ["fetch", "put", "append", "ack", "invalidate"]);
    }
}
