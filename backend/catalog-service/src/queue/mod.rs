/// Durable work queue for image ingestion
///
/// Backed by a Redis Stream with a consumer group. Producers append one
/// entry per (product id, source image URL); consumers read with
/// `XREADGROUP`, so every entry stays in the group's pending list until it
/// is explicitly acknowledged. A consumer crash, or an explicit nack, leaves
/// the entry pending; once its idle time passes the claim threshold another
/// consumer reclaims and reprocesses it. Entries that keep failing are moved
/// to a dead-letter stream after `max_deliveries` attempts instead of
/// looping forever.
///
/// No ordering is guaranteed across entries, including entries for the same
/// product.
use crate::config::QueueConfig;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to enqueue work item: {0}")]
    Enqueue(String),

    #[error("failed to read from work queue: {0}")]
    Consume(String),

    #[error("failed to acknowledge work item: {0}")]
    Ack(String),

    #[error("queue connection failed: {0}")]
    Connection(String),
}

/// Identifies one delivery of a queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTag {
    pub id: String,
    pub deliveries: u64,
}

/// One unit of ingestion work: a single source image of a single product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub product_id: i64,
    pub source_url: String,
    pub tag: DeliveryTag,
}

/// Producer handle for the image queue. Cheap to clone; shared by the HTTP
/// handlers.
#[derive(Clone)]
pub struct ImageQueue {
    conn: ConnectionManager,
    stream: String,
}

impl ImageQueue {
    pub async fn connect(client: redis::Client, config: &QueueConfig) -> Result<Self, QueueError> {
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            stream: config.stream.clone(),
        })
    }

    /// Durably append a work item. Returns only once Redis has accepted the
    /// entry; an unreachable broker surfaces as `QueueError::Enqueue` and the
    /// caller decides whether to fail its own operation.
    pub async fn enqueue(&self, product_id: i64, source_url: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd(
                &self.stream,
                "*",
                &[
                    ("product_id", product_id.to_string()),
                    ("source_url", source_url.to_string()),
                ],
            )
            .await
            .map_err(|e| QueueError::Enqueue(e.to_string()))?;

        debug!(product_id, source_url, "Enqueued image for ingestion");
        Ok(())
    }
}

/// One logical consumer of the image queue.
///
/// Holds its own connection: blocking reads must not stall commands issued
/// by other users of a shared multiplexed connection.
pub struct ImageQueueConsumer {
    conn: ConnectionManager,
    config: QueueConfig,
    consumer: String,
}

impl ImageQueueConsumer {
    pub async fn connect(
        client: redis::Client,
        config: QueueConfig,
        consumer: String,
    ) -> Result<Self, QueueError> {
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        // Create the consumer group from the beginning of the stream so
        // entries enqueued before the first worker start are still seen.
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&config.stream, &config.group, "0")
            .await;
        if let Err(e) = created {
            if !e.to_string().contains("BUSYGROUP") {
                return Err(QueueError::Connection(e.to_string()));
            }
        }

        Ok(Self {
            conn,
            config,
            consumer,
        })
    }

    /// Fetch the next work item, blocking up to the configured timeout.
    ///
    /// Stale pending entries are reclaimed before new entries are read, and
    /// poison entries are diverted to the dead-letter stream in here, so the
    /// caller only ever sees items that are still worth attempting. Returns
    /// `Ok(None)` when the block timeout elapses with nothing to do.
    pub async fn next(&mut self) -> Result<Option<WorkItem>, QueueError> {
        loop {
            if let Some(item) = self.claim_stale().await? {
                return Ok(Some(item));
            }

            let Some(entry) = self.read_new().await? else {
                return Ok(None);
            };

            match parse_entry(&entry) {
                Ok((product_id, source_url)) => {
                    return Ok(Some(WorkItem {
                        product_id,
                        source_url,
                        tag: DeliveryTag {
                            id: entry.id.clone(),
                            deliveries: 1,
                        },
                    }));
                }
                Err(reason) => {
                    warn!(entry_id = %entry.id, reason, "Malformed queue entry, dead-lettering");
                    self.dead_letter(&entry, reason).await?;
                }
            }
        }
    }

    /// Remove an item from the queue after its processing durably completed.
    pub async fn ack(&mut self, tag: &DeliveryTag) -> Result<(), QueueError> {
        let _: i64 = self
            .conn
            .xack(&self.config.stream, &self.config.group, &[&tag.id])
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))?;

        Ok(())
    }

    /// Leave an item pending for redelivery. The entry is reclaimed by any
    /// consumer once it has been idle for the claim threshold; the broker
    /// keeps the delivery count.
    pub async fn nack(&mut self, tag: &DeliveryTag) -> Result<(), QueueError> {
        debug!(entry_id = %tag.id, deliveries = tag.deliveries, "Work item left for redelivery");
        Ok(())
    }

    /// Reclaim one stale pending entry, dead-lettering exhausted ones.
    async fn claim_stale(&mut self) -> Result<Option<WorkItem>, QueueError> {
        loop {
            let pending: StreamPendingCountReply = self
                .conn
                .xpending_count(&self.config.stream, &self.config.group, "-", "+", 10i64)
                .await
                .map_err(|e| QueueError::Consume(e.to_string()))?;

            let Some(stale) = pending
                .ids
                .iter()
                .find(|p| p.last_delivered_ms as u64 >= self.config.claim_min_idle_ms)
            else {
                return Ok(None);
            };

            let entry_id = stale.id.clone();
            let deliveries = stale.times_delivered as u64;

            // XCLAIM re-checks the idle time, so two consumers racing for the
            // same entry cannot both win it.
            let claimed: StreamClaimReply = self
                .conn
                .xclaim(
                    &self.config.stream,
                    &self.config.group,
                    &self.consumer,
                    self.config.claim_min_idle_ms as usize,
                    &[&entry_id],
                )
                .await
                .map_err(|e| QueueError::Consume(e.to_string()))?;

            let Some(entry) = claimed.ids.into_iter().next() else {
                continue;
            };

            if deliveries >= self.config.max_deliveries {
                warn!(
                    entry_id = %entry.id,
                    deliveries,
                    "Work item exceeded max deliveries, dead-lettering"
                );
                self.dead_letter(&entry, "max deliveries exceeded").await?;
                continue;
            }

            match parse_entry(&entry) {
                Ok((product_id, source_url)) => {
                    debug!(entry_id = %entry.id, deliveries, "Reclaimed pending work item");
                    return Ok(Some(WorkItem {
                        product_id,
                        source_url,
                        tag: DeliveryTag {
                            id: entry.id.clone(),
                            deliveries: deliveries + 1,
                        },
                    }));
                }
                Err(reason) => {
                    warn!(entry_id = %entry.id, reason, "Malformed queue entry, dead-lettering");
                    self.dead_letter(&entry, reason).await?;
                }
            }
        }
    }

    /// Block for one new entry.
    async fn read_new(&mut self) -> Result<Option<StreamId>, QueueError> {
        let options = StreamReadOptions::default()
            .group(&self.config.group, &self.consumer)
            .count(1)
            .block(self.config.block_ms as usize);

        let reply: StreamReadReply = self
            .conn
            .xread_options(&[&self.config.stream], &[">"], &options)
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        Ok(reply
            .keys
            .into_iter()
            .next()
            .and_then(|key| key.ids.into_iter().next()))
    }

    /// Park an entry on the dead-letter stream and drop it from the main one.
    async fn dead_letter(&mut self, entry: &StreamId, reason: &str) -> Result<(), QueueError> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.config.dead_letter_stream)
            .arg("*")
            .arg("origin_id")
            .arg(&entry.id)
            .arg("reason")
            .arg(reason);
        if let Some(product_id) = entry.get::<i64>("product_id") {
            cmd.arg("product_id").arg(product_id);
        }
        if let Some(source_url) = entry.get::<String>("source_url") {
            cmd.arg("source_url").arg(source_url);
        }

        let _: String = cmd
            .query_async(&mut self.conn)
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        let _: i64 = self
            .conn
            .xack(&self.config.stream, &self.config.group, &[&entry.id])
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))?;

        Ok(())
    }
}

fn parse_entry(entry: &StreamId) -> Result<(i64, String), &'static str> {
    let product_id: i64 = entry.get("product_id").ok_or("missing product_id")?;
    let source_url: String = entry.get("source_url").ok_or("missing source_url")?;
    if source_url.is_empty() {
        return Err("empty source_url");
    }
    Ok((product_id, source_url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;
    use std::collections::HashMap;

    fn entry(fields: &[(&str, &str)]) -> StreamId {
        let mut map = HashMap::new();
        for (k, v) in fields {
            map.insert(k.to_string(), Value::Data(v.as_bytes().to_vec()));
        }
        StreamId {
            id: "1-0".to_string(),
            map,
        }
    }

    #[test]
    fn parses_well_formed_entry() {
        let entry = entry(&[
            ("product_id", "42"),
            ("source_url", "https://example.com/a.png"),
        ]);
        assert_eq!(
            parse_entry(&entry),
            Ok((42, "https://example.com/a.png".to_string()))
        );
    }

    #[test]
    fn rejects_entry_missing_product_id() {
        let entry = entry(&[("source_url", "https://example.com/a.png")]);
        assert_eq!(parse_entry(&entry), Err("missing product_id"));
    }

    #[test]
    fn rejects_entry_with_non_numeric_product_id() {
        let entry = entry(&[
            ("product_id", "not-a-number"),
            ("source_url", "https://example.com/a.png"),
        ]);
        assert_eq!(parse_entry(&entry), Err("missing product_id"));
    }

    #[test]
    fn rejects_entry_with_empty_url() {
        let entry = entry(&[("product_id", "42"), ("source_url", "")]);
        assert_eq!(parse_entry(&entry), Err("empty source_url"));
    }
}
