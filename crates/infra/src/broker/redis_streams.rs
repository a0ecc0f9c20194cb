//! Redis Streams-backed broker client (durable, at-least-once delivery).
//!
//! Every queue is one Redis stream. Consumers read through a consumer group, so
//! a message stays in the group's pending list until it is acknowledged:
//!
//! - **Ack**: handler success → `XACK`
//! - **Nack**: handler failure → no `XACK`; the entry is re-read from this
//!   consumer's pending list (`XREADGROUP ... 0`) after `redelivery_delay`
//! - **Dead-letter**: after `max_deliveries` failed attempts, or when the payload
//!   cannot be decoded, the entry is copied to `<queue>.dlq` and acknowledged
//! - **Claim**: entries left pending by another consumer (e.g. a crashed
//!   replica) for at least `claim_idle` are taken over with `XCLAIM`; their
//!   attempt count continues from the group's delivery counter
//!
//! ## Stream Layout
//!
//! - Stream key: the queue name (e.g. `journal.account-deletion`)
//! - Entry fields: `payload` (JSON-encoded message)
//! - DLQ entry fields: `original_message_id`, `attempts`, `last_error`, `failed_at`, `payload`

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamReadOptions, StreamReadReply};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use journal_events::{
    BrokerClient, DEFAULT_MAX_DELIVERIES, Delivery, MessageHandler, SubscriptionHandle,
    dead_letter_queue,
};

/// Max entries fetched per `XREADGROUP`.
const READ_BATCH: usize = 10;

/// How long a read blocks waiting for new entries (bounds shutdown latency).
const DEFAULT_BLOCK_MS: usize = 1000;

/// Idle time after which another consumer's pending entry may be claimed.
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 60000;

/// Max group-wide pending entries inspected per claim pass.
const CLAIM_SCAN: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),
}

/// Broker client backed by Redis Streams consumer groups.
#[derive(Debug)]
pub struct RedisStreamsBroker<M> {
    client: Arc<redis::Client>,
    group: String,
    consumer: String,
    max_deliveries: u32,
    redelivery_delay: Duration,
    claim_idle: Duration,
    _message: PhantomData<fn() -> M>,
}

impl<M> Clone for RedisStreamsBroker<M> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            max_deliveries: self.max_deliveries,
            redelivery_delay: self.redelivery_delay,
            claim_idle: self.claim_idle,
            _message: PhantomData,
        }
    }
}

impl<M> RedisStreamsBroker<M> {
    /// Create a broker client.
    ///
    /// * `redis_url` - Redis connection URL (e.g. "redis://localhost:6379")
    /// * `group` - consumer group name (one per consuming service)
    /// * `consumer` - consumer name, unique within the group (e.g. hostname)
    pub fn new(
        redis_url: impl AsRef<str>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            group: group.into(),
            consumer: consumer.into(),
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            redelivery_delay: Duration::from_secs(1),
            claim_idle: Duration::from_millis(DEFAULT_PENDING_TIMEOUT_MS),
            _message: PhantomData,
        })
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// How long another consumer's entry must sit unacknowledged before this
    /// consumer takes it over.
    pub fn with_claim_idle(mut self, idle: Duration) -> Self {
        self.claim_idle = idle;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, RedisStreamsError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Ensure the consumer group exists on `queue` (idempotent).
    pub async fn ensure_consumer_group(&self, queue: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection().await?;

        // "$": only messages published after the group is first created.
        let created: redis::RedisResult<String> =
            conn.xgroup_create_mkstream(queue, &self.group, "$").await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::ConsumerGroup(e.to_string())),
        }
    }
}

#[async_trait]
impl<M> BrokerClient<M> for RedisStreamsBroker<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Error = RedisStreamsError;

    #[instrument(skip(self, message), fields(queue = %queue), err)]
    async fn publish(&self, queue: &str, message: M) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;

        let mut conn = self.connection().await?;
        let _: String = conn
            .xadd(queue, "*", &[("payload", payload.as_str())])
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler<M>>,
    ) -> Result<SubscriptionHandle, Self::Error> {
        self.ensure_consumer_group(queue).await?;
        let conn = self.connection().await?;

        let consumer = StreamConsumer {
            conn,
            queue: queue.to_string(),
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            max_deliveries: self.max_deliveries,
            redelivery_delay: self.redelivery_delay,
            claim_idle: self.claim_idle,
            next_claim_at: Instant::now(),
            attempts: HashMap::new(),
            handler,
        };

        info!(queue = %queue, group = %self.group, consumer = %self.consumer, "redis consumer started");
        Ok(SubscriptionHandle::spawn(queue, move |shutdown| consumer.run(shutdown)))
    }
}

/// State of one running consumer loop.
struct StreamConsumer<M> {
    conn: MultiplexedConnection,
    queue: String,
    group: String,
    consumer: String,
    max_deliveries: u32,
    redelivery_delay: Duration,
    claim_idle: Duration,
    next_claim_at: Instant,
    /// Failed attempts per pending message id.
    attempts: HashMap<String, u32>,
    handler: Arc<dyn MessageHandler<M>>,
}

impl<M> StreamConsumer<M>
where
    M: DeserializeOwned + Send + Sync + 'static,
{
    async fn run(mut self, shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let entries = match self.next_batch().await {
                Ok(entries) => entries,
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "failed to read from stream");
                    tokio::time::sleep(self.redelivery_delay).await;
                    continue;
                }
            };

            for entry in entries {
                if let Err(e) = self.process(entry).await {
                    error!(queue = %self.queue, error = %e, "failed to settle stream entry");
                }
            }
        }

        debug!(queue = %self.queue, "redis consumer stopped");
    }

    /// Own nacked entries take priority over claimed and new ones.
    async fn next_batch(&mut self) -> Result<Vec<StreamId>, RedisStreamsError> {
        let pending = self.read("0", None).await?;
        if !pending.is_empty() {
            tokio::time::sleep(self.redelivery_delay).await;
            return Ok(pending);
        }

        if Instant::now() >= self.next_claim_at {
            self.next_claim_at = Instant::now() + self.claim_idle;
            match self.claim_stale().await {
                Ok(claimed) if !claimed.is_empty() => return Ok(claimed),
                Ok(_) => {}
                Err(e) => warn!(queue = %self.queue, error = %e, "failed to claim stale entries"),
            }
        }

        self.read(">", Some(DEFAULT_BLOCK_MS)).await
    }

    /// Take over entries another consumer left pending for at least `claim_idle`.
    async fn claim_stale(&mut self) -> Result<Vec<StreamId>, RedisStreamsError> {
        let summary: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.queue)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(CLAIM_SCAN)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XPENDING failed: {e}")))?;

        let pending: Vec<PendingEntry> = summary.into_iter().map(PendingEntry::from).collect();
        let stale = claimable(&pending, &self.consumer, self.claim_idle);
        if stale.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<&str> = stale.iter().map(|p| p.id.as_str()).collect();
        let min_idle_ms = u64::try_from(self.claim_idle.as_millis()).unwrap_or(u64::MAX);
        let reply: StreamClaimReply = self
            .conn
            .xclaim(&self.queue, &self.group, &self.consumer, min_idle_ms, &ids[..])
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {e}")))?;

        // XCLAIM re-checks idleness, so only some of `stale` may have moved.
        for claimed in &reply.ids {
            if let Some(entry) = stale.iter().find(|p| p.id == claimed.id) {
                self.attempts
                    .insert(claimed.id.clone(), prior_attempts(entry.times_delivered));
            }
        }

        info!(
            queue = %self.queue,
            claimed = reply.ids.len(),
            "claimed stale entries from other consumers"
        );
        Ok(reply.ids)
    }

    async fn read(&mut self, start: &str, block_ms: Option<usize>) -> Result<Vec<StreamId>, RedisStreamsError> {
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(READ_BATCH);
        if let Some(ms) = block_ms {
            opts = opts.block(ms);
        }

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[self.queue.as_str()], &[start], &opts)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }

    async fn process(&mut self, entry: StreamId) -> Result<(), RedisStreamsError> {
        let Some(payload) = entry.get::<String>("payload") else {
            // Trimmed or malformed entry: nothing to deliver.
            warn!(queue = %self.queue, message_id = %entry.id, "stream entry without payload; acknowledging");
            return self.ack(&entry.id).await;
        };

        let message: M = match serde_json::from_str(&payload) {
            Ok(m) => m,
            Err(e) => {
                let reason = format!("undecodable payload: {e}");
                return self.dead_letter(&entry.id, &payload, 1, &reason).await;
            }
        };

        let attempt = self.attempts.get(&entry.id).copied().unwrap_or(0) + 1;
        let delivery = Delivery::new(entry.id.clone(), attempt, message);

        match self.handler.handle(delivery).await {
            Ok(()) => {
                self.attempts.remove(&entry.id);
                self.ack(&entry.id).await
            }
            Err(err) if attempt >= self.max_deliveries => {
                self.attempts.remove(&entry.id);
                self.dead_letter(&entry.id, &payload, attempt, err.message()).await
            }
            Err(err) => {
                warn!(
                    queue = %self.queue,
                    message_id = %entry.id,
                    attempt,
                    error = %err,
                    "handler rejected message; left pending for redelivery"
                );
                self.attempts.insert(entry.id, attempt);
                Ok(())
            }
        }
    }

    async fn ack(&mut self, message_id: &str) -> Result<(), RedisStreamsError> {
        let _: u64 = self
            .conn
            .xack(&self.queue, &self.group, &[message_id])
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    async fn dead_letter(
        &mut self,
        message_id: &str,
        payload: &str,
        attempts: u32,
        last_error: &str,
    ) -> Result<(), RedisStreamsError> {
        let dlq = dead_letter_queue(&self.queue);
        let attempts_field = attempts.to_string();
        let failed_at = chrono::Utc::now().to_rfc3339();

        let _: String = self
            .conn
            .xadd(
                &dlq,
                "*",
                &[
                    ("original_message_id", message_id),
                    ("attempts", attempts_field.as_str()),
                    ("last_error", last_error),
                    ("failed_at", failed_at.as_str()),
                    ("payload", payload),
                ],
            )
            .await
            .map_err(|e| RedisStreamsError::Command(format!("DLQ XADD failed: {e}")))?;

        error!(
            queue = %self.queue,
            message_id = %message_id,
            attempts,
            error = %last_error,
            "message sent to dead-letter queue"
        );

        self.ack(message_id).await
    }
}

/// One row of the group-wide `XPENDING` summary.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingEntry {
    id: String,
    consumer: String,
    idle: Duration,
    times_delivered: u64,
}

impl From<(String, String, u64, u64)> for PendingEntry {
    fn from((id, consumer, idle_ms, times_delivered): (String, String, u64, u64)) -> Self {
        Self {
            id,
            consumer,
            idle: Duration::from_millis(idle_ms),
            times_delivered,
        }
    }
}

/// Entries held by other consumers that have been idle for at least `min_idle`.
fn claimable<'a>(pending: &'a [PendingEntry], own: &str, min_idle: Duration) -> Vec<&'a PendingEntry> {
    pending
        .iter()
        .filter(|p| p.consumer != own && p.idle >= min_idle)
        .collect()
}

/// Failed attempts already spent on an entry, from the group's delivery counter.
fn prior_attempts(times_delivered: u64) -> u32 {
    u32::try_from(times_delivered).unwrap_or(u32::MAX)
}
