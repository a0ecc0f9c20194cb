//! Message-broker client abstraction (mechanics only).
//!
//! Consumers register a [`MessageHandler`] against a named queue. The broker
//! calls the handler once per delivery and translates the outcome:
//!
//! - `Ok(())` acknowledges the message (it will not be delivered again)
//! - `Err(HandlerError)` is a negative acknowledgment (the message is redelivered)
//!
//! ## Delivery Guarantees
//!
//! Delivery is **at-least-once**: a message may reach the handler several times
//! (nack, consumer crash before ack, broker failover). Handlers must therefore be
//! idempotent. After `max_deliveries` failed attempts a message is moved to the
//! queue's dead-letter queue (see [`dead_letter_queue`]) and acknowledged, so a
//! poison message cannot block the queue forever.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default number of delivery attempts before a message is dead-lettered.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Name of the dead-letter queue paired with `queue`.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}.dlq")
}

/// One delivery of a message to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery<M> {
    message_id: String,
    attempt: u32,
    message: M,
}

impl<M> Delivery<M> {
    pub fn new(message_id: impl Into<String>, attempt: u32, message: M) -> Self {
        Self {
            message_id: message_id.into(),
            attempt,
            message,
        }
    }

    /// Broker-assigned message id (stable across redeliveries).
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// 1-based delivery attempt; values above 1 are redeliveries.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }

    pub fn message(&self) -> &M {
        &self.message
    }
}

/// Handler failure; the broker treats it as a negative acknowledgment.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Wrap any error, keeping its display text.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        Self(err.to_string())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// A message that exhausted its delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter<M> {
    pub message_id: String,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
    pub message: M,
}

/// Handles messages delivered from one queue.
///
/// Implementations must be idempotent (at-least-once delivery).
#[async_trait]
pub trait MessageHandler<M>: Send + Sync {
    async fn handle(&self, delivery: Delivery<M>) -> Result<(), HandlerError>;
}

#[async_trait]
impl<M, H> MessageHandler<M> for Arc<H>
where
    M: Send + 'static,
    H: MessageHandler<M> + ?Sized,
{
    async fn handle(&self, delivery: Delivery<M>) -> Result<(), HandlerError> {
        (**self).handle(delivery).await
    }
}

/// Broker client: publish to and subscribe handlers on named queues.
#[async_trait]
pub trait BrokerClient<M>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn publish(&self, queue: &str, message: M) -> Result<(), Self::Error>;

    /// Register `handler` as the consumer of `queue`.
    ///
    /// The returned handle keeps the consumer loop running until
    /// [`SubscriptionHandle::shutdown`] is called.
    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler<M>>,
    ) -> Result<SubscriptionHandle, Self::Error>;
}

#[async_trait]
impl<M, B> BrokerClient<M> for Arc<B>
where
    M: Send + 'static,
    B: BrokerClient<M> + ?Sized,
{
    type Error = B::Error;

    async fn publish(&self, queue: &str, message: M) -> Result<(), Self::Error> {
        (**self).publish(queue, message).await
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler<M>>,
    ) -> Result<SubscriptionHandle, Self::Error> {
        (**self).subscribe(queue, handler).await
    }
}

/// Handle to stop and join a running consumer loop.
#[derive(Debug)]
pub struct SubscriptionHandle {
    queue: String,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Spawn `run` as the consumer loop; it receives a shutdown signal receiver.
    pub fn spawn<F, Fut>(queue: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run(shutdown_rx));

        Self {
            queue: queue.into(),
            shutdown,
            join: Some(join),
        }
    }

    /// Request graceful shutdown and wait for the consumer loop to stop.
    pub async fn shutdown(mut self) {
        debug!(queue = %self.queue, "stopping consumer");
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
