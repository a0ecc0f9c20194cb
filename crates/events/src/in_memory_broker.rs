//! In-memory message broker for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::broker::{
    BrokerClient, DEFAULT_MAX_DELIVERIES, DeadLetter, Delivery, MessageHandler, SubscriptionHandle,
};

#[derive(Debug, Error)]
pub enum InMemoryBrokerError {
    /// Internal lock poisoning.
    #[error("broker state poisoned")]
    Poisoned,

    /// Only one consumer may be registered per queue.
    #[error("queue '{0}' already has a consumer")]
    AlreadySubscribed(String),

    /// The consumer side of the queue is gone.
    #[error("queue '{0}' is closed")]
    Closed(String),
}

#[derive(Debug)]
struct Queued<M> {
    message_id: String,
    message: M,
}

#[derive(Debug)]
struct QueueState<M> {
    tx: mpsc::UnboundedSender<Queued<M>>,
    rx: Option<mpsc::UnboundedReceiver<Queued<M>>>,
    dead_letters: Vec<DeadLetter<M>>,
}

impl<M> QueueState<M> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            dead_letters: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Inner<M> {
    queues: Mutex<HashMap<String, QueueState<M>>>,
    next_id: AtomicU64,
    max_deliveries: u32,
    redelivery_delay: Duration,
}

/// In-memory broker with named queues.
///
/// - Messages published before a consumer subscribes are buffered
/// - A failed handler call is a nack: the message is redelivered after
///   `redelivery_delay`, up to `max_deliveries` attempts
/// - Exhausted messages are kept as dead letters (see [`InMemoryBroker::dead_letters`])
#[derive(Debug)]
pub struct InMemoryBroker<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for InMemoryBroker<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M> Default for InMemoryBroker<M> {
    fn default() -> Self {
        Self::with_policy(DEFAULT_MAX_DELIVERIES, Duration::from_millis(10))
    }
}

impl<M> InMemoryBroker<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(max_deliveries: u32, redelivery_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                max_deliveries: max_deliveries.max(1),
                redelivery_delay,
            }),
        }
    }
}

impl<M: Clone> InMemoryBroker<M> {
    /// Messages that exhausted their delivery attempts on `queue`.
    pub fn dead_letters(&self, queue: &str) -> Vec<DeadLetter<M>> {
        match self.inner.queues.lock() {
            Ok(queues) => queues
                .get(queue)
                .map(|q| q.dead_letters.clone())
                .unwrap_or_default(),
            Err(_) => vec![],
        }
    }
}

impl<M> Inner<M> {
    /// Hand the receiver back so unconsumed messages stay queued for the next subscriber.
    fn release(&self, queue: &str, rx: mpsc::UnboundedReceiver<Queued<M>>) {
        match self.queues.lock() {
            Ok(mut queues) => {
                if let Some(state) = queues.get_mut(queue) {
                    state.rx = Some(rx);
                }
            }
            Err(_) => error!(queue = %queue, "broker state poisoned; queued messages dropped"),
        }
    }

    fn dead_letter(&self, queue: &str, letter: DeadLetter<M>) {
        if let Ok(mut queues) = self.queues.lock() {
            queues
                .entry(queue.to_string())
                .or_insert_with(QueueState::new)
                .dead_letters
                .push(letter);
        }
    }
}

#[async_trait]
impl<M> BrokerClient<M> for InMemoryBroker<M>
where
    M: Clone + Send + Sync + 'static,
{
    type Error = InMemoryBrokerError;

    async fn publish(&self, queue: &str, message: M) -> Result<(), Self::Error> {
        let message_id = format!("mem-{}", self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        let mut queues = self
            .inner
            .queues
            .lock()
            .map_err(|_| InMemoryBrokerError::Poisoned)?;

        queues
            .entry(queue.to_string())
            .or_insert_with(QueueState::new)
            .tx
            .send(Queued { message_id, message })
            .map_err(|_| InMemoryBrokerError::Closed(queue.to_string()))
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler<M>>,
    ) -> Result<SubscriptionHandle, Self::Error> {
        let rx = {
            let mut queues = self
                .inner
                .queues
                .lock()
                .map_err(|_| InMemoryBrokerError::Poisoned)?;

            queues
                .entry(queue.to_string())
                .or_insert_with(QueueState::new)
                .rx
                .take()
                .ok_or_else(|| InMemoryBrokerError::AlreadySubscribed(queue.to_string()))?
        };

        let inner = self.inner.clone();
        let queue_name = queue.to_string();
        Ok(SubscriptionHandle::spawn(queue, move |shutdown| {
            consume_loop(inner, queue_name, rx, handler, shutdown)
        }))
    }
}

async fn consume_loop<M>(
    inner: Arc<Inner<M>>,
    queue: String,
    mut rx: mpsc::UnboundedReceiver<Queued<M>>,
    handler: Arc<dyn MessageHandler<M>>,
    mut shutdown: watch::Receiver<bool>,
) where
    M: Clone + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = rx.recv() => match next {
                Some(queued) => deliver(&inner, &queue, handler.as_ref(), queued).await,
                None => break,
            },
        }
    }

    inner.release(&queue, rx);
    debug!(queue = %queue, "in-memory consumer stopped");
}

async fn deliver<M>(inner: &Inner<M>, queue: &str, handler: &dyn MessageHandler<M>, queued: Queued<M>)
where
    M: Clone + Send + Sync + 'static,
{
    let mut attempt = 1;
    loop {
        let delivery = Delivery::new(queued.message_id.clone(), attempt, queued.message.clone());
        match handler.handle(delivery).await {
            Ok(()) => {
                debug!(queue = %queue, message_id = %queued.message_id, attempt, "message acknowledged");
                return;
            }
            Err(err) if attempt >= inner.max_deliveries => {
                error!(
                    queue = %queue,
                    message_id = %queued.message_id,
                    attempts = attempt,
                    error = %err,
                    "message exhausted delivery attempts; dead-lettered"
                );
                inner.dead_letter(
                    queue,
                    DeadLetter {
                        message_id: queued.message_id,
                        attempts: attempt,
                        last_error: err.to_string(),
                        failed_at: Utc::now(),
                        message: queued.message,
                    },
                );
                return;
            }
            Err(err) => {
                warn!(
                    queue = %queue,
                    message_id = %queued.message_id,
                    attempt,
                    error = %err,
                    "handler rejected message; scheduling redelivery"
                );
                tokio::time::sleep(inner.redelivery_delay).await;
                attempt += 1;
            }
        }
    }
}
