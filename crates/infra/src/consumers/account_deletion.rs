//! Account-deletion consumer.
//!
//! Erases every journal entry of a deleted account. Delivery is at-least-once,
//! so the handler must be idempotent: deleting an owner whose entries are
//! already gone is a successful no-op (0 rows).
//!
//! ## Transaction Boundary
//!
//! ```text
//! begin → delete_by_owner → commit        (Ok: broker acks)
//!           ↓ error            ↓ error
//!         rollback ←───────────┘          (Err: broker redelivers)
//! ```
//!
//! A failure never leaves a partial delete behind and is never swallowed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use journal_events::{
    AccountDeletionEvent, BrokerClient, Delivery, HandlerError, MessageHandler, SubscriptionHandle,
};

use crate::store::{JournalStore, StoreError};

/// Consumes [`AccountDeletionEvent`]s and bulk-deletes the owner's entries.
#[derive(Debug, Clone)]
pub struct AccountDeletionConsumer<S> {
    store: S,
}

impl<S> AccountDeletionConsumer<S>
where
    S: JournalStore + 'static,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Delete all entries of the event's owner inside one transaction.
    ///
    /// Returns the number of rows this call removed.
    #[instrument(skip(self, event), fields(owner_id = %event.owner_id))]
    pub async fn process(&self, event: &AccountDeletionEvent) -> Result<u64, StoreError> {
        info!(
            "Received account deletion event for user: {} - Reason: {}",
            event.owner_id, event.reason
        );

        match self.delete_all(event).await {
            Ok(deleted) => {
                info!("Deleted {} journal entries for user", deleted);
                info!(
                    "Successfully processed account deletion for user: {} in Journal Service",
                    event.owner_id
                );
                Ok(deleted)
            }
            Err(e) => {
                error!(
                    error = %e,
                    "Failed to process account deletion event for user: {}", event.owner_id
                );
                Err(e)
            }
        }
    }

    async fn delete_all(&self, event: &AccountDeletionEvent) -> Result<u64, StoreError> {
        let mut tx = self.store.begin().await?;

        if let Err(e) = tx.delete_by_owner(&event.owner_id).await {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback after failed delete also failed");
            }
            return Err(e);
        }

        // A failed commit leaves nothing applied. The commit count excludes
        // rows a concurrent deletion removed first.
        tx.commit().await
    }

    /// Subscribe this consumer to `queue` on `broker`.
    pub async fn register<B>(self, broker: &B, queue: &str) -> Result<SubscriptionHandle, B::Error>
    where
        B: BrokerClient<AccountDeletionEvent>,
    {
        let handler: Arc<dyn MessageHandler<AccountDeletionEvent>> = Arc::new(self);
        let handle = broker.subscribe(queue, handler).await?;
        info!(queue = %queue, "account deletion consumer registered");
        Ok(handle)
    }
}

#[async_trait]
impl<S> MessageHandler<AccountDeletionEvent> for AccountDeletionConsumer<S>
where
    S: JournalStore + 'static,
{
    async fn handle(&self, delivery: Delivery<AccountDeletionEvent>) -> Result<(), HandlerError> {
        if delivery.is_redelivery() {
            warn!(
                message_id = %delivery.message_id(),
                attempt = delivery.attempt(),
                "redelivered account deletion event"
            );
        }

        self.process(delivery.message())
            .await
            .map(|_| ())
            .map_err(|e| HandlerError::from_error(&e))
    }
}
