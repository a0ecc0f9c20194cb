//! Integration tests for the full deletion pipeline.
//!
//! Tests: Creator → Store ← Consumer ← Broker, observed through Queries
//!
//! Verifies:
//! - A published deletion event erases exactly the deleted owner's entries
//! - Redelivered events converge without errors
//! - A persistently failing store dead-letters the event and keeps the data

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use journal_core::{JournalEntry, JournalId, NewJournalEntry, OwnerId, PageRequest};
    use journal_events::{AccountDeletionEvent, BrokerClient, InMemoryBroker, dead_letter_queue};

    use crate::consumers::AccountDeletionConsumer;
    use crate::services::{JournalCreator, JournalQueries};
    use crate::store::{InMemoryJournalStore, JournalStore, JournalTransaction, StoreError};

    const QUEUE: &str = "journal.account-deletion";

    fn owner(s: &str) -> OwnerId {
        OwnerId::new(s).unwrap()
    }

    fn deletion(who: &str) -> AccountDeletionEvent {
        AccountDeletionEvent::new(owner(who), Utc::now(), "account closed")
    }

    /// Poll until `check` holds (the consumer runs on its own task).
    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..400 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[tokio::test]
    async fn deletion_event_erases_only_the_deleted_owner() {
        let store = Arc::new(InMemoryJournalStore::new());
        let creator = JournalCreator::new(store.clone());
        let queries = JournalQueries::new(store.clone());
        let broker: InMemoryBroker<AccountDeletionEvent> =
            InMemoryBroker::with_policy(3, Duration::from_millis(1));

        for i in 0..4 {
            creator.create(owner("leaving"), format!("note {i}")).await.unwrap();
        }
        let kept = creator.create(owner("staying"), "still here").await.unwrap();

        let sub = AccountDeletionConsumer::new(store.clone())
            .register(&broker, QUEUE)
            .await
            .unwrap();
        broker.publish(QUEUE, deletion("leaving")).await.unwrap();

        eventually(|| {
            let queries = queries.clone();
            async move { queries.list(&owner("leaving")).await.unwrap().is_empty() }
        })
        .await;

        let page = queries.page(&owner("leaving"), 0, 10).await.unwrap();
        assert_eq!(page.descriptor.total_items, 0);
        assert_eq!(page.descriptor.total_pages, 0);
        assert_eq!(
            queries.get(&owner("staying"), kept.id).await.unwrap(),
            Some(kept)
        );

        sub.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_events_converge_without_dead_letters() {
        let store = Arc::new(InMemoryJournalStore::new());
        let creator = JournalCreator::new(store.clone());
        let broker: InMemoryBroker<AccountDeletionEvent> =
            InMemoryBroker::with_policy(2, Duration::from_millis(1));

        creator.create(owner("u1"), "a").await.unwrap();
        creator.create(owner("u1"), "b").await.unwrap();

        let sub = AccountDeletionConsumer::new(store.clone())
            .register(&broker, QUEUE)
            .await
            .unwrap();
        for _ in 0..3 {
            broker.publish(QUEUE, deletion("u1")).await.unwrap();
        }
        // Sentinel: processed after the duplicates (single consumer, FIFO).
        creator.create(owner("sentinel"), "x").await.unwrap();
        broker.publish(QUEUE, deletion("sentinel")).await.unwrap();

        let watched = store.clone();
        eventually(move || {
            let watched = watched.clone();
            async move { watched.is_empty() }
        })
        .await;

        sub.shutdown().await;
        assert!(broker.dead_letters(QUEUE).is_empty());
    }

    /// Store whose transactions can never commit.
    struct BrokenCommitStore(InMemoryJournalStore);

    struct BrokenCommit(Box<dyn JournalTransaction>);

    #[async_trait]
    impl JournalStore for BrokenCommitStore {
        async fn insert(&self, entry: NewJournalEntry) -> Result<JournalEntry, StoreError> {
            self.0.insert(entry).await
        }

        async fn get_by_id(&self, id: JournalId) -> Result<Option<JournalEntry>, StoreError> {
            self.0.get_by_id(id).await
        }

        async fn list_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<JournalEntry>, StoreError> {
            self.0.list_by_owner(owner_id).await
        }

        async fn list_by_owner_ordered_paged(
            &self,
            owner_id: &OwnerId,
            request: PageRequest,
        ) -> Result<(Vec<JournalEntry>, u64), StoreError> {
            self.0.list_by_owner_ordered_paged(owner_id, request).await
        }

        async fn begin(&self) -> Result<Box<dyn JournalTransaction>, StoreError> {
            Ok(Box::new(BrokenCommit(self.0.begin().await?)))
        }
    }

    #[async_trait]
    impl JournalTransaction for BrokenCommit {
        async fn delete_by_owner(&mut self, owner_id: &OwnerId) -> Result<u64, StoreError> {
            self.0.delete_by_owner(owner_id).await
        }

        async fn commit(self: Box<Self>) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("database went away".to_string()))
        }

        async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            self.0.rollback().await
        }
    }

    #[tokio::test]
    async fn persistent_failure_dead_letters_and_keeps_entries() {
        let inner = InMemoryJournalStore::new();
        inner
            .insert(NewJournalEntry::stamped(owner("u1"), "keep me", Utc::now()))
            .await
            .unwrap();
        let broker: InMemoryBroker<AccountDeletionEvent> =
            InMemoryBroker::with_policy(3, Duration::from_millis(1));

        let sub = AccountDeletionConsumer::new(BrokenCommitStore(inner.clone()))
            .register(&broker, QUEUE)
            .await
            .unwrap();
        broker.publish(QUEUE, deletion("u1")).await.unwrap();

        let watched = broker.clone();
        eventually(move || {
            let watched = watched.clone();
            async move { !watched.dead_letters(QUEUE).is_empty() }
        })
        .await;

        let dead = broker.dead_letters(QUEUE);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].message.owner_id, owner("u1"));
        assert!(dead[0].last_error.contains("database went away"));
        assert_eq!(inner.len(), 1);
        assert_eq!(dead_letter_queue(QUEUE), "journal.account-deletion.dlq");

        sub.shutdown().await;
    }
}
