use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use journal_core::{JournalEntry, JournalId, NewJournalEntry, OwnerId, PageRequest};

use super::{JournalStore, JournalTransaction, StoreError};

#[derive(Debug, Default)]
struct Tables {
    rows: BTreeMap<JournalId, JournalEntry>,
    last_id: i64,
}

/// In-memory journal store.
///
/// Intended for tests/dev. Ids are assigned from a monotonically increasing
/// counter starting at 1. Transactions stage their deletes and apply them
/// under a single write lock on commit.
#[derive(Debug, Default, Clone)]
pub struct InMemoryJournalStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all owners.
    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// `created_at` DESC, then `id` DESC.
fn newest_first(a: &JournalEntry, b: &JournalEntry) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

#[async_trait]
impl JournalStore for InMemoryJournalStore {
    async fn insert(&self, entry: NewJournalEntry) -> Result<JournalEntry, StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.last_id += 1;
        let stored = entry.with_id(JournalId::from_i64(tables.last_id));
        tables.rows.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_by_id(&self, id: JournalId) -> Result<Option<JournalEntry>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.rows.get(&id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<JournalEntry>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .rows
            .values()
            .filter(|e| e.is_owned_by(owner_id))
            .cloned()
            .collect())
    }

    async fn list_by_owner_ordered_paged(
        &self,
        owner_id: &OwnerId,
        request: PageRequest,
    ) -> Result<(Vec<JournalEntry>, u64), StoreError> {
        let mut owned = self.list_by_owner(owner_id).await?;
        owned.sort_by(newest_first);

        let total = owned.len() as u64;
        let offset = usize::try_from(request.offset()).unwrap_or(usize::MAX);
        let window = owned
            .into_iter()
            .skip(offset)
            .take(request.size() as usize)
            .collect();

        Ok((window, total))
    }

    async fn begin(&self) -> Result<Box<dyn JournalTransaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            tables: self.tables.clone(),
            staged_deletes: BTreeSet::new(),
        }))
    }
}

/// Transaction over [`InMemoryJournalStore`]; deletes are staged until commit.
#[derive(Debug)]
pub struct InMemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    staged_deletes: BTreeSet<JournalId>,
}

#[async_trait]
impl JournalTransaction for InMemoryTransaction {
    async fn delete_by_owner(&mut self, owner_id: &OwnerId) -> Result<u64, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut removed = 0;
        for entry in tables.rows.values().filter(|e| e.is_owned_by(owner_id)) {
            if self.staged_deletes.insert(entry.id) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<u64, StoreError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::Transaction("lock poisoned on commit".to_string()))?;
        let removed = self
            .staged_deletes
            .iter()
            .filter(|id| tables.rows.remove(*id).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn owner(s: &str) -> OwnerId {
        OwnerId::new(s).unwrap()
    }

    fn at(minute: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, minute, 0).unwrap()
    }

    async fn seed(store: &InMemoryJournalStore, who: &str, minute: u32) -> JournalEntry {
        store
            .insert(NewJournalEntry::stamped(owner(who), format!("{who}@{minute}"), at(minute)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let store = InMemoryJournalStore::new();
        let a = seed(&store, "u1", 0).await;
        let b = seed(&store, "u1", 1).await;

        assert_eq!(a.id, JournalId::from_i64(1));
        assert_eq!(b.id, JournalId::from_i64(2));
        assert_eq!(store.get_by_id(a.id).await.unwrap(), Some(a));
        assert_eq!(store.get_by_id(JournalId::from_i64(99)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn paged_listing_orders_newest_first_with_id_tiebreak() {
        let store = InMemoryJournalStore::new();
        let old = seed(&store, "u1", 0).await;
        let tie_a = seed(&store, "u1", 5).await;
        let tie_b = seed(&store, "u1", 5).await;
        seed(&store, "u2", 9).await;

        let (items, total) = store
            .list_by_owner_ordered_paged(&owner("u1"), PageRequest::new(0, 10).unwrap())
            .await
            .unwrap();

        assert_eq!(total, 3);
        let ids: Vec<_> = items.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![tie_b.id, tie_a.id, old.id]);
    }

    #[tokio::test]
    async fn paged_listing_past_the_end_is_empty() {
        let store = InMemoryJournalStore::new();
        seed(&store, "u1", 0).await;

        let (items, total) = store
            .list_by_owner_ordered_paged(&owner("u1"), PageRequest::new(3, 2).unwrap())
            .await
            .unwrap();

        assert!(items.is_empty());
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn delete_is_invisible_until_commit() {
        let store = InMemoryJournalStore::new();
        seed(&store, "u1", 0).await;
        seed(&store, "u1", 1).await;
        seed(&store, "u2", 2).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.delete_by_owner(&owner("u1")).await.unwrap(), 2);
        assert_eq!(store.list_by_owner(&owner("u1")).await.unwrap().len(), 2);

        assert_eq!(tx.commit().await.unwrap(), 2);
        assert!(store.list_by_owner(&owner("u1")).await.unwrap().is_empty());
        assert_eq!(store.list_by_owner(&owner("u2")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_staged_deletes() {
        let store = InMemoryJournalStore::new();
        seed(&store, "u1", 0).await;

        let mut tx = store.begin().await.unwrap();
        tx.delete_by_owner(&owner("u1")).await.unwrap();
        tx.rollback().await.unwrap();

        let mut dropped = store.begin().await.unwrap();
        dropped.delete_by_owner(&owner("u1")).await.unwrap();
        drop(dropped);

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn repeated_delete_in_one_transaction_counts_once() {
        let store = InMemoryJournalStore::new();
        seed(&store, "u1", 0).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.delete_by_owner(&owner("u1")).await.unwrap(), 1);
        assert_eq!(tx.delete_by_owner(&owner("u1")).await.unwrap(), 0);
        tx.commit().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn interleaved_deletes_only_count_rows_they_removed() {
        let store = InMemoryJournalStore::new();
        seed(&store, "u1", 0).await;
        seed(&store, "u1", 1).await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert_eq!(first.delete_by_owner(&owner("u1")).await.unwrap(), 2);
        assert_eq!(second.delete_by_owner(&owner("u1")).await.unwrap(), 2);

        assert_eq!(first.commit().await.unwrap(), 2);
        assert_eq!(second.commit().await.unwrap(), 0);
        assert!(store.is_empty());
    }
}
