//! Ownership-scoped read path.
//!
//! Every query takes the caller's [`OwnerId`] and never returns an entry owned
//! by anyone else. Get-by-id answers `None` both for unknown ids and for ids
//! owned by another caller, so the two cases cannot be told apart.

use thiserror::Error;
use tracing::{debug, instrument};

use journal_core::{
    DomainError, JournalEntry, JournalId, OwnerId, Page, PageDescriptor, PageRequest,
};

use crate::store::{JournalStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Rejected before touching storage (e.g. non-positive page size).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DomainError> for QueryError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                QueryError::InvalidArgument(msg)
            }
        }
    }
}

/// Read-side service: unordered listing, ordered pages and get-by-id.
#[derive(Debug, Clone)]
pub struct JournalQueries<S> {
    store: S,
}

impl<S> JournalQueries<S>
where
    S: JournalStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// All entries of `owner_id`, in no particular order. Empty is not an error.
    #[instrument(skip(self), fields(owner_id = %owner_id), err)]
    pub async fn list(&self, owner_id: &OwnerId) -> Result<Vec<JournalEntry>, QueryError> {
        Ok(self.store.list_by_owner(owner_id).await?)
    }

    /// One page of `owner_id`'s entries, newest first.
    ///
    /// `page` is zero-based; `size` must be positive. Invalid input fails with
    /// [`QueryError::InvalidArgument`] without a storage round-trip.
    #[instrument(skip(self), fields(owner_id = %owner_id), err)]
    pub async fn page(
        &self,
        owner_id: &OwnerId,
        page: i64,
        size: i64,
    ) -> Result<Page<JournalEntry>, QueryError> {
        let request = PageRequest::new(page, size)?;
        self.page_with(owner_id, request).await
    }

    /// Same as [`page`](Self::page) for an already validated request.
    pub async fn page_with(
        &self,
        owner_id: &OwnerId,
        request: PageRequest,
    ) -> Result<Page<JournalEntry>, QueryError> {
        let (items, total) = self
            .store
            .list_by_owner_ordered_paged(owner_id, request)
            .await?;

        let descriptor = PageDescriptor::compute(request, total);
        debug!(
            returned = items.len(),
            total_items = total,
            total_pages = descriptor.total_pages,
            "paged query"
        );
        Ok(Page::new(items, descriptor))
    }

    /// The entry with `id`, if it exists and belongs to `owner_id`.
    #[instrument(skip(self), fields(owner_id = %owner_id, journal_id = %id), err)]
    pub async fn get(
        &self,
        owner_id: &OwnerId,
        id: JournalId,
    ) -> Result<Option<JournalEntry>, QueryError> {
        let entry = self.store.get_by_id(id).await?;
        Ok(entry.filter(|e| e.is_owned_by(owner_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryJournalStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use journal_core::NewJournalEntry;
    use proptest::prelude::*;

    fn owner(s: &str) -> OwnerId {
        OwnerId::new(s).unwrap()
    }

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(offset_secs)
    }

    async fn seed(store: &InMemoryJournalStore, who: &str, at: DateTime<Utc>) -> JournalEntry {
        store
            .insert(NewJournalEntry::stamped(owner(who), "entry", at))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_page_of_two_holds_newest_entry() {
        let store = InMemoryJournalStore::new();
        seed(&store, "u1", t(0)).await;
        let newer = seed(&store, "u1", t(60)).await;
        let queries = JournalQueries::new(store);

        let page = queries.page(&owner("u1"), 0, 1).await.unwrap();

        assert_eq!(page.items, vec![newer]);
        assert_eq!(page.descriptor.total_pages, 2);
        assert_eq!(page.descriptor.total_items, 2);
        assert!(page.descriptor.has_next);
        assert!(!page.descriptor.has_previous);
    }

    #[tokio::test]
    async fn page_beyond_the_last_is_empty_without_next() {
        let store = InMemoryJournalStore::new();
        seed(&store, "u1", t(0)).await;
        let queries = JournalQueries::new(store);

        let page = queries.page(&owner("u1"), 5, 10).await.unwrap();

        assert!(page.items.is_empty());
        assert!(!page.descriptor.has_next);
        assert!(page.descriptor.has_previous);
        assert_eq!(page.descriptor.total_pages, 1);
    }

    #[tokio::test]
    async fn empty_owner_has_zero_pages() {
        let queries = JournalQueries::new(InMemoryJournalStore::new());

        let page = queries.page(&owner("nobody"), 0, 10).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.descriptor.total_pages, 0);
        assert!(!page.descriptor.has_next);
        assert!(queries.list(&owner("nobody")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_positive_size_is_invalid_argument() {
        let queries = JournalQueries::new(InMemoryJournalStore::new());

        for size in [0, -3] {
            let err = queries.page(&owner("u1"), 0, size).await.unwrap_err();
            assert!(matches!(err, QueryError::InvalidArgument(_)));
        }
        let err = queries.page(&owner("u1"), -1, 10).await.unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[test]
    fn only_input_errors_map_to_invalid_argument() {
        let from_validation = QueryError::from(DomainError::validation("page size must be positive"));
        let from_id = QueryError::from(DomainError::invalid_id("JournalId: abc"));

        assert_eq!(
            from_validation,
            QueryError::InvalidArgument("page size must be positive".to_string())
        );
        assert_eq!(from_id, QueryError::InvalidArgument("JournalId: abc".to_string()));
    }

    #[tokio::test]
    async fn missing_entry_is_absent_not_an_error() {
        let queries = JournalQueries::new(InMemoryJournalStore::new());
        let found = queries.get(&owner("u1"), JournalId::from_i64(1)).await;
        assert_eq!(found, Ok(None));
    }

    #[tokio::test]
    async fn foreign_entry_is_indistinguishable_from_missing() {
        let store = InMemoryJournalStore::new();
        let theirs = seed(&store, "u2", t(0)).await;
        let queries = JournalQueries::new(store);

        let foreign = queries.get(&owner("u1"), theirs.id).await.unwrap();
        let missing = queries.get(&owner("u1"), JournalId::from_i64(404)).await.unwrap();

        assert_eq!(foreign, None);
        assert_eq!(foreign, missing);
        assert_eq!(queries.get(&owner("u2"), theirs.id).await.unwrap(), Some(theirs));
    }

    #[tokio::test]
    async fn owners_never_see_each_others_entries() {
        let store = InMemoryJournalStore::new();
        for i in 0..3 {
            seed(&store, "alice", t(i)).await;
            seed(&store, "bob", t(i)).await;
        }
        let queries = JournalQueries::new(store);

        let alice = owner("alice");
        let listed = queries.list(&alice).await.unwrap();
        let paged = queries.page(&alice, 0, 100).await.unwrap();

        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|e| e.is_owned_by(&alice)));
        assert_eq!(paged.items.len(), 3);
        assert!(paged.items.iter().all(|e| e.is_owned_by(&alice)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn pages_concatenate_to_the_ordered_result_set(
            offsets in proptest::collection::vec(0i64..20, 0..25),
            size in 1i64..7,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryJournalStore::new();
                for off in &offsets {
                    seed(&store, "u1", t(*off)).await;
                    seed(&store, "noise", t(*off)).await;
                }
                let queries = JournalQueries::new(store.clone());
                let me = owner("u1");

                let first = queries.page(&me, 0, size).await.unwrap();
                let total_pages = first.descriptor.total_pages as i64;

                let mut collected = Vec::new();
                for p in 0..total_pages {
                    let page = queries.page(&me, p, size).await.unwrap();
                    prop_assert_eq!(page.items.len() as u64, page.descriptor.expected_len());
                    prop_assert_eq!(page.descriptor.has_next, p + 1 < total_pages);
                    prop_assert_eq!(page.descriptor.has_previous, p > 0);
                    collected.extend(page.items);
                }

                let mut expected = queries.list(&me).await.unwrap();
                expected.sort_by(|a, b| {
                    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
                });
                prop_assert_eq!(collected, expected);
                Ok(())
            })?;
        }
    }
}
