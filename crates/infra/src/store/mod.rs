//! Journal storage boundary.
//!
//! `JournalStore` is the single source of truth for journal entries. Reads and
//! single-row inserts are self-contained; the only multi-row write (bulk delete
//! by owner) goes through an explicit [`JournalTransaction`] so callers decide
//! when it commits or rolls back.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use journal_core::{JournalEntry, JournalId, NewJournalEntry, OwnerId, PageRequest};

pub use in_memory::InMemoryJournalStore;
pub use postgres::PostgresJournalStore;

/// Storage operation error.
///
/// These are **infrastructure errors**; none of them is ever swallowed by the
/// services. "Not found" is not an error at this layer (`Option` is used).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Connectivity problems, pool exhaustion, timeouts.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the write (constraint violation).
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Begin/commit/rollback failed.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Any other backend failure (e.g. undecodable row).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable keyed storage for journal entries.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Persist a new entry; the store assigns its id.
    async fn insert(&self, entry: NewJournalEntry) -> Result<JournalEntry, StoreError>;

    async fn get_by_id(&self, id: JournalId) -> Result<Option<JournalEntry>, StoreError>;

    /// All entries of one owner, in no particular order.
    async fn list_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<JournalEntry>, StoreError>;

    /// One window of an owner's entries ordered by `created_at` DESC, `id` DESC,
    /// together with the owner's total entry count.
    async fn list_by_owner_ordered_paged(
        &self,
        owner_id: &OwnerId,
        request: PageRequest,
    ) -> Result<(Vec<JournalEntry>, u64), StoreError>;

    /// Acquire a transaction handle for multi-row writes.
    async fn begin(&self) -> Result<Box<dyn JournalTransaction>, StoreError>;
}

/// Scoped write transaction.
///
/// Work done through the handle becomes visible only on [`commit`](Self::commit).
/// Dropping the handle without committing discards the work.
#[async_trait]
pub trait JournalTransaction: Send {
    /// Delete every entry of `owner_id`; returns the number of rows staged
    /// for removal by this transaction.
    async fn delete_by_owner(&mut self, owner_id: &OwnerId) -> Result<u64, StoreError>;

    /// Apply the work. Returns the number of rows this commit actually
    /// removed, which excludes rows a concurrent transaction removed first.
    async fn commit(self: Box<Self>) -> Result<u64, StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> JournalStore for Arc<S>
where
    S: JournalStore + ?Sized,
{
    async fn insert(&self, entry: NewJournalEntry) -> Result<JournalEntry, StoreError> {
        (**self).insert(entry).await
    }

    async fn get_by_id(&self, id: JournalId) -> Result<Option<JournalEntry>, StoreError> {
        (**self).get_by_id(id).await
    }

    async fn list_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<JournalEntry>, StoreError> {
        (**self).list_by_owner(owner_id).await
    }

    async fn list_by_owner_ordered_paged(
        &self,
        owner_id: &OwnerId,
        request: PageRequest,
    ) -> Result<(Vec<JournalEntry>, u64), StoreError> {
        (**self).list_by_owner_ordered_paged(owner_id, request).await
    }

    async fn begin(&self) -> Result<Box<dyn JournalTransaction>, StoreError> {
        (**self).begin().await
    }
}
