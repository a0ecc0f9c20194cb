use chrono::Utc;
use tracing::instrument;

use journal_core::{JournalEntry, NewJournalEntry, OwnerId};

use crate::store::{JournalStore, StoreError};

/// Builds and persists new journal entries.
#[derive(Debug, Clone)]
pub struct JournalCreator<S> {
    store: S,
}

impl<S> JournalCreator<S>
where
    S: JournalStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Stamp both timestamps with the current time and persist the entry.
    ///
    /// Storage failures propagate unchanged.
    #[instrument(skip(self, content), fields(owner_id = %owner_id), err)]
    pub async fn create(
        &self,
        owner_id: OwnerId,
        content: impl Into<String> + Send,
    ) -> Result<JournalEntry, StoreError> {
        let entry = NewJournalEntry::stamped(owner_id, content, Utc::now());
        self.store.insert(entry).await
    }
}
