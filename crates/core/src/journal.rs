//! Journal entry record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{JournalId, OwnerId};

/// A persisted journal entry.
///
/// Every entry has exactly one owner for its whole lifetime; entries are never
/// shared, reassigned or deleted individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: JournalId,
    pub owner_id: OwnerId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A journal entry that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJournalEntry {
    pub owner_id: OwnerId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewJournalEntry {
    /// Build a new entry with both timestamps set to `now`.
    pub fn stamped(owner_id: OwnerId, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the store-assigned id.
    pub fn with_id(self, id: JournalId) -> JournalEntry {
        JournalEntry {
            id,
            owner_id: self.owner_id,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl JournalEntry {
    pub fn is_owned_by(&self, owner_id: &OwnerId) -> bool {
        &self.owner_id == owner_id
    }
}
