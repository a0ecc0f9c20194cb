use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use journal_core::{JournalEntry, Page, PageDescriptor};

/// Page size used when the request does not name one.
pub const DEFAULT_PAGE_SIZE: i64 = 10;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateJournalRequest {
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl PageParams {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(0)
    }

    pub fn size(&self) -> i64 {
        self.size.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalResponse {
    pub id: i64,
    pub owner_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JournalEntry> for JournalResponse {
    fn from(e: JournalEntry) -> Self {
        Self {
            id: e.id.as_i64(),
            owner_id: e.owner_id.as_str().to_string(),
            content: e.content,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateJournalResponse {
    #[serde(flatten)]
    pub journal: JournalResponse,
    pub message: &'static str,
}

impl CreateJournalResponse {
    pub fn created(entry: JournalEntry) -> Self {
        Self {
            journal: entry.into(),
            message: "Journal created successfully",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginatedJournalResponse {
    pub journals: Vec<JournalResponse>,
    #[serde(flatten)]
    pub descriptor: PageDescriptor,
}

impl From<Page<JournalEntry>> for PaginatedJournalResponse {
    fn from(page: Page<JournalEntry>) -> Self {
        let page = page.map(JournalResponse::from);
        Self {
            journals: page.items,
            descriptor: page.descriptor,
        }
    }
}
