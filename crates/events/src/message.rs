//! Messages published by other services and consumed here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use journal_core::OwnerId;

/// Default name of the queue carrying account-deletion notifications.
pub const ACCOUNT_DELETION_QUEUE: &str = "journal.account-deletion";

/// Notification that a user account was deleted upstream.
///
/// Transient: never persisted by this service. Consuming it is idempotent, so
/// a redelivered copy for an owner whose entries are already gone is a no-op.
///
/// Wire format (JSON):
///
/// ```json
/// { "ownerId": "u1", "occurredAt": "2024-05-01T12:00:00Z", "reason": "GDPR request" }
/// ```
///
/// `userKeycloakId` is accepted in place of `ownerId`, and `occurredAt` may be
/// a zone-less timestamp (read as UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDeletionEvent {
    #[serde(alias = "userKeycloakId")]
    pub owner_id: OwnerId,
    #[serde(deserialize_with = "lenient_utc::deserialize")]
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
}

impl AccountDeletionEvent {
    pub fn new(owner_id: OwnerId, occurred_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            owner_id,
            occurred_at,
            reason: reason.into(),
        }
    }
}

mod lenient_utc {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, de::Error};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;

        if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(dt.with_timezone(&Utc));
        }

        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| D::Error::custom(format!("invalid occurredAt '{raw}': {e}")))
    }
}
