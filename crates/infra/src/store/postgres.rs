//! Postgres-backed journal store.
//!
//! Entries live in the `journals` table, indexed by `(owner_id, created_at DESC, id DESC)`
//! so both owner listings and the ordered paged query are index scans.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (integrity constraint) | `23xxx` | `Constraint` |
//! | Database (other) | Any other | `Backend` |
//! | PoolTimedOut / PoolClosed / Io / Tls | N/A | `Unavailable` |
//! | Other | N/A | `Backend` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use journal_core::{JournalEntry, JournalId, NewJournalEntry, OwnerId, PageRequest};

use super::{JournalStore, JournalTransaction, StoreError};

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS journals (
        id          BIGSERIAL PRIMARY KEY,
        owner_id    TEXT        NOT NULL CHECK (owner_id <> ''),
        content     TEXT        NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS journals_owner_created_idx
        ON journals (owner_id, created_at DESC, id DESC)
    "#,
];

/// Postgres-backed journal store.
///
/// Uses the SQLx connection pool (thread-safe, shared via `Arc`).
/// Every owner-scoped query carries `owner_id` in its WHERE clause.
#[derive(Debug, Clone)]
pub struct PostgresJournalStore {
    pool: Arc<PgPool>,
}

impl PostgresJournalStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the table and index if they do not exist yet (idempotent).
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl JournalStore for PostgresJournalStore {
    #[instrument(skip(self, entry), fields(owner_id = %entry.owner_id), err)]
    async fn insert(&self, entry: NewJournalEntry) -> Result<JournalEntry, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO journals (owner_id, content, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, owner_id, content, created_at, updated_at
            "#,
        )
        .bind(entry.owner_id.as_str())
        .bind(&entry.content)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        decode(&row)
    }

    #[instrument(skip(self), fields(journal_id = %id), err)]
    async fn get_by_id(&self, id: JournalId) -> Result<Option<JournalEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, content, created_at, updated_at
            FROM journals
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_by_id", e))?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self), fields(owner_id = %owner_id), err)]
    async fn list_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<JournalEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, content, created_at, updated_at
            FROM journals
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_owner", e))?;

        rows.iter().map(decode).collect()
    }

    #[instrument(
        skip(self),
        fields(
            owner_id = %owner_id,
            page = request.page(),
            size = request.size(),
            row_count = tracing::field::Empty
        ),
        err
    )]
    async fn list_by_owner_ordered_paged(
        &self,
        owner_id: &OwnerId,
        request: PageRequest,
    ) -> Result<(Vec<JournalEntry>, u64), StoreError> {
        // Count and window share one snapshot so the descriptor matches the slice.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Transaction(format!("begin failed: {e}")))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM journals WHERE owner_id = $1")
            .bind(owner_id.as_str())
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_by_owner", e))?;

        let offset = i64::try_from(request.offset()).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, content, created_at, updated_at
            FROM journals
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner_id.as_str())
        .bind(i64::from(request.size()))
        .bind(offset)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("list_by_owner_ordered_paged", e))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Transaction(format!("commit failed: {e}")))?;

        Span::current().record("row_count", rows.len());
        let entries = rows.iter().map(decode).collect::<Result<Vec<_>, _>>()?;
        Ok((entries, total.max(0) as u64))
    }

    async fn begin(&self) -> Result<Box<dyn JournalTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Transaction(format!("begin failed: {e}")))?;
        Ok(Box::new(PostgresJournalTransaction { tx, deleted: 0 }))
    }
}

/// A live database transaction. Dropping it without commit rolls back.
pub struct PostgresJournalTransaction {
    tx: Transaction<'static, Postgres>,
    deleted: u64,
}

#[async_trait]
impl JournalTransaction for PostgresJournalTransaction {
    #[instrument(skip(self), fields(owner_id = %owner_id), err)]
    async fn delete_by_owner(&mut self, owner_id: &OwnerId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM journals WHERE owner_id = $1")
            .bind(owner_id.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_by_owner", e))?;

        // Row locks are held until commit; a concurrent deleter blocks and then sees 0.
        self.deleted += result.rows_affected();
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<u64, StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Transaction(format!("commit failed: {e}")))?;
        Ok(self.deleted)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::Transaction(format!("rollback failed: {e}")))
    }
}

struct JournalRow {
    id: i64,
    owner_id: String,
    content: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JournalRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JournalRow {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// The one mapping from a `journals` row to the domain record.
fn decode(row: &PgRow) -> Result<JournalEntry, StoreError> {
    let row = JournalRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to decode journal row: {e}")))?;
    let owner_id = OwnerId::new(row.owner_id)
        .map_err(|e| StoreError::Backend(format!("stored owner id is invalid: {e}")))?;

    Ok(JournalEntry {
        id: JournalId::from_i64(row.id),
        owner_id,
        content: row.content,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if code.starts_with("23") => StoreError::Constraint(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// These run only when `TEST_DATABASE_URL` points at a disposable Postgres.
#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> Option<PostgresJournalStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.unwrap();
        let store = PostgresJournalStore::new(pool);
        store.ensure_schema().await.unwrap();
        Some(store)
    }

    fn unique_owner(tag: &str) -> OwnerId {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        OwnerId::new(format!("{tag}-{nanos}")).unwrap()
    }

    #[tokio::test]
    async fn page_and_total_agree_while_rows_are_inserted() {
        let Some(store) = connect().await else { return };
        let store = Arc::new(store);
        let owner = unique_owner("paging");
        for i in 0..5 {
            store
                .insert(NewJournalEntry::stamped(owner.clone(), format!("seed {i}"), Utc::now()))
                .await
                .unwrap();
        }

        let writer = {
            let store = store.clone();
            let owner = owner.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    store
                        .insert(NewJournalEntry::stamped(owner.clone(), format!("late {i}"), Utc::now()))
                        .await
                        .unwrap();
                }
            })
        };

        let request = PageRequest::new(0, 1000).unwrap();
        for _ in 0..20 {
            let (items, total) = store.list_by_owner_ordered_paged(&owner, request).await.unwrap();
            assert_eq!(items.len() as u64, total);
        }
        writer.await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete_by_owner(&owner).await.unwrap();
        assert_eq!(tx.commit().await.unwrap(), 55);
    }

    #[tokio::test]
    async fn concurrent_deletes_count_each_row_once() {
        let Some(store) = connect().await else { return };
        let owner = unique_owner("erase");
        for i in 0..2 {
            store
                .insert(NewJournalEntry::stamped(owner.clone(), format!("n{i}"), Utc::now()))
                .await
                .unwrap();
        }

        let mut first = store.begin().await.unwrap();
        assert_eq!(first.delete_by_owner(&owner).await.unwrap(), 2);
        let second = {
            let store = store.clone();
            let owner = owner.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                tx.delete_by_owner(&owner).await.unwrap();
                tx.commit().await.unwrap()
            })
        };
        assert_eq!(first.commit().await.unwrap(), 2);
        assert_eq!(second.await.unwrap(), 0);
    }
}
