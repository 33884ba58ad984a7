//! SQLite-backed read model.
//!
//! Lives in its own database file, separate from the event store. Tables:
//!
//! - `account_read`: one row per account
//! - `account_timeline`: one row per applied event, keyed by `event_id`
//! - `processed_events`: the dedup ledger
//! - `projector_cursor`: a singleton row (`id = 1`) holding `last_position`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::instrument;

use ledgerflow_core::{AggregateId, EventId, Money};

use super::{AccountRow, ProjectorLag, ReadModelError, ReadModelStore, ReadModelTx, TimelineEntry};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS account_read (
        account_id TEXT    PRIMARY KEY,
        owner      TEXT,
        balance    INTEGER NOT NULL,
        version    INTEGER NOT NULL,
        updated_at TEXT    NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS account_timeline (
        event_id          TEXT    PRIMARY KEY,
        account_id        TEXT    NOT NULL,
        aggregate_version INTEGER NOT NULL,
        event_type        TEXT    NOT NULL,
        occurred_at       TEXT    NOT NULL,
        summary           TEXT    NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_account_timeline_account
        ON account_timeline (account_id, aggregate_version)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS processed_events (
        event_id   TEXT PRIMARY KEY,
        applied_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projector_cursor (
        id            INTEGER PRIMARY KEY CHECK (id = 1),
        last_position INTEGER NOT NULL
    )
    "#,
    "INSERT OR IGNORE INTO projector_cursor (id, last_position) VALUES (1, 0)",
];

#[derive(Debug, Clone)]
pub struct SqliteReadModelStore {
    pool: SqlitePool,
}

impl SqliteReadModelStore {
    /// Wrap a pool and make sure the schema and the cursor row exist.
    pub async fn new(pool: SqlitePool) -> Result<Self, ReadModelError> {
        for ddl in SCHEMA {
            sqlx::query(ddl)
                .execute(&pool)
                .await
                .map_err(|e| map_sqlx_error("init_schema", e))?;
        }
        Ok(Self { pool })
    }
}

struct SqliteReadModelTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl ReadModelTx for SqliteReadModelTx {
    async fn cursor(&mut self) -> Result<u64, ReadModelError> {
        let position: i64 =
            sqlx::query_scalar("SELECT last_position FROM projector_cursor WHERE id = 1")
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("read_cursor", e))?;
        to_u64("last_position", position)
    }

    async fn is_processed(&mut self, event_id: &EventId) -> Result<bool, ReadModelError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM processed_events WHERE event_id = ?1")
                .bind(event_id.to_string())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("check_processed", e))?;
        Ok(found.is_some())
    }

    async fn mark_processed(&mut self, event_id: &EventId) -> Result<(), ReadModelError> {
        sqlx::query("INSERT OR IGNORE INTO processed_events (event_id, applied_at) VALUES (?1, ?2)")
            .bind(event_id.to_string())
            .bind(Utc::now())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("mark_processed", e))?;
        Ok(())
    }

    async fn load_account(
        &mut self,
        account_id: &AggregateId,
    ) -> Result<Option<AccountRow>, ReadModelError> {
        let row = sqlx::query(
            "SELECT account_id, owner, balance, version, updated_at \
             FROM account_read WHERE account_id = ?1",
        )
        .bind(account_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_account", e))?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn upsert_account(&mut self, row: &AccountRow) -> Result<(), ReadModelError> {
        sqlx::query(
            r#"
            INSERT INTO account_read (account_id, owner, balance, version, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (account_id) DO UPDATE SET
                owner      = excluded.owner,
                balance    = excluded.balance,
                version    = excluded.version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(row.account_id.as_str())
        .bind(row.owner.as_deref())
        .bind(row.balance.units())
        .bind(to_i64("version", row.version)?)
        .bind(row.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_account", e))?;
        Ok(())
    }

    async fn insert_timeline(&mut self, entry: &TimelineEntry) -> Result<(), ReadModelError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO account_timeline (
                event_id, account_id, aggregate_version, event_type, occurred_at, summary
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(entry.event_id.to_string())
        .bind(entry.account_id.as_str())
        .bind(to_i64("aggregate_version", entry.aggregate_version)?)
        .bind(&entry.event_type)
        .bind(entry.occurred_at)
        .bind(&entry.summary)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_timeline", e))?;
        Ok(())
    }

    async fn advance_cursor(&mut self, position: u64) -> Result<(), ReadModelError> {
        let current = self.cursor().await?;
        if position < current {
            return Err(ReadModelError::CursorRegression {
                current,
                requested: position,
            });
        }
        sqlx::query("UPDATE projector_cursor SET last_position = ?1 WHERE id = 1")
            .bind(to_i64("last_position", position)?)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("advance_cursor", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ReadModelError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), ReadModelError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }
}

#[async_trait]
impl ReadModelStore for SqliteReadModelStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn ReadModelTx>, ReadModelError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(SqliteReadModelTx { tx }))
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn get_account(
        &self,
        account_id: &AggregateId,
    ) -> Result<Option<AccountRow>, ReadModelError> {
        let row = sqlx::query(
            "SELECT account_id, owner, balance, version, updated_at \
             FROM account_read WHERE account_id = ?1",
        )
        .bind(account_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_account", e))?;

        row.as_ref().map(account_from_row).transpose()
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn get_timeline(
        &self,
        account_id: &AggregateId,
    ) -> Result<Vec<TimelineEntry>, ReadModelError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, account_id, aggregate_version, event_type, occurred_at, summary
            FROM account_timeline
            WHERE account_id = ?1
            ORDER BY aggregate_version ASC
            "#,
        )
        .bind(account_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_timeline", e))?;

        rows.iter().map(timeline_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn projector_lag(&self) -> Result<ProjectorLag, ReadModelError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT last_position FROM projector_cursor WHERE id = 1) AS cursor_position,
                (SELECT COUNT(*) FROM account_read) AS accounts_indexed
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("projector_lag", e))?;

        let cursor: i64 = row
            .try_get("cursor_position")
            .map_err(|e| ReadModelError::Corrupt(format!("cursor_position: {e}")))?;
        let accounts: i64 = row
            .try_get("accounts_indexed")
            .map_err(|e| ReadModelError::Corrupt(format!("accounts_indexed: {e}")))?;

        Ok(ProjectorLag {
            cursor_position: to_u64("cursor_position", cursor)?,
            accounts_indexed: to_u64("accounts_indexed", accounts)?,
        })
    }
}

fn account_from_row(row: &SqliteRow) -> Result<AccountRow, ReadModelError> {
    let corrupt = |field: &str, e: &dyn core::fmt::Display| {
        ReadModelError::Corrupt(format!("account_read.{field}: {e}"))
    };

    let account_id: String = row.try_get("account_id").map_err(|e| corrupt("account_id", &e))?;
    let owner: Option<String> = row.try_get("owner").map_err(|e| corrupt("owner", &e))?;
    let balance: i64 = row.try_get("balance").map_err(|e| corrupt("balance", &e))?;
    let version: i64 = row.try_get("version").map_err(|e| corrupt("version", &e))?;
    let updated_at: DateTime<Utc> =
        row.try_get("updated_at").map_err(|e| corrupt("updated_at", &e))?;

    Ok(AccountRow {
        account_id: AggregateId::new(account_id).map_err(|e| corrupt("account_id", &e))?,
        owner,
        balance: Money::new(balance),
        version: to_u64("version", version)?,
        updated_at,
    })
}

fn timeline_from_row(row: &SqliteRow) -> Result<TimelineEntry, ReadModelError> {
    let corrupt = |field: &str, e: &dyn core::fmt::Display| {
        ReadModelError::Corrupt(format!("account_timeline.{field}: {e}"))
    };

    let event_id: String = row.try_get("event_id").map_err(|e| corrupt("event_id", &e))?;
    let account_id: String = row.try_get("account_id").map_err(|e| corrupt("account_id", &e))?;
    let version: i64 = row
        .try_get("aggregate_version")
        .map_err(|e| corrupt("aggregate_version", &e))?;

    Ok(TimelineEntry {
        event_id: event_id.parse::<EventId>().map_err(|e| corrupt("event_id", &e))?,
        account_id: AggregateId::new(account_id).map_err(|e| corrupt("account_id", &e))?,
        aggregate_version: to_u64("aggregate_version", version)?,
        event_type: row.try_get("event_type").map_err(|e| corrupt("event_type", &e))?,
        occurred_at: row.try_get("occurred_at").map_err(|e| corrupt("occurred_at", &e))?,
        summary: row.try_get("summary").map_err(|e| corrupt("summary", &e))?,
    })
}

fn to_u64(field: &str, value: i64) -> Result<u64, ReadModelError> {
    u64::try_from(value).map_err(|_| ReadModelError::Corrupt(format!("{field} is negative: {value}")))
}

fn to_i64(field: &str, value: u64) -> Result<i64, ReadModelError> {
    i64::try_from(value)
        .map_err(|_| ReadModelError::storage("bind", format!("{field} out of range: {value}")))
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> ReadModelError {
    match err {
        sqlx::Error::Database(db_err) => {
            ReadModelError::storage(operation, format!("database error: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => ReadModelError::storage(operation, "connection pool closed"),
        other => ReadModelError::storage(operation, other.to_string()),
    }
}
