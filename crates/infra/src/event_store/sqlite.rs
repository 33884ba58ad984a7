//! SQLite-backed event store implementation.
//!
//! Events live in a single `events` table whose `INTEGER PRIMARY KEY
//! AUTOINCREMENT` column doubles as the global log position. Optimistic
//! concurrency is enforced twice:
//!
//! 1. the insert is a conditional `INSERT … SELECT` that only produces a row if
//!    the stream's current version equals the expected version, and
//! 2. a `UNIQUE (aggregate_id, aggregate_version)` index rejects any second
//!    writer that slips past (1).
//!
//! ## Error Mapping
//!
//! | SQLx error | EventStoreError |
//! |------------|-----------------|
//! | Database (unique violation) | `Concurrency` |
//! | Any other error | `Storage` |
//! | Row decode failure | `Corrupt` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{instrument, Span};

use ledgerflow_core::{AggregateId, EventId, ExpectedVersion};

use super::r#trait::{AppendResult, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS events (
        position          INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id          TEXT    NOT NULL UNIQUE,
        event_type        TEXT    NOT NULL,
        schema_version    INTEGER NOT NULL,
        occurred_at       TEXT    NOT NULL,
        aggregate_id      TEXT    NOT NULL,
        aggregate_version INTEGER NOT NULL CHECK (aggregate_version > 0),
        correlation_id    TEXT,
        payload           TEXT    NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_events_stream
        ON events (aggregate_id, aggregate_version)
    "#,
];

const SELECT_COLUMNS: &str = "position, event_id, event_type, schema_version, occurred_at, \
     aggregate_id, aggregate_version, correlation_id, payload";

/// SQLite-backed append-only event store.
///
/// Cloning is cheap: clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    /// Wrap a pool and make sure the schema exists.
    pub async fn new(pool: SqlitePool) -> Result<Self, EventStoreError> {
        for ddl in SCHEMA {
            sqlx::query(ddl)
                .execute(&pool)
                .await
                .map_err(|e| map_sqlx_error("init_schema", e))?;
        }
        Ok(Self { pool })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    async fn current_version(&self, aggregate_id: &AggregateId) -> Result<u64, EventStoreError> {
        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(aggregate_version), 0) FROM events WHERE aggregate_id = ?1",
        )
        .bind(aggregate_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("current_version", e))?;
        to_u64("aggregate_version", current)
    }

    /// Append one event with optimistic concurrency control.
    ///
    /// The version check and the insert are one statement inside one
    /// transaction, so no other append for the same stream can interleave.
    #[instrument(
        skip(self, event),
        fields(
            aggregate_id = %event.aggregate_id,
            event_type = %event.event_type,
            expected_version = %expected_version,
            new_version
        ),
        err
    )]
    async fn append(
        &self,
        event: UncommittedEvent,
        expected_version: ExpectedVersion,
    ) -> Result<AppendResult, EventStoreError> {
        let event_id = EventId::new();
        let occurred_at = Utc::now();
        let expected = to_i64("expected_version", expected_version.value())?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO events (
                event_id,
                event_type,
                schema_version,
                occurred_at,
                aggregate_id,
                aggregate_version,
                correlation_id,
                payload
            )
            SELECT ?1, ?2, ?3, ?4, ?5, stream.current + 1, ?6, ?7
            FROM (
                SELECT COALESCE(MAX(aggregate_version), 0) AS current
                FROM events
                WHERE aggregate_id = ?5
            ) AS stream
            WHERE stream.current = ?8
            RETURNING position, aggregate_version
            "#,
        )
        .bind(event_id.to_string())
        .bind(&event.event_type)
        .bind(i64::from(event.schema_version))
        .bind(occurred_at)
        .bind(event.aggregate_id.as_str())
        .bind(event.correlation_id.as_deref())
        .bind(event.payload.to_string())
        .bind(expected)
        .fetch_optional(&mut *tx)
        .await;

        let row = match inserted {
            Ok(Some(row)) => row,
            Ok(None) => {
                let actual = stream_version(&mut tx, &event.aggregate_id).await?;
                rollback(tx).await;
                return Err(EventStoreError::Concurrency {
                    expected: expected_version.value(),
                    actual,
                });
            }
            Err(e) if is_unique_violation(&e) => {
                rollback(tx).await;
                let actual = self.current_version(&event.aggregate_id).await?;
                return Err(EventStoreError::Concurrency {
                    expected: expected_version.value(),
                    actual,
                });
            }
            Err(e) => {
                rollback(tx).await;
                return Err(map_sqlx_error("insert_event", e));
            }
        };

        let position: i64 = row
            .try_get("position")
            .map_err(|e| EventStoreError::Corrupt(format!("position: {e}")))?;
        let new_version: i64 = row
            .try_get("aggregate_version")
            .map_err(|e| EventStoreError::Corrupt(format!("aggregate_version: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let new_version = to_u64("aggregate_version", new_version)?;
        Span::current().record("new_version", new_version);

        Ok(AppendResult {
            event_id,
            new_version,
            position: to_u64("position", position)?,
        })
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    async fn load_events(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM events WHERE aggregate_id = ?1 ORDER BY aggregate_version ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_events", e))?;

        rows.iter().map(stored_event_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn read_after(&self, position: u64) -> Result<Vec<StoredEvent>, EventStoreError> {
        let after = to_i64("position", position)?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM events WHERE position > ?1 ORDER BY position ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(after)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("read_after", e))?;

        rows.iter().map(stored_event_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn head_position(&self) -> Result<u64, EventStoreError> {
        let head: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("head_position", e))?;
        to_u64("position", head)
    }
}

async fn stream_version(
    tx: &mut Transaction<'_, Sqlite>,
    aggregate_id: &AggregateId,
) -> Result<u64, EventStoreError> {
    let current: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(aggregate_version), 0) FROM events WHERE aggregate_id = ?1",
    )
    .bind(aggregate_id.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;
    to_u64("aggregate_version", current)
}

/// Roll back, logging instead of failing: the caller is already returning an error.
async fn rollback(tx: Transaction<'_, Sqlite>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "event store rollback failed");
    }
}

fn stored_event_from_row(row: &SqliteRow) -> Result<StoredEvent, EventStoreError> {
    let corrupt = |field: &str, e: &dyn core::fmt::Display| {
        EventStoreError::Corrupt(format!("{field}: {e}"))
    };

    let position: i64 = row.try_get("position").map_err(|e| corrupt("position", &e))?;
    let event_id: String = row.try_get("event_id").map_err(|e| corrupt("event_id", &e))?;
    let event_type: String = row.try_get("event_type").map_err(|e| corrupt("event_type", &e))?;
    let schema_version: i64 = row
        .try_get("schema_version")
        .map_err(|e| corrupt("schema_version", &e))?;
    let occurred_at: DateTime<Utc> = row
        .try_get("occurred_at")
        .map_err(|e| corrupt("occurred_at", &e))?;
    let aggregate_id: String = row
        .try_get("aggregate_id")
        .map_err(|e| corrupt("aggregate_id", &e))?;
    let aggregate_version: i64 = row
        .try_get("aggregate_version")
        .map_err(|e| corrupt("aggregate_version", &e))?;
    let correlation_id: Option<String> = row
        .try_get("correlation_id")
        .map_err(|e| corrupt("correlation_id", &e))?;
    let payload: String = row.try_get("payload").map_err(|e| corrupt("payload", &e))?;

    Ok(StoredEvent {
        position: to_u64("position", position)?,
        event_id: event_id.parse::<EventId>().map_err(|e| corrupt("event_id", &e))?,
        event_type,
        schema_version: u32::try_from(schema_version)
            .map_err(|e| corrupt("schema_version", &e))?,
        occurred_at,
        aggregate_id: AggregateId::new(aggregate_id).map_err(|e| corrupt("aggregate_id", &e))?,
        aggregate_version: to_u64("aggregate_version", aggregate_version)?,
        correlation_id,
        payload: serde_json::from_str(&payload).map_err(|e| corrupt("payload", &e))?,
    })
}

fn to_u64(field: &str, value: i64) -> Result<u64, EventStoreError> {
    u64::try_from(value).map_err(|_| EventStoreError::Corrupt(format!("{field} is negative: {value}")))
}

fn to_i64(field: &str, value: u64) -> Result<i64, EventStoreError> {
    i64::try_from(value)
        .map_err(|_| EventStoreError::storage("bind", format!("{field} out of range: {value}")))
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            EventStoreError::storage(operation, format!("database error: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => EventStoreError::storage(operation, "connection pool closed"),
        other => EventStoreError::storage(operation, other.to_string()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    use crate::db;

    fn id(s: &str) -> AggregateId {
        AggregateId::new(s).unwrap()
    }

    fn event(aggregate: &str, amount: i64) -> UncommittedEvent {
        UncommittedEvent {
            aggregate_id: id(aggregate),
            event_type: "MoneyDeposited".to_string(),
            schema_version: 1,
            correlation_id: Some("corr-1".to_string()),
            payload: json!({ "amount": amount }),
        }
    }

    async fn file_store(dir: &tempfile::TempDir) -> SqliteEventStore {
        let pool = db::open_file(&dir.path().join("event_store.db")).await.unwrap();
        SqliteEventStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn append_and_load_round_trip_all_columns() {
        let pool = db::open_in_memory().await.unwrap();
        let store = SqliteEventStore::new(pool).await.unwrap();

        let first = store.append(event("A", 5), ExpectedVersion::exact(0)).await.unwrap();
        let second = store.append(event("A", 7), ExpectedVersion::exact(1)).await.unwrap();
        assert_eq!((first.new_version, second.new_version), (1, 2));

        let loaded = store.load_events(&id("A")).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].event_id, first.event_id);
        assert_eq!(loaded[0].position, first.position);
        assert_eq!(loaded[1].payload, json!({ "amount": 7 }));
        assert_eq!(loaded[1].correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(loaded[1].schema_version, 1);
        assert_eq!(store.current_version(&id("A")).await.unwrap(), 2);
        assert_eq!(store.head_position().await.unwrap(), second.position);
    }

    #[tokio::test]
    async fn stale_append_is_rejected_and_writes_nothing() {
        let pool = db::open_in_memory().await.unwrap();
        let store = SqliteEventStore::new(pool).await.unwrap();
        store.append(event("A", 5), ExpectedVersion::exact(0)).await.unwrap();

        for stale in [0, 2, 9] {
            let err = store
                .append(event("A", 1), ExpectedVersion::exact(stale))
                .await
                .unwrap_err();
            assert!(
                matches!(err, EventStoreError::Concurrency { expected, actual: 1 } if expected == stale)
            );
        }
        assert_eq!(store.load_events(&id("A")).await.unwrap().len(), 1);
        assert_eq!(store.head_position().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn read_after_spans_streams_in_position_order() {
        let pool = db::open_in_memory().await.unwrap();
        let store = SqliteEventStore::new(pool).await.unwrap();
        store.append(event("A", 1), ExpectedVersion::exact(0)).await.unwrap();
        store.append(event("B", 2), ExpectedVersion::exact(0)).await.unwrap();
        store.append(event("A", 3), ExpectedVersion::exact(1)).await.unwrap();

        let all = store.read_after(0).await.unwrap();
        let order: Vec<_> = all
            .iter()
            .map(|e| (e.aggregate_id.to_string(), e.aggregate_version))
            .collect();
        assert_eq!(
            order,
            vec![("A".to_string(), 1), ("B".to_string(), 1), ("A".to_string(), 2)]
        );
        assert_eq!(store.read_after(all[1].position).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_appends_from_same_version_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(file_store(&dir).await);
        store.append(event("A", 100), ExpectedVersion::exact(0)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(event("A", 10), ExpectedVersion::exact(1)).await
            }));
        }

        let mut winners = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(r) => {
                    assert_eq!(r.new_version, 2);
                    winners += 1;
                }
                Err(EventStoreError::Concurrency { expected: 1, actual: 2 }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.current_version(&id("A")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn events_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = file_store(&dir).await;
            store.append(event("A", 1), ExpectedVersion::exact(0)).await.unwrap();
        }
        let reopened = file_store(&dir).await;
        assert_eq!(reopened.current_version(&id("A")).await.unwrap(), 1);
    }
}
