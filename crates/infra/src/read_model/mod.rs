//! Query-side read model: account rows, timelines, the dedup ledger and the
//! projector cursor.
//!
//! The projector is the only writer and always writes through a
//! [`ReadModelTx`]: everything staged inside one transaction becomes visible
//! together on `commit`, or not at all. Query handlers use the read-only methods
//! on [`ReadModelStore`].

pub mod in_memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ledgerflow_core::{AggregateId, EventId, Money};

pub use in_memory::InMemoryReadModelStore;
pub use sqlite::SqliteReadModelStore;

/// Denormalized account state, one row per aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRow {
    pub account_id: AggregateId,
    pub owner: Option<String>,
    pub balance: Money,
    /// Highest `aggregate_version` applied to this row.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl AccountRow {
    /// The row an account has before any of its events were projected.
    pub fn empty(account_id: AggregateId, at: DateTime<Utc>) -> Self {
        Self {
            account_id,
            owner: None,
            balance: Money::ZERO,
            version: 0,
            updated_at: at,
        }
    }
}

/// One human-readable line per applied event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub event_id: EventId,
    pub account_id: AggregateId,
    pub aggregate_version: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectorLag {
    pub cursor_position: u64,
    pub accounts_indexed: u64,
}

#[derive(Debug, Error)]
pub enum ReadModelError {
    #[error("read model unavailable during {operation}: {message}")]
    Storage { operation: &'static str, message: String },

    #[error("corrupt read model row: {0}")]
    Corrupt(String),

    #[error("projector cursor cannot move backwards (current={current}, requested={requested})")]
    CursorRegression { current: u64, requested: u64 },
}

impl ReadModelError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }
}

/// A unit of read-model work.
///
/// Dropping a transaction without calling [`commit`](ReadModelTx::commit)
/// discards everything staged in it.
#[async_trait]
pub trait ReadModelTx: Send {
    /// Highest log position fully applied (0 before the first batch).
    async fn cursor(&mut self) -> Result<u64, ReadModelError>;

    async fn is_processed(&mut self, event_id: &EventId) -> Result<bool, ReadModelError>;

    /// Record an event id in the dedup ledger. Recording twice is a no-op.
    async fn mark_processed(&mut self, event_id: &EventId) -> Result<(), ReadModelError>;

    async fn load_account(
        &mut self,
        account_id: &AggregateId,
    ) -> Result<Option<AccountRow>, ReadModelError>;

    async fn upsert_account(&mut self, row: &AccountRow) -> Result<(), ReadModelError>;

    /// Insert a timeline entry; an entry with the same `event_id` is left untouched.
    async fn insert_timeline(&mut self, entry: &TimelineEntry) -> Result<(), ReadModelError>;

    /// Move the cursor forward. Fails with `CursorRegression` if `position` is
    /// below the stored cursor.
    async fn advance_cursor(&mut self, position: u64) -> Result<(), ReadModelError>;

    async fn commit(self: Box<Self>) -> Result<(), ReadModelError>;

    async fn rollback(self: Box<Self>) -> Result<(), ReadModelError>;
}

/// Read model storage boundary.
#[async_trait]
pub trait ReadModelStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ReadModelTx>, ReadModelError>;

    async fn get_account(
        &self,
        account_id: &AggregateId,
    ) -> Result<Option<AccountRow>, ReadModelError>;

    /// Timeline of one account, ascending by `aggregate_version`.
    async fn get_timeline(
        &self,
        account_id: &AggregateId,
    ) -> Result<Vec<TimelineEntry>, ReadModelError>;

    async fn projector_lag(&self) -> Result<ProjectorLag, ReadModelError>;
}

#[async_trait]
impl<S> ReadModelStore for Arc<S>
where
    S: ReadModelStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn ReadModelTx>, ReadModelError> {
        (**self).begin().await
    }

    async fn get_account(
        &self,
        account_id: &AggregateId,
    ) -> Result<Option<AccountRow>, ReadModelError> {
        (**self).get_account(account_id).await
    }

    async fn get_timeline(
        &self,
        account_id: &AggregateId,
    ) -> Result<Vec<TimelineEntry>, ReadModelError> {
        (**self).get_timeline(account_id).await
    }

    async fn projector_lag(&self) -> Result<ProjectorLag, ReadModelError> {
        (**self).projector_lag().await
    }
}
