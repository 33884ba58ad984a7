use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use ledgerflow_core::{AggregateId, EventId};

use super::{AccountRow, ProjectorLag, ReadModelError, ReadModelStore, ReadModelTx, TimelineEntry};

#[derive(Debug, Clone, Default)]
struct State {
    accounts: HashMap<AggregateId, AccountRow>,
    timeline: HashMap<EventId, TimelineEntry>,
    processed: HashMap<EventId, DateTime<Utc>>,
    cursor: u64,
}

/// In-memory read model for tests/dev.
///
/// A transaction holds the state lock for its whole lifetime and works on a
/// private copy, which replaces the shared state only on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReadModelStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryReadModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of event ids in the dedup ledger.
    pub async fn processed_count(&self) -> usize {
        self.state.lock().await.processed.len()
    }
}

struct InMemoryReadModelTx {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl ReadModelTx for InMemoryReadModelTx {
    async fn cursor(&mut self) -> Result<u64, ReadModelError> {
        Ok(self.working.cursor)
    }

    async fn is_processed(&mut self, event_id: &EventId) -> Result<bool, ReadModelError> {
        Ok(self.working.processed.contains_key(event_id))
    }

    async fn mark_processed(&mut self, event_id: &EventId) -> Result<(), ReadModelError> {
        self.working.processed.entry(*event_id).or_insert_with(Utc::now);
        Ok(())
    }

    async fn load_account(
        &mut self,
        account_id: &AggregateId,
    ) -> Result<Option<AccountRow>, ReadModelError> {
        Ok(self.working.accounts.get(account_id).cloned())
    }

    async fn upsert_account(&mut self, row: &AccountRow) -> Result<(), ReadModelError> {
        self.working
            .accounts
            .insert(row.account_id.clone(), row.clone());
        Ok(())
    }

    async fn insert_timeline(&mut self, entry: &TimelineEntry) -> Result<(), ReadModelError> {
        self.working
            .timeline
            .entry(entry.event_id)
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    async fn advance_cursor(&mut self, position: u64) -> Result<(), ReadModelError> {
        let current = self.working.cursor;
        if position < current {
            return Err(ReadModelError::CursorRegression {
                current,
                requested: position,
            });
        }
        self.working.cursor = position;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ReadModelError> {
        let InMemoryReadModelTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ReadModelError> {
        Ok(())
    }
}

#[async_trait]
impl ReadModelStore for InMemoryReadModelStore {
    async fn begin(&self) -> Result<Box<dyn ReadModelTx>, ReadModelError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryReadModelTx { guard, working }))
    }

    async fn get_account(
        &self,
        account_id: &AggregateId,
    ) -> Result<Option<AccountRow>, ReadModelError> {
        Ok(self.state.lock().await.accounts.get(account_id).cloned())
    }

    async fn get_timeline(
        &self,
        account_id: &AggregateId,
    ) -> Result<Vec<TimelineEntry>, ReadModelError> {
        let state = self.state.lock().await;
        let mut items: Vec<_> = state
            .timeline
            .values()
            .filter(|e| &e.account_id == account_id)
            .cloned()
            .collect();
        items.sort_by_key(|e| e.aggregate_version);
        Ok(items)
    }

    async fn projector_lag(&self) -> Result<ProjectorLag, ReadModelError> {
        let state = self.state.lock().await;
        Ok(ProjectorLag {
            cursor_position: state.cursor,
            accounts_indexed: state.accounts.len() as u64,
        })
    }
}
