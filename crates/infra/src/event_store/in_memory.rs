use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use ledgerflow_core::{AggregateId, EventId, ExpectedVersion};

use super::r#trait::{AppendResult, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Default)]
struct Log {
    /// Global log; `events[i].position == i + 1`.
    events: Vec<StoredEvent>,
    /// Per-stream indexes into `events`, in version order.
    streams: HashMap<AggregateId, Vec<usize>>,
}

impl Log {
    fn current_version(&self, aggregate_id: &AggregateId) -> u64 {
        self.streams
            .get(aggregate_id)
            .and_then(|idx| idx.last())
            .map(|&i| self.events[i].aggregate_version)
            .unwrap_or(0)
    }
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. The version check and insert happen under one write
/// lock, which makes them atomic with respect to every other append.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned(operation: &'static str) -> EventStoreError {
        EventStoreError::storage(operation, "lock poisoned")
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn current_version(&self, aggregate_id: &AggregateId) -> Result<u64, EventStoreError> {
        let log = self.log.read().map_err(|_| Self::poisoned("current_version"))?;
        Ok(log.current_version(aggregate_id))
    }

    async fn append(
        &self,
        event: UncommittedEvent,
        expected_version: ExpectedVersion,
    ) -> Result<AppendResult, EventStoreError> {
        let mut log = self.log.write().map_err(|_| Self::poisoned("append"))?;

        let current = log.current_version(&event.aggregate_id);
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency {
                expected: expected_version.value(),
                actual: current,
            });
        }

        let stored = StoredEvent {
            position: log.events.len() as u64 + 1,
            event_id: EventId::new(),
            event_type: event.event_type,
            schema_version: event.schema_version,
            occurred_at: Utc::now(),
            aggregate_id: event.aggregate_id,
            aggregate_version: current + 1,
            correlation_id: event.correlation_id,
            payload: event.payload,
        };
        let result = AppendResult {
            event_id: stored.event_id,
            new_version: stored.aggregate_version,
            position: stored.position,
        };

        let idx = log.events.len();
        log.streams
            .entry(stored.aggregate_id.clone())
            .or_default()
            .push(idx);
        log.events.push(stored);

        Ok(result)
    }

    async fn load_events(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().map_err(|_| Self::poisoned("load_events"))?;
        Ok(log
            .streams
            .get(aggregate_id)
            .map(|idx| idx.iter().map(|&i| log.events[i].clone()).collect())
            .unwrap_or_default())
    }

    async fn read_after(&self, position: u64) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().map_err(|_| Self::poisoned("read_after"))?;
        let start = usize::try_from(position)
            .unwrap_or(usize::MAX)
            .min(log.events.len());
        Ok(log.events[start..].to_vec())
    }

    async fn head_position(&self) -> Result<u64, EventStoreError> {
        let log = self.log.read().map_err(|_| Self::poisoned("head_position"))?;
        Ok(log.events.len() as u64)
    }
}
