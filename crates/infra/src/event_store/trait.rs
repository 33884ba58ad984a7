use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use ledgerflow_core::{AggregateId, EventId, ExpectedVersion};
use ledgerflow_events::{DecodeEvent, Event, EventDecodeError};
use std::sync::Arc;

/// An event ready to be appended to a stream.
///
/// Identity (`event_id`), ordering (`aggregate_version`, `position`) and the
/// `occurred_at` timestamp are assigned by the store during append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub aggregate_id: AggregateId,
    pub event_type: String,
    pub schema_version: u32,
    pub correlation_id: Option<String>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Build an uncommitted event from a typed domain event.
    pub fn from_typed<E: Event>(
        aggregate_id: AggregateId,
        event: &E,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            aggregate_id,
            event_type: event.event_type().to_string(),
            schema_version: event.schema_version(),
            correlation_id,
            payload: event.payload(),
        }
    }
}

/// A stored event in the append-only log.
///
/// - `position` is the global log position: strictly increasing across all
///   streams, and the order the projector consumes events in.
/// - `aggregate_version` is the per-stream version: exactly `1..=N` for a
///   stream with `N` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub position: u64,
    pub event_id: EventId,
    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub aggregate_id: AggregateId,
    pub aggregate_version: u64,
    pub correlation_id: Option<String>,
    pub payload: JsonValue,
}

impl StoredEvent {
    /// Decode the payload into a typed domain event.
    pub fn decode<E: DecodeEvent>(&self) -> Result<E, EventDecodeError> {
        E::decode(&self.event_type, self.schema_version, &self.payload)
    }
}

/// Result of a successful append: the caller's next expected-version token.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResult {
    pub event_id: EventId,
    pub new_version: u64,
    pub position: u64,
}

/// Event store operation error.
///
/// These are **infrastructure errors** as opposed to domain errors
/// (validation, invariants).
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream moved past the caller's expected version. Nothing was written.
    #[error("concurrency conflict: expected_version={expected}, current_version={actual}")]
    Concurrency { expected: u64, actual: u64 },

    /// The backing store failed (I/O, locking, transaction).
    #[error("event store unavailable during {operation}: {message}")]
    Storage { operation: &'static str, message: String },

    /// A stored row could not be read back into a `StoredEvent`.
    #[error("corrupt event row: {0}")]
    Corrupt(String),
}

impl EventStoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }
}

/// Append-only event store with per-stream optimistic concurrency.
///
/// ## Append semantics
///
/// `append()` reads the stream's current version, rejects the write with
/// `EventStoreError::Concurrency` if it differs from `expected_version`, and
/// otherwise inserts one event at `current + 1`. The check and the insert are a
/// single atomic unit: two racing appends against the same version cannot both
/// succeed. Streams for different aggregates are independent.
///
/// ## Read semantics
///
/// - `load_events()` returns a stream ascending by `aggregate_version`
///   (empty if the stream does not exist).
/// - `read_after()` returns every event with `position > after`, ascending by
///   position. Per stream, position order equals version order.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Highest `aggregate_version` of the stream, or 0 if it has no events.
    async fn current_version(&self, aggregate_id: &AggregateId) -> Result<u64, EventStoreError>;

    /// Append a single event under an optimistic concurrency check.
    async fn append(
        &self,
        event: UncommittedEvent,
        expected_version: ExpectedVersion,
    ) -> Result<AppendResult, EventStoreError>;

    /// Load the full stream for an aggregate, ascending by version.
    async fn load_events(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load all events after a global log position, ascending by position.
    async fn read_after(&self, position: u64) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Highest global log position, or 0 for an empty log.
    async fn head_position(&self) -> Result<u64, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn current_version(&self, aggregate_id: &AggregateId) -> Result<u64, EventStoreError> {
        (**self).current_version(aggregate_id).await
    }

    async fn append(
        &self,
        event: UncommittedEvent,
        expected_version: ExpectedVersion,
    ) -> Result<AppendResult, EventStoreError> {
        (**self).append(event, expected_version).await
    }

    async fn load_events(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_events(aggregate_id).await
    }

    async fn read_after(&self, position: u64) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).read_after(position).await
    }

    async fn head_position(&self) -> Result<u64, EventStoreError> {
        (**self).head_position().await
    }
}
