//! Append-only event store boundary.
//!
//! One trait, two backends: an in-memory log for tests and a SQLite file for
//! the running service. Both give the same ordering and concurrency guarantees.

pub mod in_memory;
pub mod sqlite;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use sqlite::SqliteEventStore;
pub use r#trait::{AppendResult, EventStore, EventStoreError, StoredEvent, UncommittedEvent};
