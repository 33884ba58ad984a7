//! Aggregate root trait for event-sourced domain models.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Version of the aggregate's state: the `aggregate_version` of the last
    /// applied event, or 0 for an empty stream.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation declared by the caller.
///
/// The caller states the stream version it last observed; an append only
/// succeeds if that belief still holds at commit time. `0` means "the stream
/// must be empty".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExpectedVersion(u64);

impl ExpectedVersion {
    pub const NO_STREAM: ExpectedVersion = ExpectedVersion(0);

    pub fn exact(version: u64) -> Self {
        Self(version)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn matches(self, actual: u64) -> bool {
        self.0 == actual
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::Conflict {
                expected: self.0,
                actual,
            })
        }
    }
}

impl From<u64> for ExpectedVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State mutation**: `apply(&mut self, event, version)` evolves state.
///
/// Aggregates must not perform IO or side effects. They should only return events
/// describing what happened.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event recorded at `version`.
    ///
    /// Every event, including ones the aggregate does not understand, must
    /// advance `version()` to the given value.
    fn apply(&mut self, event: &Self::Event, version: u64);

    /// Decide which events to emit given the current state and a command.
    ///
    /// This must not mutate state. State evolution is done through `apply`.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_matches_only_exact_value() {
        let expected = ExpectedVersion::exact(3);
        assert!(expected.matches(3));
        assert!(!expected.matches(2));
        assert!(!expected.matches(4));
    }

    #[test]
    fn check_reports_both_versions_on_conflict() {
        let err = ExpectedVersion::exact(1).check(2).unwrap_err();
        assert_eq!(
            err,
            DomainError::Conflict {
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn no_stream_expects_version_zero() {
        assert!(ExpectedVersion::NO_STREAM.matches(0));
        assert_eq!(ExpectedVersion::from(0), ExpectedVersion::NO_STREAM);
    }
}
