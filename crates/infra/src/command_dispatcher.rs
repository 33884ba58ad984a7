//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate's stream from the event store
//!   ↓
//! 2. Rehydrate (fold events 1..N into fresh state)
//!   ↓
//! 3. Handle command (pure decision logic, produces one event)
//!   ↓
//! 4. Append with the caller's expected version (optimistic concurrency)
//! ```
//!
//! Nothing is appended unless every validation step passes. A conflict is
//! surfaced to the caller and never retried here.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, Span};

use ledgerflow_accounts::{Account, AccountCommand, Deposit, OpenAccount, Withdraw};
use ledgerflow_core::{Aggregate, AggregateId, DomainError, EventId, ExpectedVersion};
use ledgerflow_events::{Command, DecodeEvent, Event};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The caller's expected version is stale (precheck or store rejection).
    #[error("concurrency conflict: expected_version={expected}, current_version={actual}")]
    Concurrency { expected: u64, actual: u64 },

    #[error("account already opened")]
    AlreadyOpen,

    #[error("account not opened")]
    AccountNotOpen,

    #[error("insufficient funds: balance={balance}, requested={requested}")]
    InsufficientFunds { balance: i64, requested: i64 },

    /// Deterministic input failure (bad amount, blank owner, bad id).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Historical events could not be decoded into the aggregate's event type.
    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency { expected, actual } => {
                DispatchError::Concurrency { expected, actual }
            }
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                DispatchError::Validation(msg)
            }
            DomainError::Conflict { expected, actual } => {
                DispatchError::Concurrency { expected, actual }
            }
            DomainError::AlreadyOpen => DispatchError::AlreadyOpen,
            DomainError::AccountNotOpen => DispatchError::AccountNotOpen,
            DomainError::InsufficientFunds { balance, requested } => {
                DispatchError::InsufficientFunds { balance, requested }
            }
        }
    }
}

/// Result of a successful command: the new event and the caller's next
/// expected version.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub event_id: EventId,
    pub new_version: u64,
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Holds only an event store handle; every call loads fresh state, so
/// dispatchers are cheap to share across request handlers.
#[derive(Debug, Clone)]
pub struct CommandDispatcher<S> {
    store: S,
}

impl<S> CommandDispatcher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> CommandDispatcher<S>
where
    S: EventStore,
{
    /// Rebuild an aggregate from its full stream.
    pub async fn rehydrate<A>(
        &self,
        aggregate_id: &AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DecodeEvent,
    {
        let history = self.store.load_events(aggregate_id).await?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id.clone());
        for stored in &history {
            let event: A::Event = stored
                .decode()
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
            aggregate.apply(&event, stored.aggregate_version);
        }
        Ok(aggregate)
    }

    /// Rehydrate, decide and append one command.
    #[instrument(
        skip(self, command, make_aggregate, correlation_id),
        fields(
            aggregate_id = %command.target_aggregate_id(),
            expected_version = %expected,
            new_version
        ),
        err
    )]
    pub async fn dispatch<A>(
        &self,
        command: A::Command,
        expected: ExpectedVersion,
        correlation_id: Option<String>,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<CommandOutcome, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: Event + DecodeEvent,
    {
        let aggregate_id = command.target_aggregate_id().clone();
        let aggregate = self.rehydrate(&aggregate_id, make_aggregate).await?;

        if command.requires_version_precheck() {
            expected.check(aggregate.version())?;
        }

        let decided = aggregate.handle(&command)?;
        let [event] = decided.as_slice() else {
            return Err(DispatchError::Validation(format!(
                "command produced {} events; exactly one is supported",
                decided.len()
            )));
        };

        let appended = self
            .store
            .append(
                UncommittedEvent::from_typed(aggregate_id, event, correlation_id),
                expected,
            )
            .await?;

        Span::current().record("new_version", appended.new_version);
        Ok(CommandOutcome {
            event_id: appended.event_id,
            new_version: appended.new_version,
        })
    }

    /// Current state of an account, straight from its stream.
    pub async fn load_account(&self, account_id: &AggregateId) -> Result<Account, DispatchError> {
        self.rehydrate(account_id, Account::empty).await
    }

    pub async fn open_account(
        &self,
        account_id: AggregateId,
        owner: impl Into<String>,
        expected: ExpectedVersion,
        correlation_id: Option<String>,
    ) -> Result<CommandOutcome, DispatchError> {
        let command = AccountCommand::OpenAccount(OpenAccount {
            account_id,
            owner: owner.into(),
        });
        self.dispatch(command, expected, correlation_id, Account::empty)
            .await
    }

    pub async fn deposit(
        &self,
        account_id: AggregateId,
        amount: i64,
        expected: ExpectedVersion,
        correlation_id: Option<String>,
    ) -> Result<CommandOutcome, DispatchError> {
        let command = AccountCommand::Deposit(Deposit { account_id, amount });
        self.dispatch(command, expected, correlation_id, Account::empty)
            .await
    }

    pub async fn withdraw(
        &self,
        account_id: AggregateId,
        amount: i64,
        expected: ExpectedVersion,
        correlation_id: Option<String>,
    ) -> Result<CommandOutcome, DispatchError> {
        let command = AccountCommand::Withdraw(Withdraw { account_id, amount });
        self.dispatch(command, expected, correlation_id, Account::empty)
            .await
    }
}

/// A loaded stream must belong to `aggregate_id` and carry versions exactly `1..=N`.
fn validate_loaded_stream(
    aggregate_id: &AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    for (idx, e) in stream.iter().enumerate() {
        if &e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::Corrupt(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        let expected = idx as u64 + 1;
        if e.aggregate_version != expected {
            return Err(DispatchError::Store(EventStoreError::Corrupt(format!(
                "non-contiguous stream for {aggregate_id}: expected version {expected}, found {}",
                e.aggregate_version
            ))));
        }
    }
    Ok(())
}
