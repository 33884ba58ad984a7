use thiserror::Error;
use tracing::debug;

use ledgerflow_accounts::AccountEvent;
use ledgerflow_core::AggregateId;
use ledgerflow_events::EventDecodeError;

use crate::event_store::StoredEvent;
use crate::read_model::{AccountRow, ReadModelError, ReadModelTx, TimelineEntry};

/// What happened to one event inside a projector batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Row updated, timeline entry written, event recorded as processed.
    Applied,
    /// Event id already in the dedup ledger; nothing written.
    Duplicate,
    /// Row already at or past this version; only the dedup ledger was written.
    Stale,
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Decode(#[from] EventDecodeError),

    #[error(
        "version gap for account {account_id}: row at version {row_version}, event at version {event_version}"
    )]
    VersionGap {
        account_id: AggregateId,
        row_version: u64,
        event_version: u64,
    },

    #[error(transparent)]
    ReadModel(#[from] ReadModelError),
}

/// Human-readable timeline line for an account event.
pub fn summarize(event: &AccountEvent) -> String {
    match event {
        AccountEvent::AccountOpened(e) => format!("Account opened for {}", e.owner),
        AccountEvent::MoneyDeposited(e) => format!("Deposited {}", e.amount),
        AccountEvent::MoneyWithdrawn(e) => format!("Withdrew {}", e.amount),
        AccountEvent::Unknown { event_type, .. } => format!("Unknown event type {event_type}"),
    }
}

/// Pure transition: the row and timeline entry that result from applying
/// `event` on top of `row`.
///
/// `event.aggregate_version` must be exactly `row.version + 1`.
pub fn project(
    row: &AccountRow,
    event: &StoredEvent,
) -> Result<(AccountRow, TimelineEntry), ProjectionError> {
    if event.aggregate_version != row.version + 1 {
        return Err(ProjectionError::VersionGap {
            account_id: event.aggregate_id.clone(),
            row_version: row.version,
            event_version: event.aggregate_version,
        });
    }

    let decoded: AccountEvent = event.decode()?;

    let mut next = row.clone();
    match &decoded {
        AccountEvent::AccountOpened(e) => next.owner = Some(e.owner.clone()),
        AccountEvent::MoneyDeposited(e) => next.balance = next.balance.saturating_add(e.amount),
        AccountEvent::MoneyWithdrawn(e) => next.balance = next.balance.saturating_sub(e.amount),
        AccountEvent::Unknown { .. } => {}
    }
    next.version = event.aggregate_version;
    next.updated_at = event.occurred_at;

    let entry = TimelineEntry {
        event_id: event.event_id,
        account_id: event.aggregate_id.clone(),
        aggregate_version: event.aggregate_version,
        event_type: event.event_type.clone(),
        occurred_at: event.occurred_at,
        summary: summarize(&decoded),
    };

    Ok((next, entry))
}

/// Apply one stored event inside an open read-model transaction.
pub async fn apply_event(
    tx: &mut dyn ReadModelTx,
    event: &StoredEvent,
) -> Result<ApplyOutcome, ProjectionError> {
    if tx.is_processed(&event.event_id).await? {
        debug!(event_id = %event.event_id, position = event.position, "skipping duplicate event");
        return Ok(ApplyOutcome::Duplicate);
    }

    let row = tx
        .load_account(&event.aggregate_id)
        .await?
        .unwrap_or_else(|| AccountRow::empty(event.aggregate_id.clone(), event.occurred_at));

    if event.aggregate_version <= row.version {
        debug!(
            event_id = %event.event_id,
            aggregate_id = %event.aggregate_id,
            event_version = event.aggregate_version,
            row_version = row.version,
            "row already past event; marking processed"
        );
        tx.mark_processed(&event.event_id).await?;
        return Ok(ApplyOutcome::Stale);
    }

    let (next, entry) = project(&row, event)?;
    tx.upsert_account(&next).await?;
    tx.insert_timeline(&entry).await?;
    tx.mark_processed(&event.event_id).await?;
    Ok(ApplyOutcome::Applied)
}
