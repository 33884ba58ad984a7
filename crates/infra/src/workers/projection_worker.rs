use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::projections::{apply_event, ApplyOutcome, ProjectionError};
use crate::read_model::{ReadModelError, ReadModelStore, ReadModelTx};

/// Projector failure, classified by whether the next poll can fix it.
#[derive(Debug, Error)]
pub enum ProjectorError {
    /// I/O or transaction failure. The batch was rolled back; retried next cycle.
    #[error("transient projector failure: {0}")]
    Transient(String),

    /// Data-integrity failure. Retrying cannot succeed; the loop stops.
    #[error("fatal projector failure: {0}")]
    Fatal(String),
}

impl ProjectorError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProjectorError::Fatal(_))
    }
}

impl From<EventStoreError> for ProjectorError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::Corrupt(_) => ProjectorError::Fatal(err.to_string()),
            EventStoreError::Storage { .. } | EventStoreError::Concurrency { .. } => {
                ProjectorError::Transient(err.to_string())
            }
        }
    }
}

impl From<ReadModelError> for ProjectorError {
    fn from(err: ReadModelError) -> Self {
        match err {
            ReadModelError::Storage { .. } => ProjectorError::Transient(err.to_string()),
            ReadModelError::Corrupt(_) | ReadModelError::CursorRegression { .. } => {
                ProjectorError::Fatal(err.to_string())
            }
        }
    }
}

impl From<ProjectionError> for ProjectorError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::ReadModel(inner) => inner.into(),
            ProjectionError::Decode(_) | ProjectionError::VersionGap { .. } => {
                ProjectorError::Fatal(err.to_string())
            }
        }
    }
}

/// Counts for one projector cycle.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub applied: usize,
    pub duplicates: usize,
    pub stale: usize,
    /// Cursor after the cycle.
    pub cursor: u64,
}

impl CycleReport {
    pub fn events_seen(&self) -> usize {
        self.applied + self.duplicates + self.stale
    }
}

/// Tails the event log and folds it into the read model.
///
/// Each cycle reads the cursor, fetches every event after it, applies the
/// batch and advances the cursor in one read-model transaction. Only one
/// projector may run against a read model at a time.
#[derive(Debug)]
pub struct Projector<S, R> {
    store: S,
    read_model: R,
    poll_interval: Duration,
}

impl<S, R> Projector<S, R>
where
    S: EventStore,
    R: ReadModelStore,
{
    pub fn new(store: S, read_model: R, poll_interval: Duration) -> Self {
        Self {
            store,
            read_model,
            poll_interval,
        }
    }

    /// Run a single fetch/apply/advance cycle.
    ///
    /// On error nothing from this cycle is committed and the cursor is unchanged.
    pub async fn run_cycle(&self) -> Result<CycleReport, ProjectorError> {
        let mut tx = self.read_model.begin().await?;
        let cursor = tx.cursor().await?;
        let batch = self.store.read_after(cursor).await?;

        if batch.is_empty() {
            tx.rollback().await?;
            return Ok(CycleReport {
                cursor,
                ..CycleReport::default()
            });
        }

        match apply_batch(tx.as_mut(), cursor, &batch).await {
            Ok(report) => {
                tx.commit().await?;
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "projector rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Run cycles until `shutdown` flips to `true` (or its sender is dropped),
    /// or a fatal error occurs.
    ///
    /// Shutdown is observed between cycles, never in the middle of a batch.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ProjectorError> {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "projector started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_cycle().await {
                Ok(report) if report.events_seen() > 0 => {
                    info!(
                        applied = report.applied,
                        duplicates = report.duplicates,
                        stale = report.stale,
                        cursor = report.cursor,
                        "projector batch committed"
                    );
                }
                Ok(_) => {}
                Err(err) if err.is_fatal() => {
                    error!(error = %err, "projector stopped on fatal error");
                    return Err(err);
                }
                Err(err) => {
                    warn!(error = %err, "projector cycle failed; retrying next poll");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("projector stopped");
        Ok(())
    }
}

async fn apply_batch(
    tx: &mut dyn ReadModelTx,
    cursor: u64,
    batch: &[StoredEvent],
) -> Result<CycleReport, ProjectorError> {
    let mut report = CycleReport {
        cursor,
        ..CycleReport::default()
    };

    for event in batch {
        if event.position <= report.cursor {
            return Err(ProjectorError::Fatal(format!(
                "event position {} is not after cursor {}",
                event.position, report.cursor
            )));
        }

        match apply_event(tx, event).await? {
            ApplyOutcome::Applied => report.applied += 1,
            ApplyOutcome::Duplicate => report.duplicates += 1,
            ApplyOutcome::Stale => report.stale += 1,
        }
        report.cursor = event.position;
    }

    tx.advance_cursor(report.cursor).await?;
    debug!(cursor = report.cursor, "projector cursor advanced");
    Ok(report)
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<Result<(), ProjectorError>>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) -> Result<(), ProjectorError> {
        let _ = self.shutdown.send(true);
        self.finished().await
    }

    /// Wait for the worker to exit on its own (fatal error or shutdown).
    pub async fn finished(&mut self) -> Result<(), ProjectorError> {
        let Some(join) = self.join.as_mut() else {
            return Ok(());
        };
        let result = join.await;
        self.join = None;
        match result {
            Ok(outcome) => outcome,
            Err(e) => Err(ProjectorError::Fatal(format!("projector task failed: {e}"))),
        }
    }
}

/// Spawns projectors as background tokio tasks.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    pub fn spawn<S, R>(projector: Projector<S, R>) -> WorkerHandle
    where
        S: EventStore + 'static,
        R: ReadModelStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(projector.run(shutdown_rx));

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}
