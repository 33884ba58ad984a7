//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → Projector → ReadModel
//!
//! Verifies:
//! - Commands produce events that update read models correctly
//! - Optimistic concurrency conflicts are detected and write nothing
//! - The cursor never moves backwards, even across failed batches and restarts
//! - Re-applying processed events is a no-op

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::json;

    use ledgerflow_core::{AggregateId, AggregateRoot, EventId, ExpectedVersion, Money};

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::db;
    use crate::event_store::{EventStore, InMemoryEventStore, SqliteEventStore, UncommittedEvent};
    use crate::projections::apply_event;
    use crate::read_model::{
        AccountRow, InMemoryReadModelStore, ProjectorLag, ReadModelError, ReadModelStore,
        ReadModelTx, SqliteReadModelStore, TimelineEntry,
    };
    use crate::workers::{Projector, ProjectorError};

    fn id(s: &str) -> AggregateId {
        AggregateId::new(s).unwrap()
    }

    const POLL: Duration = Duration::from_millis(10);

    struct SqliteStack {
        _dir: tempfile::TempDir,
        path: std::path::PathBuf,
        store: Arc<SqliteEventStore>,
        read_model: Arc<SqliteReadModelStore>,
    }

    async fn sqlite_stack() -> SqliteStack {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let store = SqliteEventStore::new(db::open_file(&path.join("event_store.db")).await.unwrap())
            .await
            .unwrap();
        let read_model =
            SqliteReadModelStore::new(db::open_file(&path.join("read_model.db")).await.unwrap())
                .await
                .unwrap();
        SqliteStack {
            _dir: dir,
            path,
            store: Arc::new(store),
            read_model: Arc::new(read_model),
        }
    }

    /// Read model whose transactions fail on the Nth `upsert_account`, once.
    #[derive(Default)]
    struct CrashingReadModel {
        inner: InMemoryReadModelStore,
        crash_on_upsert: AtomicUsize,
    }

    struct CrashingTx {
        inner: Box<dyn ReadModelTx>,
        upserts_left: Option<usize>,
    }

    #[async_trait]
    impl ReadModelTx for CrashingTx {
        async fn cursor(&mut self) -> Result<u64, ReadModelError> {
            self.inner.cursor().await
        }

        async fn is_processed(&mut self, event_id: &EventId) -> Result<bool, ReadModelError> {
            self.inner.is_processed(event_id).await
        }

        async fn mark_processed(&mut self, event_id: &EventId) -> Result<(), ReadModelError> {
            self.inner.mark_processed(event_id).await
        }

        async fn load_account(
            &mut self,
            account_id: &AggregateId,
        ) -> Result<Option<AccountRow>, ReadModelError> {
            self.inner.load_account(account_id).await
        }

        async fn upsert_account(&mut self, row: &AccountRow) -> Result<(), ReadModelError> {
            if let Some(left) = self.upserts_left.as_mut() {
                *left -= 1;
                if *left == 0 {
                    return Err(ReadModelError::storage("upsert_account", "injected crash"));
                }
            }
            self.inner.upsert_account(row).await
        }

        async fn insert_timeline(&mut self, entry: &TimelineEntry) -> Result<(), ReadModelError> {
            self.inner.insert_timeline(entry).await
        }

        async fn advance_cursor(&mut self, position: u64) -> Result<(), ReadModelError> {
            self.inner.advance_cursor(position).await
        }

        async fn commit(self: Box<Self>) -> Result<(), ReadModelError> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> Result<(), ReadModelError> {
            self.inner.rollback().await
        }
    }

    #[async_trait]
    impl ReadModelStore for CrashingReadModel {
        async fn begin(&self) -> Result<Box<dyn ReadModelTx>, ReadModelError> {
            let crash_on = self.crash_on_upsert.swap(0, Ordering::SeqCst);
            Ok(Box::new(CrashingTx {
                inner: self.inner.begin().await?,
                upserts_left: (crash_on > 0).then_some(crash_on),
            }))
        }

        async fn get_account(
            &self,
            account_id: &AggregateId,
        ) -> Result<Option<AccountRow>, ReadModelError> {
            self.inner.get_account(account_id).await
        }

        async fn get_timeline(
            &self,
            account_id: &AggregateId,
        ) -> Result<Vec<TimelineEntry>, ReadModelError> {
            self.inner.get_timeline(account_id).await
        }

        async fn projector_lag(&self) -> Result<ProjectorLag, ReadModelError> {
            self.inner.projector_lag().await
        }
    }

    #[tokio::test]
    async fn alice_scenario_end_to_end_on_sqlite() {
        let stack = sqlite_stack().await;
        let dispatcher = CommandDispatcher::new(stack.store.clone());
        let projector = Projector::new(stack.store.clone(), stack.read_model.clone(), POLL);

        let opened = dispatcher
            .open_account(id("A"), "alice", ExpectedVersion::exact(0), None)
            .await
            .unwrap();
        assert_eq!(opened.new_version, 1);
        let deposited = dispatcher
            .deposit(id("A"), 100, ExpectedVersion::exact(1), None)
            .await
            .unwrap();
        assert_eq!(deposited.new_version, 2);

        let overdraw = dispatcher
            .withdraw(id("A"), 150, ExpectedVersion::exact(2), None)
            .await;
        assert!(matches!(overdraw, Err(DispatchError::InsufficientFunds { .. })));
        assert_eq!(stack.store.current_version(&id("A")).await.unwrap(), 2);

        let withdrawn = dispatcher
            .withdraw(id("A"), 40, ExpectedVersion::exact(2), None)
            .await
            .unwrap();
        assert_eq!(withdrawn.new_version, 3);

        // Not projected yet: the query side is allowed to lag.
        assert!(stack.read_model.get_account(&id("A")).await.unwrap().is_none());

        let report = projector.run_cycle().await.unwrap();
        assert_eq!((report.applied, report.cursor), (3, 3));

        let row = stack.read_model.get_account(&id("A")).await.unwrap().unwrap();
        assert_eq!(row.owner.as_deref(), Some("alice"));
        assert_eq!(row.balance, Money::new(60));
        assert_eq!(row.version, 3);

        let timeline = stack.read_model.get_timeline(&id("A")).await.unwrap();
        let summaries: Vec<_> = timeline.iter().map(|e| e.summary.as_str()).collect();
        assert_eq!(
            summaries,
            vec!["Account opened for alice", "Deposited 100", "Withdrew 40"]
        );
        assert_eq!(timeline[2].event_id, withdrawn.event_id);

        let lag = stack.read_model.projector_lag().await.unwrap();
        assert_eq!(lag, ProjectorLag { cursor_position: 3, accounts_indexed: 1 });
        assert_eq!(stack.store.head_position().await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deposits_from_same_version_have_one_winner() {
        let stack = sqlite_stack().await;
        let dispatcher = Arc::new(CommandDispatcher::new(stack.store.clone()));
        dispatcher
            .open_account(id("A"), "alice", ExpectedVersion::exact(0), None)
            .await
            .unwrap();
        dispatcher
            .deposit(id("A"), 10_000, ExpectedVersion::exact(1), None)
            .await
            .unwrap();

        let a = {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.deposit(id("A"), 1_000, ExpectedVersion::exact(2), None).await })
        };
        let b = {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.deposit(id("A"), 2_000, ExpectedVersion::exact(2), None).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].new_version, 3);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(DispatchError::Concurrency { expected: 2, actual: 3 })
        )));
        assert_eq!(stack.store.current_version(&id("A")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn catch_up_matches_store_version_for_every_account() {
        let stack = sqlite_stack().await;
        let dispatcher = CommandDispatcher::new(stack.store.clone());
        let projector = Projector::new(stack.store.clone(), stack.read_model.clone(), POLL);

        for (n, name) in ["acct-1", "acct-2", "acct-3"].iter().enumerate() {
            dispatcher
                .open_account(id(name), format!("owner {n}"), ExpectedVersion::exact(0), None)
                .await
                .unwrap();
            for v in 1..=(n as u64 + 1) {
                dispatcher
                    .deposit(id(name), 100, ExpectedVersion::exact(v), None)
                    .await
                    .unwrap();
            }
            // Interleave projection with writes.
            projector.run_cycle().await.unwrap();
        }
        projector.run_cycle().await.unwrap();

        for name in ["acct-1", "acct-2", "acct-3"] {
            let row = stack.read_model.get_account(&id(name)).await.unwrap().unwrap();
            assert_eq!(row.version, stack.store.current_version(&id(name)).await.unwrap());
        }
        assert_eq!(
            stack.read_model.projector_lag().await.unwrap().cursor_position,
            stack.store.head_position().await.unwrap()
        );
    }

    #[tokio::test]
    async fn mid_batch_crash_rolls_back_and_cursor_stays_monotonic() {
        let store = Arc::new(InMemoryEventStore::new());
        let read_model = Arc::new(CrashingReadModel::default());
        let dispatcher = CommandDispatcher::new(store.clone());
        let projector = Projector::new(store.clone(), read_model.clone(), POLL);

        dispatcher.open_account(id("A"), "alice", ExpectedVersion::exact(0), None).await.unwrap();
        projector.run_cycle().await.unwrap();
        assert_eq!(read_model.projector_lag().await.unwrap().cursor_position, 1);

        dispatcher.deposit(id("A"), 500, ExpectedVersion::exact(1), None).await.unwrap();
        dispatcher.deposit(id("A"), 700, ExpectedVersion::exact(2), None).await.unwrap();
        read_model.crash_on_upsert.store(2, Ordering::SeqCst);

        let err = projector.run_cycle().await.unwrap_err();
        assert!(matches!(err, ProjectorError::Transient(_)));

        // Nothing from the failed batch is visible, including the first upsert.
        let row = read_model.get_account(&id("A")).await.unwrap().unwrap();
        assert_eq!((row.version, row.balance), (1, Money::ZERO));
        assert_eq!(read_model.projector_lag().await.unwrap().cursor_position, 1);
        assert_eq!(read_model.inner.processed_count().await, 1);

        let report = projector.run_cycle().await.unwrap();
        assert_eq!((report.applied, report.duplicates, report.cursor), (2, 0, 3));
        let row = read_model.get_account(&id("A")).await.unwrap().unwrap();
        assert_eq!((row.version, row.balance), (3, Money::new(1_200)));
    }

    #[tokio::test]
    async fn cursor_survives_restart_and_projection_resumes() {
        let stack = sqlite_stack().await;
        let dispatcher = CommandDispatcher::new(stack.store.clone());
        dispatcher.open_account(id("A"), "alice", ExpectedVersion::exact(0), None).await.unwrap();
        Projector::new(stack.store.clone(), stack.read_model.clone(), POLL)
            .run_cycle()
            .await
            .unwrap();

        dispatcher.deposit(id("A"), 250, ExpectedVersion::exact(1), None).await.unwrap();

        // "Restart": a fresh read-model handle over the same file.
        let reopened = Arc::new(
            SqliteReadModelStore::new(
                db::open_file(&stack.path.join("read_model.db")).await.unwrap(),
            )
            .await
            .unwrap(),
        );
        assert_eq!(reopened.projector_lag().await.unwrap().cursor_position, 1);

        let report = Projector::new(stack.store.clone(), reopened.clone(), POLL)
            .run_cycle()
            .await
            .unwrap();
        assert_eq!((report.applied, report.cursor), (1, 2));
        assert_eq!(
            reopened.get_account(&id("A")).await.unwrap().unwrap().balance,
            Money::new(250)
        );
    }

    #[tokio::test]
    async fn reapplying_already_processed_events_is_a_noop() {
        let store = Arc::new(InMemoryEventStore::new());
        let read_model = InMemoryReadModelStore::new();
        let dispatcher = CommandDispatcher::new(store.clone());
        dispatcher.open_account(id("A"), "alice", ExpectedVersion::exact(0), None).await.unwrap();
        dispatcher.deposit(id("A"), 300, ExpectedVersion::exact(1), None).await.unwrap();
        dispatcher.deposit(id("A"), 400, ExpectedVersion::exact(2), None).await.unwrap();

        // Apply the first two events without moving the cursor, as a projector
        // that stopped between recording events and advancing would leave it.
        let events = store.read_after(0).await.unwrap();
        let mut tx = read_model.begin().await.unwrap();
        for event in &events[..2] {
            apply_event(tx.as_mut(), event).await.unwrap();
        }
        tx.commit().await.unwrap();

        let report = Projector::new(store.clone(), read_model.clone(), POLL)
            .run_cycle()
            .await
            .unwrap();
        assert_eq!((report.applied, report.duplicates, report.cursor), (1, 2, 3));

        let row = read_model.get_account(&id("A")).await.unwrap().unwrap();
        assert_eq!((row.version, row.balance), (3, Money::new(700)));
        assert_eq!(read_model.get_timeline(&id("A")).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn undecodable_known_event_stops_the_projector() {
        let store = Arc::new(InMemoryEventStore::new());
        let read_model = InMemoryReadModelStore::new();
        store
            .append(
                UncommittedEvent {
                    aggregate_id: id("A"),
                    event_type: "AccountOpened".into(),
                    schema_version: 1,
                    correlation_id: None,
                    payload: json!({ "name": "missing owner field" }),
                },
                ExpectedVersion::exact(0),
            )
            .await
            .unwrap();

        let projector = Projector::new(store, read_model.clone(), POLL);
        let err = projector.run_cycle().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(read_model.projector_lag().await.unwrap().cursor_position, 0);

        let (tx, rx) = tokio::sync::watch::channel(false);
        let outcome = tokio::time::timeout(Duration::from_secs(5), projector.run(rx)).await;
        assert!(matches!(outcome, Ok(Err(ProjectorError::Fatal(_)))));
        drop(tx);
    }

    #[tokio::test]
    async fn rebuilding_from_an_empty_read_model_reproduces_rows() {
        let store = Arc::new(InMemoryEventStore::new());
        let dispatcher = CommandDispatcher::new(store.clone());
        dispatcher.open_account(id("A"), "alice", ExpectedVersion::exact(0), None).await.unwrap();
        dispatcher.deposit(id("A"), 900, ExpectedVersion::exact(1), None).await.unwrap();
        dispatcher.open_account(id("B"), "bob", ExpectedVersion::exact(0), None).await.unwrap();

        let first = InMemoryReadModelStore::new();
        let second = InMemoryReadModelStore::new();
        Projector::new(store.clone(), first.clone(), POLL).run_cycle().await.unwrap();
        Projector::new(store.clone(), second.clone(), POLL).run_cycle().await.unwrap();

        for account in ["A", "B"] {
            assert_eq!(
                first.get_account(&id(account)).await.unwrap(),
                second.get_account(&id(account)).await.unwrap()
            );
            assert_eq!(
                first.get_timeline(&id(account)).await.unwrap(),
                second.get_timeline(&id(account)).await.unwrap()
            );
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Deposit(i64),
        Withdraw(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..5_000).prop_map(Op::Deposit),
            (1i64..5_000).prop_map(Op::Withdraw),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn projected_row_matches_rehydrated_account(ops in prop::collection::vec(op_strategy(), 0..25)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let store = Arc::new(InMemoryEventStore::new());
                let read_model = InMemoryReadModelStore::new();
                let dispatcher = CommandDispatcher::new(store.clone());
                let projector = Projector::new(store.clone(), read_model.clone(), POLL);

                let mut version = dispatcher
                    .open_account(id("P"), "prop", ExpectedVersion::exact(0), None)
                    .await
                    .unwrap()
                    .new_version;

                for op in ops {
                    let result = match op {
                        Op::Deposit(amount) => {
                            dispatcher.deposit(id("P"), amount, ExpectedVersion::exact(version), None).await
                        }
                        Op::Withdraw(amount) => {
                            dispatcher.withdraw(id("P"), amount, ExpectedVersion::exact(version), None).await
                        }
                    };
                    match result {
                        Ok(outcome) => version = outcome.new_version,
                        Err(DispatchError::InsufficientFunds { .. }) => {}
                        Err(other) => panic!("unexpected dispatch error: {other}"),
                    }
                }

                projector.run_cycle().await.unwrap();

                let account = dispatcher.load_account(&id("P")).await.unwrap();
                let row = read_model.get_account(&id("P")).await.unwrap().unwrap();
                assert_eq!(row.version, account.version());
                assert_eq!(row.balance, account.balance());
                assert!(row.balance >= Money::ZERO);
            });
        }
    }
}
