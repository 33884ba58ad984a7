use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ledgerflow_core::{AggregateId, ExpectedVersion};
use ledgerflow_infra::command_dispatcher::CommandDispatcher;
use ledgerflow_infra::db;
use ledgerflow_infra::event_store::{EventStore, InMemoryEventStore, SqliteEventStore, UncommittedEvent};
use ledgerflow_infra::read_model::InMemoryReadModelStore;
use ledgerflow_infra::workers::Projector;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn deposit_event(account: &AggregateId, amount: i64) -> UncommittedEvent {
    UncommittedEvent {
        aggregate_id: account.clone(),
        event_type: "MoneyDeposited".to_string(),
        schema_version: 1,
        correlation_id: None,
        payload: json!({ "amount": amount }),
    }
}

/// An open account with `deposits` deposits on top.
async fn seeded_dispatcher(deposits: u64) -> (CommandDispatcher<Arc<InMemoryEventStore>>, AggregateId) {
    let store = Arc::new(InMemoryEventStore::new());
    let dispatcher = CommandDispatcher::new(store);
    let account = AggregateId::new("bench-account").unwrap();
    dispatcher
        .open_account(account.clone(), "bench", ExpectedVersion::exact(0), None)
        .await
        .unwrap();
    for v in 1..=deposits {
        dispatcher
            .deposit(account.clone(), 100, ExpectedVersion::exact(v), None)
            .await
            .unwrap();
    }
    (dispatcher, account)
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("command_execution_latency");
    group.sample_size(200);

    for history in [0u64, 100, 1_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("deposit_with_history", history),
            history,
            |b, &history| {
                let (dispatcher, account) = rt.block_on(seeded_dispatcher(history));
                let version = AtomicU64::new(history + 1);
                b.iter(|| {
                    let expected = version.load(Ordering::Relaxed);
                    let outcome = rt
                        .block_on(dispatcher.deposit(
                            account.clone(),
                            black_box(100),
                            ExpectedVersion::exact(expected),
                            None,
                        ))
                        .unwrap();
                    version.store(outcome.new_version, Ordering::Relaxed);
                });
            },
        );
    }

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("event_append_throughput");
    group.throughput(Throughput::Elements(1));

    group.bench_function("in_memory", |b| {
        let store = InMemoryEventStore::new();
        let account = AggregateId::new("append-mem").unwrap();
        let mut version = 0u64;
        b.iter(|| {
            let appended = rt
                .block_on(store.append(deposit_event(&account, 1), ExpectedVersion::exact(version)))
                .unwrap();
            version = appended.new_version;
        });
    });

    group.bench_function("sqlite_file", |b| {
        let dir = tempfile::tempdir().unwrap();
        let pool = rt
            .block_on(db::open_file(&dir.path().join("event_store.db")))
            .unwrap();
        let store = rt.block_on(SqliteEventStore::new(pool)).unwrap();
        let account = AggregateId::new("append-sqlite").unwrap();
        let mut version = 0u64;
        b.iter(|| {
            let appended = rt
                .block_on(store.append(deposit_event(&account, 1), ExpectedVersion::exact(version)))
                .unwrap();
            version = appended.new_version;
        });
    });

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for event_count in [100u64, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*event_count));
        group.bench_with_input(
            BenchmarkId::from_parameter(event_count),
            event_count,
            |b, &event_count| {
                let (dispatcher, _) = rt.block_on(seeded_dispatcher(event_count - 1));
                let store = dispatcher.store().clone();
                b.iter(|| {
                    let projector = Projector::new(
                        store.clone(),
                        InMemoryReadModelStore::new(),
                        Duration::from_millis(250),
                    );
                    let report = rt.block_on(projector.run_cycle()).unwrap();
                    black_box(report);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_event_append_throughput,
    bench_projection_rebuild_speed
);
criterion_main!(benches);
