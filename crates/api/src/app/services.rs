use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use ledgerflow_infra::{
    command_dispatcher::CommandDispatcher,
    config::LedgerConfig,
    db,
    event_store::{EventStore, InMemoryEventStore, SqliteEventStore},
    read_model::{InMemoryReadModelStore, ReadModelStore, SqliteReadModelStore},
    workers::Projector,
};

pub type SharedEventStore = Arc<dyn EventStore>;
pub type SharedReadModel = Arc<dyn ReadModelStore>;

/// Store handles shared by every request handler and the projector.
pub struct AppServices {
    dispatcher: CommandDispatcher<SharedEventStore>,
    read_model: SharedReadModel,
}

impl AppServices {
    pub fn new(event_store: SharedEventStore, read_model: SharedReadModel) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(event_store),
            read_model,
        }
    }

    /// Both stores in memory (tests/dev).
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryReadModelStore::new()),
        )
    }

    /// Both stores as SQLite files under the configured data directory.
    pub async fn open_sqlite(config: &LedgerConfig) -> anyhow::Result<Self> {
        let event_path = config.event_store_path();
        let event_pool = db::open_file(&event_path)
            .await
            .with_context(|| format!("failed to open {}", event_path.display()))?;
        let event_store = SqliteEventStore::new(event_pool).await?;

        let read_path = config.read_model_path();
        let read_pool = db::open_file(&read_path)
            .await
            .with_context(|| format!("failed to open {}", read_path.display()))?;
        let read_model = SqliteReadModelStore::new(read_pool).await?;

        Ok(Self::new(Arc::new(event_store), Arc::new(read_model)))
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<SharedEventStore> {
        &self.dispatcher
    }

    pub fn event_store(&self) -> &SharedEventStore {
        self.dispatcher.store()
    }

    pub fn read_model(&self) -> &SharedReadModel {
        &self.read_model
    }

    /// A projector over these services' stores.
    pub fn projector(&self, poll_interval: Duration) -> Projector<SharedEventStore, SharedReadModel> {
        Projector::new(
            self.event_store().clone(),
            self.read_model.clone(),
            poll_interval,
        )
    }
}
