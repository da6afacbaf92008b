//! hub-cli library: wiring for the `hub` binary, exposed for tests.

pub mod config;
pub mod file_store;
pub mod offline_remote;
pub mod terminal;

pub use config::{CliConfig, ConfigError};
pub use file_store::FileStore;
pub use offline_remote::OfflineRemote;
pub use terminal::TerminalPresenter;

use futures::future::BoxFuture;
use hub_sync::{
    Collaborators, HubConfig, KeyValueStore, Presenter, SyncEngine, SystemClock, TaskSpawner,
};
use std::sync::Arc;

/// Spawner running engine tasks on the ambient Tokio runtime.
pub fn tokio_spawner() -> Arc<dyn TaskSpawner> {
    Arc::new(|task: BoxFuture<'static, ()>| {
        tokio::spawn(task);
    })
}

/// A local-first engine over `store` with no remote backend.
pub fn build_engine(store: Arc<dyn KeyValueStore>, presenter: Arc<dyn Presenter>) -> SyncEngine {
    SyncEngine::new(
        Collaborators {
            store,
            remote: Arc::new(OfflineRemote),
            presenter,
            spawner: tokio_spawner(),
            clock: Arc::new(SystemClock),
        },
        HubConfig::default(),
    )
}
