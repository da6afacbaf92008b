//! Shared harness for hub-sync integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use hub_sync::{
    Collaborators, HubConfig, Identity, InMemoryRemote, InMemoryStore, ListKind, ListView,
    ManualClock, Notice, Presenter, SyncEngine, TaskSpawner,
};

/// 2026-10-16T12:00:00Z
pub const START_MS: u64 = 1_792_152_000_000;

/// Presenter that records everything it is asked to show.
#[derive(Default)]
pub struct RecordingPresenter {
    renders: Mutex<Vec<ListView>>,
    notices: Mutex<Vec<Notice>>,
    loading: Mutex<Vec<ListKind>>,
}

impl RecordingPresenter {
    pub fn renders(&self) -> Vec<ListView> {
        self.renders.lock().unwrap().clone()
    }

    /// The most recent render of `list`.
    pub fn last_render(&self, list: ListKind) -> Option<ListView> {
        self.renders
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|v| v.list == list)
            .cloned()
    }

    pub fn rendered_names(&self, list: ListKind) -> Vec<String> {
        self.last_render(list)
            .map(|v| v.items.iter().map(|i| i.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn loading(&self) -> Vec<ListKind> {
        self.loading.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.renders.lock().unwrap().clear();
        self.notices.lock().unwrap().clear();
        self.loading.lock().unwrap().clear();
    }
}

impl Presenter for RecordingPresenter {
    fn render(&self, view: &ListView) {
        self.renders.lock().unwrap().push(view.clone());
    }

    fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }

    fn loading(&self, list: ListKind) {
        self.loading.lock().unwrap().push(list);
    }
}

pub struct Harness {
    pub engine: SyncEngine,
    pub store: Arc<InMemoryStore>,
    pub remote: Arc<InMemoryRemote>,
    pub presenter: Arc<RecordingPresenter>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    pub fn with_config(config: HubConfig) -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()), config)
    }

    pub fn with_store(store: Arc<InMemoryStore>, config: HubConfig) -> Self {
        let remote = Arc::new(InMemoryRemote::new());
        let presenter = Arc::new(RecordingPresenter::default());
        let clock = Arc::new(ManualClock::new(START_MS));
        let spawner: Arc<dyn TaskSpawner> = Arc::new(|task: BoxFuture<'static, ()>| {
            tokio::spawn(task);
        });
        let engine = SyncEngine::new(
            Collaborators {
                store: store.clone(),
                remote: remote.clone(),
                presenter: presenter.clone(),
                spawner,
                clock: clock.clone(),
            },
            config,
        );
        Self {
            engine,
            store,
            remote,
            presenter,
            clock,
        }
    }

    /// A harness already signed in as a verified user and showing `lists`.
    pub async fn verified(lists: &[ListKind]) -> Self {
        let harness = Self::new();
        harness.engine.show_lists(lists);
        harness.engine.on_auth_state_changed(Some(verified_user("u1")));
        settle().await;
        harness
    }
}

pub fn verified_user(uid: &str) -> Identity {
    Identity::new(uid).with_email(format!("{}@example.com", uid)).verified()
}

pub fn unverified_user(uid: &str) -> Identity {
    Identity::new(uid).with_email(format!("{}@example.com", uid))
}

/// Let spawned pumps and remote writes run to quiescence.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub fn names(items: &[hub_sync::Item]) -> Vec<&str> {
    items.iter().map(|i| i.name.as_str()).collect()
}
