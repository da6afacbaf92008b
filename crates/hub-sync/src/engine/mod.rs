//! SyncEngine: keeps each list's local mirror and its remote collection converging.
//!
//! Every mutation follows the same shape:
//!
//! 1. Validate and check for duplicates against the local mirror
//! 2. Apply to the local mirror, persist, and render (never waits on the network)
//! 3. Consult the remote gate; anonymous and unverified sessions stop here
//! 4. Re-check duplicates against the remote collection (add/update only)
//! 5. Apply the write remotely
//!
//! Steps 1-3 run synchronously inside the mutation critical section. Steps 4-5 are
//! returned as a [`RemoteWrite`] the caller awaits or detaches. A failed remote write
//! is never rolled back: the next subscription snapshot is the only reconciliation path.
//!
//! The engine is split across files:
//! - `mutations.rs` - add/update/delete/clear/toggle/reorder and the remote write path
//! - `subscriptions.rs` - per-list live subscriptions and snapshot reconciliation
//! - `transfer.rs` - import merge and export
//! - `session.rs` (crate root) - identity transitions and page initialization

mod mutations;
mod subscriptions;
mod transfer;

pub use mutations::{LocalOnlyReason, RemoteOutcome, ReorderOutcome};
pub use subscriptions::{SnapshotOutcome, SubscriptionHandle};
pub use transfer::ImportReport;

use crate::clock::Clock;
use crate::config::HubConfig;
use crate::events::{EventBus, HubEvent};
use crate::identity::{IdentitySource, RemoteGate, SessionState};
use crate::item::{DuplicateKey, Item, ValidationError};
use crate::list::ListKind;
use crate::mirror::LocalMirror;
use crate::outbox::Outbox;
use crate::presenter::{LastUpdated, ListView, Notice, Presenter};
use crate::remote::{RemoteError, RemoteStore};
use crate::store::{KeyValueStore, StoreError};

use futures::future::{self, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::fmt;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid item: {0}")]
    Validation(#[from] ValidationError),

    #[error("Duplicate entry in {list}: {key}")]
    Duplicate { list: ListKind, key: DuplicateKey },

    #[error("Login required")]
    AuthRequired,

    #[error("Email verification required")]
    Unverified,

    #[error("Remote unavailable: {0}")]
    RemoteConnectivity(#[from] RemoteError),

    #[error("Import failed: {0}")]
    ImportFormat(String),

    #[error("An import is already running")]
    ImportInProgress,

    #[error("No item {name:?} in {list}")]
    NotFound { list: ListKind, name: String },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Runs background work (remote writes, subscription pumps) on the host's executor.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

impl<F> TaskSpawner for F
where
    F: Fn(BoxFuture<'static, ()>) + Send + Sync,
{
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self(task)
    }
}

/// Everything the engine talks to.
pub struct Collaborators {
    pub store: Arc<dyn KeyValueStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub presenter: Arc<dyn Presenter>,
    pub spawner: Arc<dyn TaskSpawner>,
    pub clock: Arc<dyn Clock>,
}

/// The remote half of a mutation.
///
/// Await it to learn the outcome, or [`detach`](RemoteWrite::detach) it to let it run
/// in the background. Dropping it without either skips the remote write.
#[must_use = "remote writes do nothing unless awaited or detached"]
pub struct RemoteWrite {
    inner: WriteState,
}

enum WriteState {
    Ready(RemoteOutcome),
    Pending {
        task: BoxFuture<'static, RemoteOutcome>,
        spawner: Arc<dyn TaskSpawner>,
    },
}

impl RemoteWrite {
    pub(crate) fn ready(outcome: RemoteOutcome) -> Self {
        Self {
            inner: WriteState::Ready(outcome),
        }
    }

    pub(crate) fn pending(
        task: BoxFuture<'static, RemoteOutcome>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        Self {
            inner: WriteState::Pending { task, spawner },
        }
    }

    /// Whether a remote call is still to be made.
    pub fn is_pending(&self) -> bool {
        matches!(self.inner, WriteState::Pending { .. })
    }

    /// The outcome, if it was decided without a remote call.
    pub fn outcome(&self) -> Option<&RemoteOutcome> {
        match &self.inner {
            WriteState::Ready(outcome) => Some(outcome),
            WriteState::Pending { .. } => None,
        }
    }

    /// Run the remote write in the background.
    pub fn detach(self) {
        if let WriteState::Pending { task, spawner } = self.inner {
            spawner.spawn(task.map(|_| ()).boxed());
        }
    }
}

impl fmt::Debug for RemoteWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            WriteState::Ready(outcome) => f.debug_tuple("Ready").field(outcome).finish(),
            WriteState::Pending { .. } => f.write_str("Pending"),
        }
    }
}

impl IntoFuture for RemoteWrite {
    type Output = RemoteOutcome;
    type IntoFuture = BoxFuture<'static, RemoteOutcome>;

    fn into_future(self) -> Self::IntoFuture {
        match self.inner {
            WriteState::Ready(outcome) => future::ready(outcome).boxed(),
            WriteState::Pending { task, .. } => task,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SessionContext {
    pub(crate) state: SessionState,
    pub(crate) source: IdentitySource,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ImportState {
    pub(crate) in_progress: bool,
    pub(crate) started_at_ms: Option<u64>,
}

pub(crate) struct ActiveSubscription {
    pub(crate) generation: u64,
    pub(crate) handle: SubscriptionHandle,
}

pub(crate) struct EngineInner {
    pub(crate) mirror: LocalMirror,
    pub(crate) outbox: Outbox,
    pub(crate) remote: Arc<dyn RemoteStore>,
    pub(crate) presenter: Arc<dyn Presenter>,
    pub(crate) spawner: Arc<dyn TaskSpawner>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: HubConfig,
    pub(crate) events: Arc<EventBus>,
    /// Held for the synchronous local half of every mutation and snapshot.
    pub(crate) mutations: Mutex<()>,
    pub(crate) session: RwLock<SessionContext>,
    pub(crate) online: AtomicBool,
    pub(crate) import: Mutex<ImportState>,
    pub(crate) subscriptions: Mutex<HashMap<ListKind, ActiveSubscription>>,
    pub(crate) next_generation: AtomicU64,
    pub(crate) active_lists: Mutex<Vec<ListKind>>,
    pub(crate) vault_unlocked: AtomicBool,
}

/// The sync engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) inner: Arc<EngineInner>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SyncEngine {
    pub fn new(collaborators: Collaborators, config: HubConfig) -> Self {
        let mirror = LocalMirror::new(collaborators.store);
        let inner = EngineInner {
            outbox: Outbox::new(mirror.clone()),
            mirror,
            remote: collaborators.remote,
            presenter: collaborators.presenter,
            spawner: collaborators.spawner,
            clock: collaborators.clock,
            config,
            events: Arc::new(EventBus::new()),
            mutations: Mutex::new(()),
            session: RwLock::new(SessionContext::default()),
            online: AtomicBool::new(true),
            import: Mutex::new(ImportState::default()),
            subscriptions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            active_lists: Mutex::new(Vec::new()),
            vault_unlocked: AtomicBool::new(false),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn mirror(&self) -> &LocalMirror {
        &self.inner.mirror
    }

    pub fn outbox(&self) -> &Outbox {
        &self.inner.outbox
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Current contents of `list` in the local mirror.
    pub fn items(&self, list: ListKind) -> Vec<Item> {
        self.inner.mirror.list(list)
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn session_state(&self) -> SessionState {
        self.session().state
    }

    pub fn identity_source(&self) -> IdentitySource {
        self.session().source
    }

    pub(crate) fn session(&self) -> SessionContext {
        self.inner
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn gate(&self) -> RemoteGate {
        let session = self.session();
        RemoteGate::evaluate(&session.state, session.source)
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    pub(crate) fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        lock(&self.inner.mutations)
    }

    pub(crate) fn notices_muted(&self) -> bool {
        lock(&self.inner.import).in_progress
    }

    /// Show `notice` unless an import is running; imports report one summary instead.
    pub(crate) fn notify(&self, notice: Notice) {
        if self.notices_muted() {
            debug!("Muted during import: {}", notice);
            return;
        }
        self.inner.presenter.notify(&notice);
    }

    pub(crate) fn emit(&self, event: HubEvent) {
        self.inner.events.emit(event);
    }

    pub fn view(&self, list: ListKind) -> ListView {
        let last_updated = if self.session().state.is_verified() {
            LastUpdated::CloudSync
        } else {
            match self.inner.mirror.last_updated(list) {
                Some(at) => LastUpdated::At(at),
                None => LastUpdated::Never,
            }
        };
        ListView {
            list,
            items: self.inner.mirror.list(list),
            last_updated,
        }
    }

    /// Render `list` from the local mirror.
    pub fn render_list(&self, list: ListKind) {
        self.inner.presenter.render(&self.view(list));
    }

    /// Render every known list from the local mirror.
    pub fn render_all(&self) {
        for list in ListKind::ALL {
            self.render_list(list);
        }
    }

    /// Persist `items` as the new contents of `list` and render them.
    pub(crate) fn commit_local(&self, list: ListKind, items: &[Item]) -> Result<()> {
        self.inner.mirror.save(list, items, self.now_ms()).map_err(|e| {
            error!("Failed to persist {}: {}", list, e);
            SyncError::Store(e)
        })?;
        self.render_list(list);
        Ok(())
    }
}
