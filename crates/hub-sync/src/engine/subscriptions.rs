//! Live subscriptions and snapshot reconciliation.
//!
//! At most one subscription per list. Each is tagged with a generation; a pump whose
//! generation no longer matches the table entry stops without touching the mirror.

use super::{ActiveSubscription, EngineInner, Result, SyncEngine, SyncError, lock};
use crate::events::HubEvent;
use crate::identity::RemoteGate;
use crate::item::Item;
use crate::list::ListKind;
use crate::presenter::Notice;
use crate::remote::{CollectionPath, RemoteDoc, RemoteError, SnapshotStream};

use futures::StreamExt;
use futures::future::{AbortHandle, Abortable, FutureExt};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// What happened to a delivered snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The snapshot replaced the local mirror; holds the new item count.
    Applied(usize),
    /// An import is running; snapshots are ignored until it finishes.
    SuppressedDuringImport,
    /// Smaller than the local mirror within the window after an import started.
    DiscardedRacingImport,
    /// Delivered by a subscription that has since been replaced or cancelled, or read
    /// for an identity that is no longer signed in.
    Stale,
}

/// Cancels a subscription pump. Cancelling twice is harmless; dropping cancels.
#[derive(Debug)]
pub struct SubscriptionHandle {
    abort: AbortHandle,
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.abort.is_aborted()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

impl SyncEngine {
    /// (Re)subscribe `list` to its remote collection.
    ///
    /// Any subscription already held for `list` is cancelled first, whatever the gate
    /// says. Returns whether a new subscription was opened.
    pub fn listen(&self, list: ListKind) -> bool {
        let mut table = lock(&self.inner.subscriptions);
        if let Some(previous) = table.remove(&list) {
            previous.handle.cancel();
            self.emit(HubEvent::SubscriptionClosed {
                list,
                generation: previous.generation,
            });
        }

        let RemoteGate::Open(identity) = self.gate() else {
            debug!("Not subscribing {}: remote gate closed", list);
            return false;
        };

        let path = CollectionPath::new(identity.uid, list);
        if self.inner.mirror.list(list).is_empty() {
            self.inner.presenter.loading(list);
        }

        let stream = self.inner.remote.subscribe(&path);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (abort, registration) = AbortHandle::new_pair();
        table.insert(
            list,
            ActiveSubscription {
                generation,
                handle: SubscriptionHandle { abort },
            },
        );
        drop(table);

        let pump = Abortable::new(
            pump(Arc::downgrade(&self.inner), list, generation, stream),
            registration,
        );
        self.inner.spawner.spawn(
            async move {
                let _ = pump.await;
            }
            .boxed(),
        );

        info!("Subscribed to {} (generation {})", path, generation);
        self.emit(HubEvent::SubscriptionOpened { list, generation });
        true
    }

    /// Cancel every held subscription. Returns how many were cancelled.
    pub fn cancel_all_subscriptions(&self) -> usize {
        let drained: Vec<(ListKind, ActiveSubscription)> =
            lock(&self.inner.subscriptions).drain().collect();
        for (list, active) in &drained {
            active.handle.cancel();
            debug!("Cancelled subscription for {}", list);
            self.emit(HubEvent::SubscriptionClosed {
                list: *list,
                generation: active.generation,
            });
        }
        drained.len()
    }

    /// Lists with a live subscription, in declaration order.
    pub fn active_subscriptions(&self) -> Vec<ListKind> {
        let mut lists: Vec<ListKind> = lock(&self.inner.subscriptions).keys().copied().collect();
        lists.sort();
        lists
    }

    fn is_current(&self, list: ListKind, generation: u64) -> bool {
        lock(&self.inner.subscriptions)
            .get(&list)
            .is_some_and(|active| active.generation == generation)
    }

    /// Reconcile `list` with a full remote snapshot.
    ///
    /// The snapshot replaces the local mirror wholesale, except while an import is
    /// running (ignored) or when it is smaller than the mirror within the race window
    /// after an import started (discarded as a partial server view).
    pub fn apply_snapshot(&self, list: ListKind, docs: Vec<RemoteDoc>) -> SnapshotOutcome {
        let _guard = self.lock_mutations();
        self.apply_snapshot_locked(list, docs)
    }

    /// [`apply_snapshot`](SyncEngine::apply_snapshot) with the mutation guard already held.
    fn apply_snapshot_locked(&self, list: ListKind, mut docs: Vec<RemoteDoc>) -> SnapshotOutcome {
        let now = self.now_ms();
        let import = *lock(&self.inner.import);

        if import.in_progress {
            debug!("Ignoring {} snapshot during import", list);
            self.skipped(list, "import in progress", now);
            return SnapshotOutcome::SuppressedDuringImport;
        }

        let local_len = self.inner.mirror.list(list).len();
        let racing = import.started_at_ms.is_some_and(|started| {
            now.saturating_sub(started) < self.inner.config.import_race_window_ms()
        });
        if racing && docs.len() < local_len {
            warn!(
                "Skipping early {} snapshot (server {} < local {})",
                list,
                docs.len(),
                local_len
            );
            self.skipped(list, "smaller than local mirror after import", now);
            return SnapshotOutcome::DiscardedRacingImport;
        }

        docs.sort_by_key(|d| d.timestamp);
        let items: Vec<Item> = docs.into_iter().map(Item::from).collect();
        let count = items.len();
        if let Err(e) = self.commit_local(list, &items) {
            error!("Failed to apply {} snapshot: {}", list, e);
        }
        self.emit(HubEvent::SnapshotApplied {
            list,
            items: count,
            timestamp: now,
        });
        SnapshotOutcome::Applied(count)
    }

    fn skipped(&self, list: ListKind, reason: &str, now: u64) {
        self.emit(HubEvent::SnapshotSkipped {
            list,
            reason: reason.to_string(),
            timestamp: now,
        });
    }

    /// Identity changes cancel subscriptions under the mutation guard, so the
    /// generation is checked under it too.
    fn deliver_snapshot(&self, list: ListKind, generation: u64, docs: Vec<RemoteDoc>) -> SnapshotOutcome {
        let _guard = self.lock_mutations();
        if !self.is_current(list, generation) {
            debug!("Dropping stale {} snapshot (generation {})", list, generation);
            return SnapshotOutcome::Stale;
        }
        self.apply_snapshot_locked(list, docs)
    }

    /// The subscription for `list` failed: fall back to the local mirror and let it go.
    fn subscription_failed(&self, list: ListKind, generation: u64, err: RemoteError) {
        error!("Subscription for {} failed: {}", list, err);
        if self.is_online() {
            self.notify(Notice::LoadFailed { list });
        }
        self.render_list(list);

        let mut table = lock(&self.inner.subscriptions);
        if table.get(&list).is_some_and(|a| a.generation == generation) {
            table.remove(&list);
            drop(table);
            self.emit(HubEvent::SubscriptionClosed { list, generation });
        }
    }

    /// Read `list` from the remote collection once and reconcile it like a snapshot.
    pub async fn refresh(&self, list: ListKind) -> Result<SnapshotOutcome> {
        let identity = match self.gate() {
            RemoteGate::Open(identity) => identity,
            RemoteGate::LoginRequired => return Err(SyncError::AuthRequired),
            RemoteGate::VerificationRequired => return Err(SyncError::Unverified),
            RemoteGate::CachedOffline(_) => {
                return Err(SyncError::RemoteConnectivity(RemoteError::Unavailable(
                    "session restored offline".to_string(),
                )));
            }
        };
        let path = CollectionPath::new(identity.uid.clone(), list);
        let docs = self.inner.remote.ordered_read(&path).await?;

        let _guard = self.lock_mutations();
        match self.gate() {
            RemoteGate::Open(current) if current.uid == identity.uid => {
                Ok(self.apply_snapshot_locked(list, docs))
            }
            _ => {
                debug!("Dropping {} read: identity changed", path);
                Ok(SnapshotOutcome::Stale)
            }
        }
    }
}

async fn pump(
    engine: Weak<EngineInner>,
    list: ListKind,
    generation: u64,
    mut stream: SnapshotStream,
) {
    while let Some(delivery) = stream.next().await {
        let Some(inner) = engine.upgrade() else {
            return;
        };
        let live = SyncEngine { inner };
        match delivery {
            Ok(docs) => {
                if live.deliver_snapshot(list, generation, docs) == SnapshotOutcome::Stale {
                    return;
                }
            }
            Err(e) => {
                if live.is_current(list, generation) {
                    live.subscription_failed(list, generation, e);
                }
                return;
            }
        }
    }
    debug!("Snapshot stream for {} ended", list);
}
