//! Session transitions and page initialization.
//!
//! Every identity change cancels all subscriptions before anything else, so one user's
//! snapshots can never land in the next user's mirror on a shared device.

use crate::engine::{LocalOnlyReason, RemoteOutcome, RemoteWrite, Result, SyncEngine, lock};
use crate::events::HubEvent;
use crate::identity::{
    Identity, IdentitySource, RemoteGate, SessionState, cache_identity, cached_identity,
    clear_cached_identity,
};
use crate::list::{ListKind, Page};
use crate::outbox::{self, PendingChange, PendingOp};
use crate::presenter::Notice;

use futures::{FutureExt, Stream, StreamExt};
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

/// Result of replaying the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub delivered: usize,
    /// Failed while online; reported and discarded.
    pub dropped: usize,
    /// Not attempted or failed because the client went offline again.
    pub kept: usize,
}

impl SyncEngine {
    /// React to an identity-provider state change (login, logout, reload).
    pub fn on_auth_state_changed(&self, identity: Option<Identity>) {
        let next = SessionState::from_identity(identity);
        let previous = {
            // Snapshot delivery checks its generation under this same guard.
            let _guard = self.lock_mutations();
            let cancelled = self.cancel_all_subscriptions();
            debug!("Cancelled {} subscriptions on identity change", cancelled);

            let previous = {
                let mut session = self
                    .inner
                    .session
                    .write()
                    .unwrap_or_else(|e| e.into_inner());
                let previous = std::mem::replace(&mut session.state, next.clone());
                session.source = IdentitySource::Provider;
                previous
            };

            if previous.is_authenticated() && !next.is_authenticated() {
                info!("Logged out; wiping local mirror");
                if let Err(e) = self.inner.mirror.wipe_all() {
                    error!("Failed to wipe local mirror on logout: {}", e);
                }
                self.inner.vault_unlocked.store(false, Ordering::SeqCst);
            }
            previous
        };

        info!("Session {} -> {}", previous.label(), next.label());
        self.emit(HubEvent::SessionChanged {
            state: next.label().to_string(),
            uid: next.identity().map(|id| id.uid.clone()),
        });

        let cached = match next.identity() {
            Some(identity) => cache_identity(&self.inner.mirror, identity, self.now_ms()),
            None => clear_cached_identity(&self.inner.mirror),
        };
        if let Err(e) = cached {
            warn!("Could not update cached identity: {}", e);
        }

        if next.is_verified() && self.is_online() {
            self.spawn_replay();
        }

        self.initialize_lists();
    }

    /// Consume identity-provider state changes until the stream ends.
    pub async fn drive_auth_changes<S>(&self, changes: S)
    where
        S: Stream<Item = Option<Identity>>,
    {
        let mut changes = std::pin::pin!(changes);
        while let Some(identity) = changes.next().await {
            self.on_auth_state_changed(identity);
        }
    }

    /// Show `page`: render its lists locally, then subscribe them if the gate is open.
    pub fn show_page(&self, page: Page) {
        self.show_lists(page.lists());
    }

    /// Make `lists` the active set and initialize them like a fresh page load.
    pub fn show_lists(&self, lists: &[ListKind]) {
        *lock(&self.inner.active_lists) = lists.to_vec();
        self.cancel_all_subscriptions();
        self.initialize_lists();
    }

    /// The page came back from the browser's back/forward cache.
    pub fn on_page_restored(&self) {
        debug!("Page restored; re-initializing lists");
        self.cancel_all_subscriptions();
        self.initialize_lists();
    }

    pub fn active_lists(&self) -> Vec<ListKind> {
        lock(&self.inner.active_lists).clone()
    }

    fn initialize_lists(&self) {
        let open = self.gate().is_open();
        for list in self.active_lists() {
            self.render_list(list);
            if open {
                self.listen(list);
            }
        }
    }

    /// Offline-first startup.
    ///
    /// When the network is down and no provider session exists yet, a cached identity
    /// younger than the configured maximum age seeds the session for local-only use.
    pub fn startup(&self, online: bool) -> SessionState {
        self.inner.online.store(online, Ordering::SeqCst);

        if !online && !self.session_state().is_authenticated() {
            let max_age = self.inner.config.offline_identity_max_age_ms();
            if let Some(identity) = cached_identity(&self.inner.mirror, self.now_ms(), max_age) {
                info!("Starting offline as cached identity {}", identity.uid);
                let state = SessionState::from_identity(Some(identity));
                {
                    let mut session = self
                        .inner
                        .session
                        .write()
                        .unwrap_or_else(|e| e.into_inner());
                    session.state = state.clone();
                    session.source = IdentitySource::OfflineCache;
                }
                self.emit(HubEvent::SessionChanged {
                    state: state.label().to_string(),
                    uid: state.identity().map(|id| id.uid.clone()),
                });
            }
        }

        self.initialize_lists();
        self.session_state()
    }

    /// Track connectivity. Coming back online replays the outbox in the background.
    pub fn set_network_status(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if online == was_online {
            return;
        }
        info!("Network {}", if online { "online" } else { "offline" });
        if online {
            self.spawn_replay();
        }
    }

    fn spawn_replay(&self) {
        if self.inner.outbox.is_empty() {
            return;
        }
        let engine = self.clone();
        self.inner.spawner.spawn(
            async move {
                let report = engine.replay_outbox().await;
                debug!("Outbox replay finished: {:?}", report);
            }
            .boxed(),
        );
    }

    /// Deliver queued changes of the current verified identity, oldest first.
    pub async fn replay_outbox(&self) -> ReplayReport {
        let mut report = ReplayReport::default();
        let RemoteGate::Open(identity) = self.gate() else {
            return report;
        };
        let changes = match self.inner.outbox.take_for(&identity.uid) {
            Ok(changes) => changes,
            Err(e) => {
                error!("Failed to read outbox: {}", e);
                return report;
            }
        };
        if changes.is_empty() {
            return report;
        }
        info!("Replaying {} pending changes", changes.len());

        let mut pending = changes.into_iter();
        while let Some(change) = pending.next() {
            match outbox::deliver(self.inner.remote.as_ref(), &change).await {
                Ok(()) => report.delivered += 1,
                Err(e) if !self.is_online() && e.is_connectivity() => {
                    warn!("Offline again during replay: {}", e);
                    let mut rest: Vec<PendingChange> = vec![change];
                    rest.extend(pending);
                    report.kept = rest.len();
                    if let Err(e) = self.inner.outbox.requeue(rest) {
                        error!("Failed to requeue pending changes: {}", e);
                    }
                    break;
                }
                Err(e) => {
                    error!("Dropping pending {:?} for {}: {}", change.op.action(), change.list, e);
                    self.notify(Notice::Connectivity {
                        list: change.list,
                        action: change.op.action(),
                        item: change.op.item_name().map(str::to_string),
                    });
                    report.dropped += 1;
                }
            }
        }
        report
    }

    pub fn set_vault_unlocked(&self, unlocked: bool) {
        self.inner.vault_unlocked.store(unlocked, Ordering::SeqCst);
    }

    pub fn is_vault_unlocked(&self) -> bool {
        self.inner.vault_unlocked.load(Ordering::SeqCst)
    }

    /// Forgotten vault password: wipe the vault lists and password, lock the vault.
    pub fn vault_reset(&self) -> Result<()> {
        {
            let _guard = self.lock_mutations();
            self.inner.mirror.wipe_vault()?;
            self.inner.vault_unlocked.store(false, Ordering::SeqCst);
        }
        info!("Vault reset");
        for list in ListKind::ALL.into_iter().filter(|l| l.is_vault()) {
            self.render_list(list);
        }
        Ok(())
    }

    /// Queue a clear of every remote collection for replay. The outbox was emptied by
    /// the local wipe, so the clears are its only entries.
    fn queue_remote_wipe(&self, uid: &str) -> RemoteOutcome {
        if !self.inner.config.durable_outbox {
            debug!("Remote wipe not queued: outbox disabled");
            return RemoteOutcome::Deferred;
        }
        for list in ListKind::ALL {
            let change = PendingChange {
                uid: uid.to_string(),
                list,
                op: PendingOp::Clear,
                queued_at: self.now_ms(),
            };
            if let Err(e) = self.inner.outbox.push(change) {
                error!("Failed to queue remote wipe of {}: {}", list, e);
            }
        }
        RemoteOutcome::Deferred
    }

    /// Delete every list locally and, when the gate is open, every remote collection.
    ///
    /// A session restored offline queues the remote deletes for replay instead.
    pub fn wipe_everything(&self) -> Result<RemoteWrite> {
        {
            let _guard = self.lock_mutations();
            self.inner.mirror.wipe_lists()?;
            self.inner.outbox.clear()?;
            self.inner.vault_unlocked.store(false, Ordering::SeqCst);
        }
        info!("Wiped all local lists");
        self.render_all();

        let identity = match self.gate() {
            RemoteGate::Open(identity) => identity,
            RemoteGate::LoginRequired => {
                return Ok(RemoteWrite::ready(RemoteOutcome::LocalOnly(
                    LocalOnlyReason::Anonymous,
                )));
            }
            RemoteGate::VerificationRequired => {
                return Ok(RemoteWrite::ready(RemoteOutcome::LocalOnly(
                    LocalOnlyReason::Unverified,
                )));
            }
            RemoteGate::CachedOffline(identity) => {
                return Ok(RemoteWrite::ready(self.queue_remote_wipe(&identity.uid)));
            }
        };
        let engine = self.clone();
        let task = async move {
            for list in ListKind::ALL {
                let change = PendingChange {
                    uid: identity.uid.clone(),
                    list,
                    op: PendingOp::Clear,
                    queued_at: engine.now_ms(),
                };
                if let Err(e) = outbox::send(engine.inner.remote.as_ref(), &change).await {
                    return engine.remote_failed(change, e);
                }
            }
            RemoteOutcome::Applied
        };
        Ok(RemoteWrite::pending(task.boxed(), self.inner.spawner.clone()))
    }
}
