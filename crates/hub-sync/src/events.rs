//! Event infrastructure for hub-sync.
//!
//! Provides `HubEvent` for debug/monitoring and `EventBus` for subscriptions.
//! Events are serializable so a host can forward them to a devtools panel or log sink.

use crate::list::ListKind;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Engine events emitted for real-time monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubEvent {
    /// A subscription snapshot replaced a list's local mirror.
    SnapshotApplied {
        list: ListKind,
        items: usize,
        /// Milliseconds since Unix epoch.
        timestamp: u64,
    },
    /// A subscription snapshot was ignored.
    SnapshotSkipped {
        list: ListKind,
        reason: String,
        timestamp: u64,
    },
    SubscriptionOpened {
        list: ListKind,
        generation: u64,
    },
    SubscriptionClosed {
        list: ListKind,
        generation: u64,
    },
    /// A remote write did not go through.
    RemoteWriteFailed {
        list: ListKind,
        item: String,
        /// Queued for replay instead of surfaced to the user.
        deferred: bool,
        error: String,
    },
    SessionChanged {
        /// `anonymous`, `unverified` or `verified`.
        state: String,
        uid: Option<String>,
    },
    ImportFinished {
        added: usize,
        skipped: usize,
        ok: bool,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events; drop it to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(&HubEvent) + Send + Sync>;

/// Event bus for publishing engine events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&HubEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while an emit holds the read lock during unwinding.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    pub fn emit(&self, event: HubEvent) {
        // Snapshot the callbacks so a callback may subscribe without deadlocking.
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
