use super::{RemoteWrite, Result, SyncEngine, SyncError};
use crate::events::HubEvent;
use crate::identity::{RemoteGate, SessionState};
use crate::item::{DuplicateKey, Item, ItemDraft, ItemFields, ValidationError};
use crate::list::{ItemShape, ListKind};
use crate::outbox::{self, PendingChange, PendingOp};
use crate::presenter::Notice;
use crate::remote::{CollectionPath, RemoteError};

use futures::FutureExt;
use tracing::{debug, error, warn};

/// Why a mutation never reached the remote collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOnlyReason {
    Anonymous,
    Unverified,
    /// The item has no remote id yet, so there is nothing to address remotely.
    NotYetSynced,
}

/// How the remote half of a mutation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    LocalOnly(LocalOnlyReason),
    Applied,
    /// The remote collection already holds the name; the next snapshot supersedes the
    /// optimistic local change.
    Duplicate,
    /// Not delivered now; queued for replay when possible.
    Deferred,
    Failed(RemoteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOutcome {
    Moved,
    Unchanged,
    /// Remote sync is active; order is by server timestamp and cannot be changed.
    VisualOnly,
}

pub(crate) enum RemoteChange {
    Deliver(PendingOp),
    /// The item was never confirmed remotely.
    Unsynced {
        name: String,
        key: DuplicateKey,
        follow_up: FollowUp,
    },
}

/// What an unsynced item's change means for a queued add of that item.
pub(crate) enum FollowUp {
    Replace(ItemFields),
    Drop,
    Move { to: ListKind, fields: ItemFields },
}

/// Locate `target` in `items`: by remote id when it has one, otherwise by duplicate key.
fn position_of(items: &[Item], target: &Item, shape: ItemShape) -> Option<usize> {
    let by_id = target
        .id
        .as_deref()
        .and_then(|id| items.iter().position(|i| i.id.as_deref() == Some(id)));
    by_id.or_else(|| {
        let key = target.key(shape);
        items.iter().position(|i| i.key(shape) == key)
    })
}

impl SyncEngine {
    /// Add an item to `list`.
    ///
    /// Rejected with [`SyncError::Duplicate`] if the name (or name+url for bookmarks) is
    /// already in the list. For anime lists the check spans both watching and completed.
    pub fn add(&self, list: ListKind, draft: ItemDraft) -> Result<RemoteWrite> {
        let fields = draft.normalize(list)?;
        let shape = list.shape();
        let key = fields.key(shape);

        {
            let _guard = self.lock_mutations();
            let taken = list
                .duplicate_scope()
                .into_iter()
                .any(|scope| self.inner.mirror.list(scope).iter().any(|i| i.key(shape) == key));
            if taken {
                debug!("Rejecting duplicate {} in {}", key, list);
                self.notify(Notice::Duplicate {
                    list,
                    name: fields.name.clone(),
                    remote: false,
                });
                return Err(SyncError::Duplicate { list, key });
            }

            let mut items = self.inner.mirror.list(list);
            items.push(Item::from_fields(fields.clone()));
            self.commit_local(list, &items)?;
            if let Some(other) = list.status_counterpart() {
                self.render_list(other);
            }
        }

        Ok(self.remote_write(list, RemoteChange::Deliver(PendingOp::Add { fields })))
    }

    /// Replace `existing` in `list` with `draft`.
    ///
    /// An anime item keeps its completion flag unless the draft sets one. The duplicate
    /// check covers the same scope as [`add`](SyncEngine::add), ignoring `existing`.
    pub fn update(&self, list: ListKind, existing: &Item, draft: ItemDraft) -> Result<RemoteWrite> {
        let explicit_completed = draft.completed.is_some();
        let mut fields = draft.normalize(list)?;
        let shape = list.shape();
        if shape == ItemShape::Anime && !explicit_completed && existing.completed.is_some() {
            fields.completed = existing.completed;
        }
        let key = fields.key(shape);

        let id = {
            let _guard = self.lock_mutations();
            let mut items = self.inner.mirror.list(list);
            let idx = position_of(&items, existing, shape).ok_or_else(|| SyncError::NotFound {
                list,
                name: existing.name.clone(),
            })?;

            let clash = list.duplicate_scope().into_iter().any(|scope| {
                if scope == list {
                    items
                        .iter()
                        .enumerate()
                        .any(|(i, item)| i != idx && item.key(shape) == key)
                } else {
                    self.inner.mirror.list(scope).iter().any(|i| i.key(shape) == key)
                }
            });
            if clash {
                self.notify(Notice::Duplicate {
                    list,
                    name: fields.name.clone(),
                    remote: false,
                });
                return Err(SyncError::Duplicate { list, key });
            }

            let id = items[idx].id.clone();
            let timestamp = items[idx].timestamp;
            items[idx] = Item {
                id: id.clone(),
                timestamp,
                ..Item::from_fields(fields.clone())
            };
            self.commit_local(list, &items)?;
            id
        };

        let change = match id {
            Some(id) => RemoteChange::Deliver(PendingOp::Update { id, fields }),
            None => RemoteChange::Unsynced {
                name: existing.name.clone(),
                key: existing.key(shape),
                follow_up: FollowUp::Replace(fields),
            },
        };
        Ok(self.remote_write(list, change))
    }

    pub fn delete(&self, list: ListKind, existing: &Item) -> Result<RemoteWrite> {
        let shape = list.shape();
        let removed = {
            let _guard = self.lock_mutations();
            let mut items = self.inner.mirror.list(list);
            let idx = position_of(&items, existing, shape).ok_or_else(|| SyncError::NotFound {
                list,
                name: existing.name.clone(),
            })?;
            let removed = items.remove(idx);
            self.commit_local(list, &items)?;
            removed
        };

        let change = match removed.id.clone() {
            Some(id) => RemoteChange::Deliver(PendingOp::Delete { id }),
            None => RemoteChange::Unsynced {
                key: removed.key(shape),
                name: removed.name,
                follow_up: FollowUp::Drop,
            },
        };
        Ok(self.remote_write(list, change))
    }

    /// Empty `list` locally and batch-delete every document of its remote collection.
    pub fn clear(&self, list: ListKind) -> Result<RemoteWrite> {
        {
            let _guard = self.lock_mutations();
            self.commit_local(list, &[])?;
        }
        Ok(self.remote_write(list, RemoteChange::Deliver(PendingOp::Clear)))
    }

    /// Move `existing` to the other half of its status split (watching/completed).
    ///
    /// Unverified sessions are rejected before anything changes. Remotely this is one
    /// atomic batch: delete from the source collection, then set under the same id in
    /// the target collection.
    pub fn toggle_status(&self, list: ListKind, existing: &Item) -> Result<RemoteWrite> {
        let to = list
            .status_counterpart()
            .ok_or(ValidationError::NoStatusCounterpart(list))?;
        if let SessionState::Unverified(_) = self.session_state() {
            self.notify(Notice::VerificationRequired);
            return Err(SyncError::Unverified);
        }

        let shape = list.shape();
        let moved = {
            let _guard = self.lock_mutations();
            let mut from_items = self.inner.mirror.list(list);
            let idx = position_of(&from_items, existing, shape).ok_or_else(|| {
                SyncError::NotFound {
                    list,
                    name: existing.name.clone(),
                }
            })?;
            let mut to_items = self.inner.mirror.list(to);
            let key = from_items[idx].key(shape);
            if to_items.iter().any(|i| i.key(shape) == key) {
                debug!("Rejecting toggle of {}: already in {}", key, to);
                self.notify(Notice::Duplicate {
                    list: to,
                    name: from_items[idx].name.clone(),
                    remote: false,
                });
                return Err(SyncError::Duplicate { list: to, key });
            }

            let item = from_items.remove(idx);
            let moved = Item {
                completed: Some(to == ListKind::Completed),
                ..item
            };
            to_items.push(moved.clone());
            self.commit_local(list, &from_items)?;
            self.commit_local(to, &to_items)?;
            moved
        };

        let fields = moved.fields();
        let change = match moved.id.clone() {
            Some(id) => RemoteChange::Deliver(PendingOp::Toggle { id, to, fields }),
            None => RemoteChange::Unsynced {
                key: moved.key(shape),
                name: moved.name,
                follow_up: FollowUp::Move { to, fields },
            },
        };
        Ok(self.remote_write(list, change))
    }

    /// Move `dragged` to the position of `target` within `list`.
    ///
    /// Local only. While a verified identity is active the remote order (by server
    /// timestamp) is authoritative, so the list is left alone and a notice is shown.
    pub fn reorder(&self, list: ListKind, dragged: &Item, target: &Item) -> Result<ReorderOutcome> {
        if self.session_state().is_verified() {
            self.notify(Notice::ReorderVisualOnly);
            return Ok(ReorderOutcome::VisualOnly);
        }

        let shape = list.shape();
        let _guard = self.lock_mutations();
        let mut items = self.inner.mirror.list(list);
        let not_found = |item: &Item| SyncError::NotFound {
            list,
            name: item.name.clone(),
        };
        let from = position_of(&items, dragged, shape).ok_or_else(|| not_found(dragged))?;
        let to = position_of(&items, target, shape).ok_or_else(|| not_found(target))?;
        if from == to {
            return Ok(ReorderOutcome::Unchanged);
        }

        let item = items.remove(from);
        items.insert(to, item);
        self.commit_local(list, &items)?;
        Ok(ReorderOutcome::Moved)
    }

    /// Decide what happens remotely for a change already applied locally.
    pub(crate) fn remote_write(&self, list: ListKind, change: RemoteChange) -> RemoteWrite {
        match self.gate() {
            RemoteGate::LoginRequired => {
                debug!("Change to {} kept local: no identity", list);
                self.notify(Notice::LoginRequired);
                RemoteWrite::ready(RemoteOutcome::LocalOnly(LocalOnlyReason::Anonymous))
            }
            RemoteGate::VerificationRequired => {
                debug!("Change to {} kept local: identity not verified", list);
                self.notify(Notice::VerificationRequired);
                RemoteWrite::ready(RemoteOutcome::LocalOnly(LocalOnlyReason::Unverified))
            }
            RemoteGate::CachedOffline(identity) => {
                self.queue_offline(&identity.uid, list, change);
                RemoteWrite::ready(RemoteOutcome::Deferred)
            }
            RemoteGate::Open(identity) => match change {
                RemoteChange::Unsynced { name, .. } => {
                    warn!("{:?} in {} has no remote id; change stays local", name, list);
                    self.notify(Notice::NotYetSynced { name });
                    RemoteWrite::ready(RemoteOutcome::LocalOnly(LocalOnlyReason::NotYetSynced))
                }
                RemoteChange::Deliver(op) => {
                    let engine = self.clone();
                    let task = async move { engine.apply_remote(identity.uid, list, op).await };
                    RemoteWrite::pending(task.boxed(), self.inner.spawner.clone())
                }
            },
        }
    }

    fn queue_offline(&self, uid: &str, list: ListKind, change: RemoteChange) {
        if !self.inner.config.durable_outbox {
            debug!("Offline change to {} not queued: outbox disabled", list);
            return;
        }

        let outbox = &self.inner.outbox;
        let pending = |list: ListKind, op: PendingOp| PendingChange {
            uid: uid.to_string(),
            list,
            op,
            queued_at: self.now_ms(),
        };
        let queued = match change {
            RemoteChange::Deliver(op) => outbox.push(pending(list, op)),
            RemoteChange::Unsynced { key, follow_up, .. } => match follow_up {
                FollowUp::Replace(fields) => outbox
                    .amend_pending_add(uid, list, &key, Some(fields))
                    .map(|_| ()),
                FollowUp::Drop => outbox.amend_pending_add(uid, list, &key, None).map(|_| ()),
                FollowUp::Move { to, fields } => {
                    match outbox.amend_pending_add(uid, list, &key, None) {
                        Ok(true) => outbox.push(pending(to, PendingOp::Add { fields })),
                        other => other.map(|_| ()),
                    }
                }
            },
        };
        if let Err(e) = queued {
            error!("Failed to queue offline change to {}: {}", list, e);
        }
    }

    async fn apply_remote(&self, uid: String, list: ListKind, op: PendingOp) -> RemoteOutcome {
        let path = CollectionPath::new(uid.clone(), list);
        let shape = list.shape();
        let recheck = match &op {
            PendingOp::Add { fields } => Some((fields.key(shape), None)),
            PendingOp::Update { id, fields } => Some((fields.key(shape), Some(id.clone()))),
            _ => None,
        };
        let change = PendingChange {
            uid,
            list,
            op,
            queued_at: self.now_ms(),
        };

        if let Some((key, own_id)) = recheck {
            match self.inner.remote.query(&path, &key).await {
                Ok(docs) if docs.iter().any(|d| Some(&d.id) != own_id.as_ref()) => {
                    warn!("{} already exists in {}; the next snapshot wins", key, path);
                    self.notify(Notice::Duplicate {
                        list,
                        name: key.name().to_string(),
                        remote: true,
                    });
                    return RemoteOutcome::Duplicate;
                }
                Ok(_) => {}
                Err(e) => return self.remote_failed(change, e),
            }
        }

        match outbox::send(self.inner.remote.as_ref(), &change).await {
            Ok(()) => {
                debug!("{:?} applied to {}", change.op.action(), path);
                RemoteOutcome::Applied
            }
            Err(e) => self.remote_failed(change, e),
        }
    }

    /// A remote write failed. Offline with a connectivity error: queue it silently.
    /// Otherwise: tell the user.
    pub(crate) fn remote_failed(&self, change: PendingChange, err: RemoteError) -> RemoteOutcome {
        let list = change.list;
        let action = change.op.action();
        let item = change.op.item_name().map(str::to_string);
        let deferred = !self.is_online() && err.is_connectivity();
        error!("Remote {:?} on {} failed: {}", action, change.path(), err);
        self.emit(HubEvent::RemoteWriteFailed {
            list,
            item: item.clone().unwrap_or_default(),
            deferred,
            error: err.to_string(),
        });

        if !deferred {
            self.notify(Notice::Connectivity { list, action, item });
            return RemoteOutcome::Failed(err);
        }

        if self.inner.config.durable_outbox {
            if let Err(e) = self.inner.outbox.push(change) {
                error!("Failed to queue change to {}: {}", list, e);
            }
        }
        RemoteOutcome::Deferred
    }
}
