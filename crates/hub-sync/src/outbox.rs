//! Durable queue of remote writes that could not be delivered.
//!
//! Entries live in the Local Mirror substrate under `pendingSync`, tagged with the uid
//! they were made under, and are replayed in order when the client comes back online.
//! Delivery is best-effort: an entry that fails while online is dropped.

use crate::item::{DuplicateKey, ItemFields};
use crate::list::ListKind;
use crate::mirror::{LocalMirror, OUTBOX_KEY};
use crate::presenter::WriteAction;
use crate::remote::{self, CollectionPath, DocId, RemoteStore, WriteBatch};
use crate::store::{self, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PendingOp {
    Add { fields: ItemFields },
    Update { id: DocId, fields: ItemFields },
    Delete { id: DocId },
    Clear,
    Toggle { id: DocId, to: ListKind, fields: ItemFields },
}

impl PendingOp {
    pub fn action(&self) -> WriteAction {
        match self {
            PendingOp::Add { .. } => WriteAction::Add,
            PendingOp::Update { .. } => WriteAction::Update,
            PendingOp::Delete { .. } => WriteAction::Delete,
            PendingOp::Clear => WriteAction::Clear,
            PendingOp::Toggle { .. } => WriteAction::Toggle,
        }
    }

    /// Name of the item the op concerns, for notices.
    pub fn item_name(&self) -> Option<&str> {
        match self {
            PendingOp::Add { fields }
            | PendingOp::Update { fields, .. }
            | PendingOp::Toggle { fields, .. } => Some(&fields.name),
            PendingOp::Delete { .. } | PendingOp::Clear => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub uid: String,
    pub list: ListKind,
    pub op: PendingOp,
    pub queued_at: u64,
}

impl PendingChange {
    pub fn path(&self) -> CollectionPath {
        CollectionPath::new(self.uid.clone(), self.list)
    }
}

#[derive(Clone)]
pub struct Outbox {
    mirror: LocalMirror,
    /// Serializes read-modify-write cycles on the stored queue.
    lock: Arc<Mutex<()>>,
}

impl Outbox {
    pub fn new(mirror: LocalMirror) -> Self {
        Self {
            mirror,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn entries(&self) -> Vec<PendingChange> {
        let raw = match self.mirror.raw(OUTBOX_KEY) {
            Ok(Some(raw)) => raw,
            _ => return Vec::new(),
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Discarding unreadable outbox: {}", e);
            Vec::new()
        })
    }

    fn save(&self, entries: &[PendingChange]) -> store::Result<()> {
        if entries.is_empty() {
            return self.mirror.remove_raw(OUTBOX_KEY);
        }
        let json = serde_json::to_string(entries).map_err(|e| StoreError::Io(e.to_string()))?;
        self.mirror.set_raw(OUTBOX_KEY, &json)
    }

    pub fn push(&self, change: PendingChange) -> store::Result<()> {
        let _guard = self.lock();
        let mut entries = self.entries();
        debug!(
            "Queueing {:?} for {} ({} pending)",
            change.op.action(),
            change.list,
            entries.len() + 1
        );
        entries.push(change);
        self.save(&entries)
    }

    /// Rewrite or drop a queued add that has not been delivered yet.
    ///
    /// Items without a remote id can only exist remotely through a queued add, so an
    /// update or delete of such an item amends that add instead of queueing a new op.
    /// Returns whether a queued add matched.
    pub fn amend_pending_add(
        &self,
        uid: &str,
        list: ListKind,
        key: &DuplicateKey,
        replacement: Option<ItemFields>,
    ) -> store::Result<bool> {
        let _guard = self.lock();
        let mut entries = self.entries();
        let position = entries.iter().position(|c| {
            c.uid == uid
                && c.list == list
                && matches!(&c.op, PendingOp::Add { fields } if key.matches(fields))
        });

        let Some(position) = position else {
            return Ok(false);
        };
        match replacement {
            Some(fields) => entries[position].op = PendingOp::Add { fields },
            None => {
                entries.remove(position);
            }
        }
        self.save(&entries)?;
        Ok(true)
    }

    /// Remove and return every entry made under `uid`, oldest first.
    pub fn take_for(&self, uid: &str) -> store::Result<Vec<PendingChange>> {
        let _guard = self.lock();
        let (mine, others): (Vec<_>, Vec<_>) =
            self.entries().into_iter().partition(|c| c.uid == uid);
        if !mine.is_empty() {
            self.save(&others)?;
        }
        Ok(mine)
    }

    /// Put undelivered entries back at the front of the queue.
    pub fn requeue(&self, mut changes: Vec<PendingChange>) -> store::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let _guard = self.lock();
        changes.extend(self.entries());
        self.save(&changes)
    }

    pub fn clear(&self) -> store::Result<()> {
        let _guard = self.lock();
        self.mirror.remove_raw(OUTBOX_KEY)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Send one queued change to the remote collection.
///
/// A queued add whose name already exists remotely counts as delivered.
pub async fn deliver(remote: &dyn RemoteStore, change: &PendingChange) -> remote::Result<()> {
    if let PendingOp::Add { fields } = &change.op {
        let key = fields.key(change.list.shape());
        let path = change.path();
        if !remote.query(&path, &key).await?.is_empty() {
            debug!("Queued add of {} already present in {}", key, path);
            return Ok(());
        }
    }
    send(remote, change).await
}

/// Apply `change` to the remote collection without any duplicate check.
pub async fn send(remote: &dyn RemoteStore, change: &PendingChange) -> remote::Result<()> {
    let path = change.path();
    match &change.op {
        PendingOp::Add { fields } => remote.add(&path, fields.clone()).await.map(|_| ()),
        PendingOp::Update { id, fields } => remote.update(&path, id, fields.clone()).await,
        PendingOp::Delete { id } => remote.delete(&path, id).await,
        PendingOp::Clear => {
            let ids: Vec<DocId> = remote
                .ordered_read(&path)
                .await?
                .into_iter()
                .map(|d| d.id)
                .collect();
            if ids.is_empty() {
                return Ok(());
            }
            remote.batch_delete(&path, &ids).await
        }
        PendingOp::Toggle { id, to, fields } => {
            let target = CollectionPath::new(change.uid.clone(), *to);
            let batch = WriteBatch::new()
                .delete(&path, id.clone())
                .set(&target, id.clone(), fields.clone());
            remote.commit(batch).await
        }
    }
}
