//! Remote Collection Adapter.
//!
//! One collection per list per identity (`users/{uid}/{collection}`), ordered by a
//! server-assigned timestamp. Real-time subscriptions are streams whose first item is
//! the current state; dropping the stream ends the subscription.

use crate::item::{DuplicateKey, Item, ItemFields, ServerTimestamp};
use crate::list::ListKind;
use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Document not found: {path}/{id}")]
    NotFound { path: String, id: DocId },

    #[error("Remote error: {0}")]
    Internal(String),
}

impl RemoteError {
    /// Whether the failure is a transport problem rather than a rejected request.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

pub type DocId = String;

/// `users/{uid}/{collection}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath {
    pub uid: String,
    pub list: ListKind,
}

impl CollectionPath {
    pub fn new(uid: impl Into<String>, list: ListKind) -> Self {
        Self {
            uid: uid.into(),
            list,
        }
    }
}

impl Display for CollectionPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "users/{}/{}", self.uid, self.list.collection_name())
    }
}

/// A document as delivered by the remote collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDoc {
    pub id: DocId,
    pub fields: ItemFields,
    pub timestamp: ServerTimestamp,
}

impl From<RemoteDoc> for Item {
    fn from(doc: RemoteDoc) -> Self {
        Item {
            id: Some(doc.id),
            name: doc.fields.name,
            completed: doc.fields.completed,
            url: doc.fields.url,
            timestamp: Some(doc.timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Delete {
        path: CollectionPath,
        id: DocId,
    },
    /// Create or overwrite `id`; the remote stamps a fresh timestamp.
    Set {
        path: CollectionPath,
        id: DocId,
        fields: ItemFields,
    },
}

/// Ordered operations committed atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete(mut self, path: &CollectionPath, id: impl Into<DocId>) -> Self {
        self.ops.push(WriteOp::Delete {
            path: path.clone(),
            id: id.into(),
        });
        self
    }

    pub fn set(mut self, path: &CollectionPath, id: impl Into<DocId>, fields: ItemFields) -> Self {
        self.ops.push(WriteOp::Set {
            path: path.clone(),
            id: id.into(),
            fields,
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

pub type SnapshotStream = BoxStream<'static, Result<Vec<RemoteDoc>>>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All documents of `path`, ordered by timestamp ascending.
    async fn ordered_read(&self, path: &CollectionPath) -> Result<Vec<RemoteDoc>>;

    /// Live snapshots of `path`. The first delivery is the current state.
    fn subscribe(&self, path: &CollectionPath) -> SnapshotStream;

    async fn add(&self, path: &CollectionPath, fields: ItemFields) -> Result<DocId>;

    async fn update(&self, path: &CollectionPath, id: &str, fields: ItemFields) -> Result<()>;

    async fn delete(&self, path: &CollectionPath, id: &str) -> Result<()>;

    /// Apply every op or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Documents of `path` matching `key`.
    async fn query(&self, path: &CollectionPath, key: &DuplicateKey) -> Result<Vec<RemoteDoc>>;

    async fn batch_delete(&self, path: &CollectionPath, ids: &[DocId]) -> Result<()> {
        let batch = ids
            .iter()
            .fold(WriteBatch::new(), |batch, id| batch.delete(path, id.clone()));
        self.commit(batch).await
    }
}

/// A call received by [`InMemoryRemote`], recorded for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    OrderedRead(CollectionPath),
    Subscribe(CollectionPath),
    Add {
        path: CollectionPath,
        fields: ItemFields,
    },
    Update {
        path: CollectionPath,
        id: DocId,
        fields: ItemFields,
    },
    Delete {
        path: CollectionPath,
        id: DocId,
    },
    Commit(Vec<WriteOp>),
    Query {
        path: CollectionPath,
        key: DuplicateKey,
    },
}

type SnapshotSender = UnboundedSender<Result<Vec<RemoteDoc>>>;

#[derive(Default)]
struct RemoteState {
    collections: HashMap<CollectionPath, Vec<RemoteDoc>>,
    subscribers: HashMap<CollectionPath, Vec<SnapshotSender>>,
    calls: Vec<RemoteCall>,
    next_id: u64,
    last_timestamp: u64,
    failure: Option<RemoteError>,
}

impl RemoteState {
    fn stamp(&mut self) -> ServerTimestamp {
        self.last_timestamp += 1;
        ServerTimestamp(self.last_timestamp)
    }

    fn docs(&self, path: &CollectionPath) -> Vec<RemoteDoc> {
        let mut docs = self.collections.get(path).cloned().unwrap_or_default();
        docs.sort_by_key(|d| d.timestamp);
        docs
    }

    fn check(&self) -> Result<()> {
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn broadcast(&mut self, path: &CollectionPath) {
        let docs = self.docs(path);
        if let Some(senders) = self.subscribers.get_mut(path) {
            senders.retain(|tx| tx.unbounded_send(Ok(docs.clone())).is_ok());
        }
    }

    fn set_doc(&mut self, path: &CollectionPath, id: &str, fields: ItemFields) {
        let timestamp = self.stamp();
        let docs = self.collections.entry(path.clone()).or_default();
        docs.retain(|d| d.id != id);
        docs.push(RemoteDoc {
            id: id.to_string(),
            fields,
            timestamp,
        });
    }
}

/// In-memory remote collection store for testing.
///
/// Ids are sequential (`doc-1`, `doc-2`, ...) and timestamps a per-store counter.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert documents directly, bypassing the call log.
    pub fn seed(&self, path: &CollectionPath, docs: impl IntoIterator<Item = (DocId, ItemFields)>) {
        let mut state = self.state();
        for (id, fields) in docs {
            state.set_doc(path, &id, fields);
        }
        state.broadcast(path);
    }

    pub fn docs(&self, path: &CollectionPath) -> Vec<RemoteDoc> {
        self.state().docs(path)
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Make every subsequent request fail with `failure` (or succeed again with `None`).
    pub fn fail_requests(&self, failure: Option<RemoteError>) {
        self.state().failure = failure;
    }

    /// Deliver `error` to every subscriber of `path`.
    pub fn push_error(&self, path: &CollectionPath, error: RemoteError) {
        let mut state = self.state();
        if let Some(senders) = state.subscribers.get_mut(path) {
            senders.retain(|tx| tx.unbounded_send(Err(error.clone())).is_ok());
        }
    }

    /// Number of subscribers of `path` whose stream is still alive.
    pub fn live_subscribers(&self, path: &CollectionPath) -> usize {
        self.state()
            .subscribers
            .get(path)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn ordered_read(&self, path: &CollectionPath) -> Result<Vec<RemoteDoc>> {
        let mut state = self.state();
        state.calls.push(RemoteCall::OrderedRead(path.clone()));
        state.check()?;
        Ok(state.docs(path))
    }

    fn subscribe(&self, path: &CollectionPath) -> SnapshotStream {
        let (tx, rx) = mpsc::unbounded();
        let mut state = self.state();
        state.calls.push(RemoteCall::Subscribe(path.clone()));
        let current = state.docs(path);
        // The receiver is alive here, so the initial send cannot fail.
        let _ = tx.unbounded_send(Ok(current));
        state.subscribers.entry(path.clone()).or_default().push(tx);
        rx.boxed()
    }

    async fn add(&self, path: &CollectionPath, fields: ItemFields) -> Result<DocId> {
        let mut state = self.state();
        state.calls.push(RemoteCall::Add {
            path: path.clone(),
            fields: fields.clone(),
        });
        state.check()?;
        state.next_id += 1;
        let id = format!("doc-{}", state.next_id);
        state.set_doc(path, &id, fields);
        state.broadcast(path);
        Ok(id)
    }

    async fn update(&self, path: &CollectionPath, id: &str, fields: ItemFields) -> Result<()> {
        let mut state = self.state();
        state.calls.push(RemoteCall::Update {
            path: path.clone(),
            id: id.to_string(),
            fields: fields.clone(),
        });
        state.check()?;
        let doc = state
            .collections
            .get_mut(path)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
            .ok_or_else(|| RemoteError::NotFound {
                path: path.to_string(),
                id: id.to_string(),
            })?;
        doc.fields = fields;
        state.broadcast(path);
        Ok(())
    }

    async fn delete(&self, path: &CollectionPath, id: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(RemoteCall::Delete {
            path: path.clone(),
            id: id.to_string(),
        });
        state.check()?;
        if let Some(docs) = state.collections.get_mut(path) {
            docs.retain(|d| d.id != id);
        }
        state.broadcast(path);
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut state = self.state();
        state.calls.push(RemoteCall::Commit(batch.ops().to_vec()));
        state.check()?;

        let mut touched: Vec<CollectionPath> = Vec::new();
        for op in batch.into_ops() {
            match op {
                WriteOp::Delete { path, id } => {
                    if let Some(docs) = state.collections.get_mut(&path) {
                        docs.retain(|d| d.id != id);
                    }
                    touched.push(path);
                }
                WriteOp::Set { path, id, fields } => {
                    state.set_doc(&path, &id, fields);
                    touched.push(path);
                }
            }
        }

        touched.sort();
        touched.dedup();
        for path in &touched {
            state.broadcast(path);
        }
        Ok(())
    }

    async fn query(&self, path: &CollectionPath, key: &DuplicateKey) -> Result<Vec<RemoteDoc>> {
        let mut state = self.state();
        state.calls.push(RemoteCall::Query {
            path: path.clone(),
            key: key.clone(),
        });
        state.check()?;
        Ok(state
            .docs(path)
            .into_iter()
            .filter(|d| key.matches(&d.fields))
            .collect())
    }
}
