//! Remote store for a hub with no cloud backend configured.
//!
//! The CLI runs without an identity, so the gate never lets a call through. Should one
//! arrive anyway it fails as a connectivity error and the local change stands.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use hub_sync::remote::Result;
use hub_sync::{
    CollectionPath, DocId, DuplicateKey, ItemFields, RemoteDoc, RemoteError, RemoteStore,
    SnapshotStream, WriteBatch,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineRemote;

fn unavailable<T>() -> Result<T> {
    Err(RemoteError::Unavailable("no remote configured".to_string()))
}

#[async_trait]
impl RemoteStore for OfflineRemote {
    async fn ordered_read(&self, _path: &CollectionPath) -> Result<Vec<RemoteDoc>> {
        unavailable()
    }

    fn subscribe(&self, _path: &CollectionPath) -> SnapshotStream {
        stream::once(async { unavailable::<Vec<RemoteDoc>>() }).boxed()
    }

    async fn add(&self, _path: &CollectionPath, _fields: ItemFields) -> Result<DocId> {
        unavailable()
    }

    async fn update(&self, _path: &CollectionPath, _id: &str, _fields: ItemFields) -> Result<()> {
        unavailable()
    }

    async fn delete(&self, _path: &CollectionPath, _id: &str) -> Result<()> {
        unavailable()
    }

    async fn commit(&self, _batch: WriteBatch) -> Result<()> {
        unavailable()
    }

    async fn query(&self, _path: &CollectionPath, _key: &DuplicateKey) -> Result<Vec<RemoteDoc>> {
        unavailable()
    }
}
