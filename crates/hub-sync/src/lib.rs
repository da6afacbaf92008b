//! hub-sync: Local-first list synchronization for the personal hub.
//!
//! This crate provides the core functionality for:
//! - Persisting every list in a durable local mirror that the UI always renders from
//! - Optimistic write-through to a remote per-user document store
//! - Real-time snapshot reconciliation with import-merge race suppression
//! - Session transitions (login, logout, verification) and the offline-first startup path
//!
//! Storage, remote collections, presentation and task spawning are trait seams so the
//! same engine runs natively, in tests, and behind a browser binding.

pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod identity;
pub mod item;
pub mod list;
pub mod mirror;
pub mod outbox;
pub mod presenter;
pub mod remote;
pub mod session;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HubConfig;
pub use engine::{
    Collaborators, ImportReport, LocalOnlyReason, RemoteOutcome, RemoteWrite, ReorderOutcome,
    SnapshotOutcome, SubscriptionHandle, SyncEngine, SyncError, TaskSpawner,
};
pub use events::{EventBus, HubEvent, Subscription};
pub use identity::{Identity, IdentitySource, RemoteGate, SessionState};
pub use item::{DuplicateKey, Item, ItemDraft, ItemFields, ServerTimestamp, StoredItem, ValidationError};
pub use list::{ItemShape, ListKind, Page};
pub use mirror::LocalMirror;
pub use outbox::{Outbox, PendingChange, PendingOp};
pub use presenter::{LastUpdated, ListView, Notice, Presenter, WriteAction};
pub use remote::{
    CollectionPath, DocId, InMemoryRemote, RemoteCall, RemoteDoc, RemoteError, RemoteStore,
    SnapshotStream, WriteBatch, WriteOp,
};
pub use session::ReplayReport;
pub use store::{InMemoryStore, KeyValueStore, StoreError};
