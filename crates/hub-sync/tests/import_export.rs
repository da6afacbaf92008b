//! Integration tests for import merge, snapshot suppression around imports, and export.

mod common;

use std::time::Duration;

use common::{Harness, names, settle};
use hub_sync::{
    ImportReport, ItemDraft, KeyValueStore, ListKind, Notice, SnapshotOutcome, SyncError,
};
use serde_json::{Value, json};

#[tokio::test]
async fn test_import_skips_duplicates_and_keeps_existing() {
    let h = Harness::new();
    h.engine
        .add(ListKind::Notes, ItemDraft::named("A"))
        .unwrap()
        .detach();
    h.presenter.reset();

    let payload = json!({ "notesList": [{ "name": "A" }, { "name": "B" }] }).to_string();
    let report = h.engine.import(&payload).await.unwrap();

    assert_eq!(report, ImportReport { added: 1, skipped: 1 });
    assert_eq!(names(&h.engine.items(ListKind::Notes)), ["A", "B"]);

    let notices = h.presenter.notices();
    assert!(!notices.iter().any(|n| matches!(n, Notice::Duplicate { .. })));
    assert!(!notices.iter().any(|n| matches!(n, Notice::LoginRequired)));
    assert_eq!(
        notices.last(),
        Some(&Notice::ImportSucceeded { added: 1, skipped: 1 })
    );
    // Every list is re-rendered once the merge finishes.
    for list in ListKind::ALL {
        assert!(h.presenter.last_render(list).is_some(), "{} not rendered", list);
    }
}

#[tokio::test]
async fn test_import_accepts_legacy_shapes() {
    let h = Harness::new();
    let payload = json!({
        "projectsList": "[\"hub\", {\"name\": \"site\"}]",
        "watchingList": [{
            "id": "old-id",
            "name": "Frieren",
            "completed": false,
            "timestamp": { "seconds": 1700000000, "nanoseconds": 0 }
        }],
        "bookmarks_tools": [
            { "name": "No url" },
            { "name": "Docs", "url": "https://docs.rs" }
        ],
        "someOtherKey": 42
    })
    .to_string();

    let report = h.engine.import(&payload).await.unwrap();
    assert_eq!(report, ImportReport { added: 4, skipped: 1 });

    assert_eq!(names(&h.engine.items(ListKind::Projects)), ["hub", "site"]);
    let watching = h.engine.items(ListKind::Watching);
    assert_eq!(watching[0].name, "Frieren");
    assert_eq!(watching[0].id, None);
    assert_eq!(watching[0].timestamp, None);
    let tools = h.engine.items(ListKind::ToolsBookmarks);
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].url.as_deref(), Some("https://docs.rs"));
    assert_eq!(h.store.get("someOtherKey").unwrap(), None);
}

#[tokio::test]
async fn test_malformed_import_changes_nothing() {
    let h = Harness::new();

    let err = h.engine.import("not json").await.unwrap_err();
    assert!(matches!(err, SyncError::ImportFormat(_)));
    assert!(matches!(
        h.presenter.notices().last(),
        Some(Notice::ImportFailed { .. })
    ));

    // A bad list value is caught before anything is merged.
    h.engine
        .add(ListKind::Projects, ItemDraft::named("keep"))
        .unwrap()
        .detach();
    let payload = json!({ "projectsList": ["p"], "notesList": 5 }).to_string();
    assert!(h.engine.import(&payload).await.is_err());
    assert_eq!(names(&h.engine.items(ListKind::Projects)), ["keep"]);

    // A failed import does not open the snapshot race window.
    assert_eq!(
        h.engine.apply_snapshot(ListKind::Projects, Vec::new()),
        SnapshotOutcome::Applied(0)
    );
}

#[tokio::test]
async fn test_smaller_snapshots_are_discarded_shortly_after_import() {
    let h = Harness::verified(&[ListKind::Notes]).await;
    let payload = json!({ "notesList": ["one", "two"] }).to_string();

    let report = h.engine.import(&payload).await.unwrap();
    assert_eq!(report.added, 2);
    settle().await;
    assert_eq!(h.engine.items(ListKind::Notes).len(), 2);

    assert_eq!(
        h.engine.apply_snapshot(ListKind::Notes, Vec::new()),
        SnapshotOutcome::DiscardedRacingImport
    );
    assert_eq!(h.engine.items(ListKind::Notes).len(), 2);

    h.clock.advance(Duration::from_secs(16));
    assert_eq!(
        h.engine.apply_snapshot(ListKind::Notes, Vec::new()),
        SnapshotOutcome::Applied(0)
    );
    assert!(h.engine.items(ListKind::Notes).is_empty());
}

#[tokio::test]
async fn test_export_includes_known_keys_only() {
    let h = Harness::new();
    h.engine
        .add(ListKind::Projects, ItemDraft::named("hub"))
        .unwrap()
        .detach();
    h.store.set("vaultPassword", "not-json-hash").unwrap();
    h.store.set("vaultFailedAttempts", "2").unwrap();
    h.store.set("pendingSync", "[]").unwrap();

    let exported: Value = serde_json::from_str(&h.engine.export().unwrap()).unwrap();
    let object = exported.as_object().unwrap();

    assert_eq!(object["projectsList"], json!([{ "name": "hub" }]));
    assert!(object["projectsLastUpdated"].is_string());
    assert_eq!(object["vaultPassword"], json!("not-json-hash"));
    assert_eq!(object["vaultFailedAttempts"], json!(2));
    assert!(!object.contains_key("pendingSync"));
    assert!(!object.contains_key("notesList"));

    // The export merges cleanly into an empty hub.
    let fresh = Harness::new();
    let report = fresh.engine.import(&exported.to_string()).await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(names(&fresh.engine.items(ListKind::Projects)), ["hub"]);
}
