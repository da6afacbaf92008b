//! Integration tests for the mutation pipeline and subscriptions.
//!
//! Each test drives a `SyncEngine` wired to the in-memory store and remote, with
//! background work spawned onto the test runtime.

mod common;

use common::{Harness, names, settle, unverified_user};
use hub_sync::{
    CollectionPath, Item, ItemDraft, ItemFields, KeyValueStore, ListKind, LocalOnlyReason, Notice,
    RemoteCall, RemoteError, RemoteOutcome, ReorderOutcome, SnapshotOutcome, SyncError,
    ValidationError, WriteAction, WriteOp,
};

fn offline() -> RemoteError {
    RemoteError::Unavailable("network down".into())
}

fn path(list: ListKind) -> CollectionPath {
    CollectionPath::new("u1", list)
}

// ============================================================================
// Local duplicate rejection
// ============================================================================

#[tokio::test]
async fn test_second_add_of_same_name_is_rejected() {
    let h = Harness::new();

    let write = h.engine.add(ListKind::Notes, ItemDraft::named("X")).unwrap();
    assert_eq!(
        write.outcome(),
        Some(&RemoteOutcome::LocalOnly(LocalOnlyReason::Anonymous))
    );
    let before = h.store.get("notesList").unwrap();

    let err = h.engine.add(ListKind::Notes, ItemDraft::named("X")).unwrap_err();
    assert!(matches!(err, SyncError::Duplicate { list: ListKind::Notes, .. }));
    assert_eq!(names(&h.engine.items(ListKind::Notes)), ["X"]);
    assert_eq!(h.store.get("notesList").unwrap(), before);
    assert!(h.presenter.notices().contains(&Notice::Duplicate {
        list: ListKind::Notes,
        name: "X".into(),
        remote: false,
    }));
}

#[tokio::test]
async fn test_anime_names_are_unique_across_both_halves() {
    let h = Harness::new();
    h.engine
        .add(ListKind::Watching, ItemDraft::named("Frieren"))
        .unwrap()
        .detach();

    let err = h
        .engine
        .add(ListKind::Completed, ItemDraft::named("Frieren"))
        .unwrap_err();
    assert!(matches!(err, SyncError::Duplicate { .. }));
    assert!(h.engine.items(ListKind::Completed).is_empty());
}

#[tokio::test]
async fn test_anime_rename_cannot_take_a_name_from_the_other_half() {
    let h = Harness::new();
    h.engine
        .add(ListKind::Watching, ItemDraft::named("A"))
        .unwrap()
        .detach();
    h.engine
        .add(ListKind::Completed, ItemDraft::named("B"))
        .unwrap()
        .detach();

    let a = h.engine.items(ListKind::Watching)[0].clone();
    let err = h
        .engine
        .update(ListKind::Watching, &a, ItemDraft::named("B"))
        .unwrap_err();
    assert!(matches!(err, SyncError::Duplicate { list: ListKind::Watching, .. }));
    assert_eq!(names(&h.engine.items(ListKind::Watching)), ["A"]);

    // Renaming to its own name is not a clash.
    h.engine
        .update(ListKind::Watching, &a, ItemDraft::named("A"))
        .unwrap()
        .detach();
    assert_eq!(names(&h.engine.items(ListKind::Watching)), ["A"]);
}

#[tokio::test]
async fn test_toggle_rejects_name_already_in_target_list() {
    let h = Harness::new();
    h.store.set("watchingList", r#"[{"name":"B"}]"#).unwrap();
    h.store.set("completedList", r#"[{"name":"B"}]"#).unwrap();

    let b = h.engine.items(ListKind::Watching)[0].clone();
    let err = h.engine.toggle_status(ListKind::Watching, &b).unwrap_err();
    assert!(matches!(err, SyncError::Duplicate { list: ListKind::Completed, .. }));
    assert_eq!(names(&h.engine.items(ListKind::Watching)), ["B"]);
    assert_eq!(names(&h.engine.items(ListKind::Completed)), ["B"]);
    assert!(h.presenter.notices().contains(&Notice::Duplicate {
        list: ListKind::Completed,
        name: "B".into(),
        remote: false,
    }));
}

#[tokio::test]
async fn test_bookmarks_are_unique_by_name_and_url() {
    let h = Harness::new();
    let list = ListKind::ToolsBookmarks;
    h.engine
        .add(list, ItemDraft::bookmark("Docs", "https://docs.rs"))
        .unwrap()
        .detach();
    h.engine
        .add(list, ItemDraft::bookmark("Docs", "https://doc.rust-lang.org"))
        .unwrap()
        .detach();

    assert!(h
        .engine
        .add(list, ItemDraft::bookmark("Docs", "https://docs.rs"))
        .is_err());
    assert!(matches!(
        h.engine.add(list, ItemDraft::named("No url")),
        Err(SyncError::Validation(ValidationError::EmptyUrl))
    ));
    assert_eq!(h.engine.items(list).len(), 2);
}

#[tokio::test]
async fn test_blank_names_are_rejected_before_any_change() {
    let h = Harness::new();
    assert!(matches!(
        h.engine.add(ListKind::Projects, ItemDraft::named("   ")),
        Err(SyncError::Validation(ValidationError::EmptyName))
    ));
    assert!(h.presenter.renders().is_empty());
}

// ============================================================================
// Optimistic write-through
// ============================================================================

#[tokio::test]
async fn test_add_renders_immediately_then_converges_on_server_shape() {
    let h = Harness::verified(&[ListKind::Projects]).await;

    let write = h.engine.add(ListKind::Projects, ItemDraft::named("X")).unwrap();
    assert!(write.is_pending());
    assert_eq!(h.presenter.rendered_names(ListKind::Projects), ["X"]);
    assert_eq!(h.engine.items(ListKind::Projects)[0].id, None);

    assert_eq!(write.await, RemoteOutcome::Applied);
    settle().await;

    let confirmed = h.engine.items(ListKind::Projects);
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].id.as_deref(), Some("doc-1"));
    assert!(confirmed[0].timestamp.is_some());

    let first = h.presenter.last_render(ListKind::Projects).unwrap();
    let outcome = h
        .engine
        .apply_snapshot(ListKind::Projects, h.remote.docs(&path(ListKind::Projects)));
    assert_eq!(outcome, SnapshotOutcome::Applied(1));
    assert_eq!(h.presenter.last_render(ListKind::Projects).unwrap(), first);
}

#[tokio::test]
async fn test_unverified_identity_never_touches_remote() {
    let h = Harness::new();
    h.engine.show_lists(&[ListKind::Projects]);
    h.engine.on_auth_state_changed(Some(unverified_user("u1")));
    settle().await;

    let list = ListKind::Projects;
    let unverified = RemoteOutcome::LocalOnly(LocalOnlyReason::Unverified);
    assert_eq!(h.engine.add(list, ItemDraft::named("A")).unwrap().await, unverified);
    assert_eq!(h.engine.add(list, ItemDraft::named("B")).unwrap().await, unverified);

    let a = h.engine.items(list)[0].clone();
    assert_eq!(h.engine.update(list, &a, ItemDraft::named("A2")).unwrap().await, unverified);
    let b = h.engine.items(list)[1].clone();
    assert_eq!(h.engine.delete(list, &b).unwrap().await, unverified);
    assert_eq!(names(&h.engine.items(list)), ["A2"]);
    assert_eq!(h.engine.clear(list).unwrap().await, unverified);

    assert!(h.engine.items(list).is_empty());
    assert!(h.remote.calls().is_empty());
    assert!(h.presenter.notices().contains(&Notice::VerificationRequired));
}

#[tokio::test]
async fn test_update_and_delete_address_remote_documents_by_id() {
    let h = Harness::verified(&[ListKind::Projects]).await;
    let list = ListKind::Projects;
    h.engine.add(list, ItemDraft::named("Old")).unwrap().await;
    settle().await;

    let item = h.engine.items(list)[0].clone();
    let write = h.engine.update(list, &item, ItemDraft::named("New")).unwrap();
    assert_eq!(h.engine.items(list)[0].id.as_deref(), Some("doc-1"));
    assert_eq!(write.await, RemoteOutcome::Applied);
    settle().await;
    assert_eq!(h.remote.docs(&path(list))[0].fields, ItemFields::named("New"));

    let item = h.engine.items(list)[0].clone();
    assert_eq!(h.engine.delete(list, &item).unwrap().await, RemoteOutcome::Applied);
    settle().await;
    assert!(h.remote.docs(&path(list)).is_empty());
    assert!(h.engine.items(list).is_empty());
}

#[tokio::test]
async fn test_update_keeps_anime_completion_flag() {
    let h = Harness::new();
    h.engine
        .add(ListKind::Completed, ItemDraft::named("Mushishi"))
        .unwrap()
        .detach();
    let item = h.engine.items(ListKind::Completed)[0].clone();
    assert_eq!(item.completed, Some(true));

    h.engine
        .update(ListKind::Completed, &item, ItemDraft::named("Mushi-shi"))
        .unwrap()
        .detach();
    let items = h.engine.items(ListKind::Completed);
    let updated = &items[0];
    assert_eq!(updated.name, "Mushi-shi");
    assert_eq!(updated.completed, Some(true));
}

#[tokio::test]
async fn test_clear_batch_deletes_remote_collection() {
    let h = Harness::verified(&[ListKind::Upcoming]).await;
    let list = ListKind::Upcoming;
    h.remote.seed(
        &path(list),
        [
            ("a".to_string(), ItemFields::named("A")),
            ("b".to_string(), ItemFields::named("B")),
        ],
    );
    settle().await;
    assert_eq!(h.engine.items(list).len(), 2);
    h.remote.clear_calls();

    assert_eq!(h.engine.clear(list).unwrap().await, RemoteOutcome::Applied);
    assert!(h.engine.items(list).is_empty());
    assert!(h.remote.docs(&path(list)).is_empty());
    assert!(h.remote.calls().contains(&RemoteCall::Commit(vec![
        WriteOp::Delete {
            path: path(list),
            id: "a".into()
        },
        WriteOp::Delete {
            path: path(list),
            id: "b".into()
        },
    ])));
}

#[tokio::test]
async fn test_remote_duplicate_keeps_local_change_until_next_snapshot() {
    // Projects is not subscribed, so the local mirror does not know about "Dup".
    let h = Harness::verified(&[ListKind::Upcoming]).await;
    h.remote
        .seed(&path(ListKind::Projects), [("r1".to_string(), ItemFields::named("Dup"))]);

    let write = h.engine.add(ListKind::Projects, ItemDraft::named("Dup")).unwrap();
    assert_eq!(write.await, RemoteOutcome::Duplicate);

    assert_eq!(names(&h.engine.items(ListKind::Projects)), ["Dup"]);
    assert_eq!(h.remote.docs(&path(ListKind::Projects)).len(), 1);
    assert!(h.presenter.notices().contains(&Notice::Duplicate {
        list: ListKind::Projects,
        name: "Dup".into(),
        remote: true,
    }));
}

#[tokio::test]
async fn test_online_failure_is_reported_and_not_rolled_back() {
    let h = Harness::verified(&[ListKind::Projects]).await;
    h.remote.fail_requests(Some(offline()));

    let outcome = h.engine.add(ListKind::Projects, ItemDraft::named("X")).unwrap().await;
    assert_eq!(outcome, RemoteOutcome::Failed(offline()));
    assert_eq!(names(&h.engine.items(ListKind::Projects)), ["X"]);
    assert!(h.engine.outbox().is_empty());
    assert!(h.presenter.notices().contains(&Notice::Connectivity {
        list: ListKind::Projects,
        action: WriteAction::Add,
        item: Some("X".into()),
    }));
}

#[tokio::test]
async fn test_unsynced_item_changes_stay_local_with_warning() {
    let h = Harness::verified(&[ListKind::Projects]).await;
    h.remote.fail_requests(Some(offline()));
    let _ = h.engine.add(ListKind::Projects, ItemDraft::named("X")).unwrap().await;
    h.remote.fail_requests(None);
    h.remote.clear_calls();

    let item = h.engine.items(ListKind::Projects)[0].clone();
    let write = h.engine.delete(ListKind::Projects, &item).unwrap();
    assert_eq!(
        write.outcome(),
        Some(&RemoteOutcome::LocalOnly(LocalOnlyReason::NotYetSynced))
    );
    assert!(h.engine.items(ListKind::Projects).is_empty());
    assert!(h.remote.calls().is_empty());
    assert!(h
        .presenter
        .notices()
        .contains(&Notice::NotYetSynced { name: "X".into() }));
}

// ============================================================================
// Offline outbox
// ============================================================================

#[tokio::test]
async fn test_offline_failure_is_deferred_and_replayed_when_online() {
    let h = Harness::verified(&[ListKind::Projects]).await;
    h.engine.set_network_status(false);
    h.remote.fail_requests(Some(offline()));

    let outcome = h.engine.add(ListKind::Projects, ItemDraft::named("X")).unwrap().await;
    assert_eq!(outcome, RemoteOutcome::Deferred);
    assert_eq!(h.engine.outbox().len(), 1);
    assert!(!h
        .presenter
        .notices()
        .iter()
        .any(|n| matches!(n, Notice::Connectivity { .. })));

    h.remote.fail_requests(None);
    h.engine.set_network_status(true);
    settle().await;

    assert!(h.engine.outbox().is_empty());
    let docs = h.remote.docs(&path(ListKind::Projects));
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].fields, ItemFields::named("X"));
    assert_eq!(h.engine.items(ListKind::Projects)[0].id.as_deref(), Some(docs[0].id.as_str()));
}

#[tokio::test]
async fn test_replay_keeps_entries_while_still_offline() {
    let h = Harness::verified(&[ListKind::Projects]).await;
    h.engine.set_network_status(false);
    h.remote.fail_requests(Some(offline()));
    for name in ["A", "B"] {
        let _ = h.engine.add(ListKind::Projects, ItemDraft::named(name)).unwrap().await;
    }

    let report = h.engine.replay_outbox().await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.kept, 2);
    let queued: Vec<_> = h
        .engine
        .outbox()
        .entries()
        .into_iter()
        .map(|c| c.op.item_name().map(str::to_string))
        .collect();
    assert_eq!(queued, [Some("A".to_string()), Some("B".to_string())]);
}

#[tokio::test]
async fn test_replay_drops_entries_that_fail_online() {
    let h = Harness::verified(&[ListKind::Projects]).await;
    h.engine.set_network_status(false);
    h.remote.fail_requests(Some(offline()));
    let _ = h.engine.add(ListKind::Projects, ItemDraft::named("A")).unwrap().await;

    // Online again, but the remote still refuses.
    h.engine.startup(true);
    let report = h.engine.replay_outbox().await;
    assert_eq!(report.dropped, 1);
    assert!(h.engine.outbox().is_empty());
    assert!(h.presenter.notices().contains(&Notice::Connectivity {
        list: ListKind::Projects,
        action: WriteAction::Add,
        item: Some("A".into()),
    }));
}

// ============================================================================
// Status toggle and reorder
// ============================================================================

#[tokio::test]
async fn test_toggle_moves_locally_then_commits_one_batch() {
    let h = Harness::verified(&[ListKind::Watching, ListKind::Completed]).await;
    h.remote.seed(
        &path(ListKind::Watching),
        [(
            "7".to_string(),
            ItemFields {
                name: "Foo".into(),
                completed: Some(false),
                url: None,
            },
        )],
    );
    settle().await;
    h.remote.clear_calls();

    let foo = h.engine.items(ListKind::Watching)[0].clone();
    let write = h.engine.toggle_status(ListKind::Watching, &foo).unwrap();

    assert!(h.engine.items(ListKind::Watching).is_empty());
    let completed = h.engine.items(ListKind::Completed);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].name, "Foo");
    assert_eq!(completed[0].completed, Some(true));
    assert_eq!(completed[0].id.as_deref(), Some("7"));

    assert_eq!(write.await, RemoteOutcome::Applied);
    assert_eq!(
        h.remote.calls(),
        [RemoteCall::Commit(vec![
            WriteOp::Delete {
                path: path(ListKind::Watching),
                id: "7".into(),
            },
            WriteOp::Set {
                path: path(ListKind::Completed),
                id: "7".into(),
                fields: ItemFields {
                    name: "Foo".into(),
                    completed: Some(true),
                    url: None,
                },
            },
        ])]
    );
}

#[tokio::test]
async fn test_toggle_rejects_unverified_before_any_change() {
    let h = Harness::new();
    h.engine
        .add(ListKind::Watching, ItemDraft::named("Foo"))
        .unwrap()
        .detach();
    h.engine.on_auth_state_changed(Some(unverified_user("u1")));

    let foo = h.engine.items(ListKind::Watching)[0].clone();
    assert!(matches!(
        h.engine.toggle_status(ListKind::Watching, &foo),
        Err(SyncError::Unverified)
    ));
    assert_eq!(names(&h.engine.items(ListKind::Watching)), ["Foo"]);
    assert!(h.engine.items(ListKind::Completed).is_empty());
}

#[tokio::test]
async fn test_toggle_anonymous_is_local_only() {
    let h = Harness::new();
    h.engine
        .add(ListKind::Completed, ItemDraft::named("Foo"))
        .unwrap()
        .detach();

    let foo = h.engine.items(ListKind::Completed)[0].clone();
    let write = h.engine.toggle_status(ListKind::Completed, &foo).unwrap();
    assert_eq!(
        write.outcome(),
        Some(&RemoteOutcome::LocalOnly(LocalOnlyReason::Anonymous))
    );
    assert_eq!(h.engine.items(ListKind::Watching)[0].completed, Some(false));
    assert!(matches!(
        h.engine.toggle_status(ListKind::Projects, &Item::named("x")),
        Err(SyncError::Validation(ValidationError::NoStatusCounterpart(_)))
    ));
}

#[tokio::test]
async fn test_reorder_moves_dragged_item_to_target_position() {
    let h = Harness::new();
    for name in ["A", "B", "C"] {
        h.engine
            .add(ListKind::Projects, ItemDraft::named(name))
            .unwrap()
            .detach();
    }

    let items = h.engine.items(ListKind::Projects);
    let outcome = h
        .engine
        .reorder(ListKind::Projects, &items[0], &items[2])
        .unwrap();
    assert_eq!(outcome, ReorderOutcome::Moved);
    assert_eq!(names(&h.engine.items(ListKind::Projects)), ["B", "C", "A"]);

    let items = h.engine.items(ListKind::Projects);
    assert_eq!(
        h.engine.reorder(ListKind::Projects, &items[1], &items[1]).unwrap(),
        ReorderOutcome::Unchanged
    );
}

#[tokio::test]
async fn test_reorder_is_visual_only_while_cloud_synced() {
    let h = Harness::verified(&[ListKind::Projects]).await;
    let outcome = h
        .engine
        .reorder(ListKind::Projects, &Item::named("A"), &Item::named("B"))
        .unwrap();
    assert_eq!(outcome, ReorderOutcome::VisualOnly);
    assert!(h.presenter.notices().contains(&Notice::ReorderVisualOnly));
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn test_empty_list_shows_loading_until_first_snapshot() {
    let h = Harness::verified(&[ListKind::Notes]).await;
    assert_eq!(h.presenter.loading(), [ListKind::Notes]);
    assert_eq!(h.engine.active_subscriptions(), [ListKind::Notes]);
}

#[tokio::test]
async fn test_subscription_error_falls_back_to_local_mirror() {
    let h = Harness::verified(&[ListKind::Projects]).await;
    h.remote
        .push_error(&path(ListKind::Projects), RemoteError::PermissionDenied("rules".into()));
    settle().await;

    assert!(h
        .presenter
        .notices()
        .contains(&Notice::LoadFailed { list: ListKind::Projects }));
    assert!(h.engine.active_subscriptions().is_empty());
    assert_eq!(h.remote.live_subscribers(&path(ListKind::Projects)), 0);
}

#[tokio::test]
async fn test_resubscribing_replaces_previous_subscription() {
    let h = Harness::verified(&[ListKind::Projects]).await;
    assert!(h.engine.listen(ListKind::Projects));
    settle().await;

    assert_eq!(h.remote.live_subscribers(&path(ListKind::Projects)), 1);
    assert_eq!(h.engine.active_subscriptions(), [ListKind::Projects]);
}

#[tokio::test]
async fn test_refresh_reads_remote_once() {
    let h = Harness::verified(&[]).await;
    h.remote
        .seed(&path(ListKind::Notes), [("n1".to_string(), ItemFields::named("Hello"))]);

    let outcome = h.engine.refresh(ListKind::Notes).await.unwrap();
    assert_eq!(outcome, SnapshotOutcome::Applied(1));
    assert_eq!(names(&h.engine.items(ListKind::Notes)), ["Hello"]);
    assert!(h.remote.calls().contains(&RemoteCall::OrderedRead(path(ListKind::Notes))));
}
