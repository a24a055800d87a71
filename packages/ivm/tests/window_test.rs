//! Ordered, limited queries: the window is backfilled from the remaining
//! pool when members leave it.

mod common;

use common::*;
use ivm::{ChangeSet, Direction, IvmConfig, Query, UpdateKind};
use serde_json::json;

fn top_three() -> Query {
    Query::new("users").order_by("score", Direction::Desc).limit(3)
}

fn seeded(config: IvmConfig) -> Engine {
    let engine = setup_with(config);
    seed(
        &engine,
        "users",
        (1..=6).map(|i| json!({ "id": format!("u{i}"), "score": i * 10 })).collect(),
    );
    engine
}

#[tokio::test]
async fn test_deleting_window_members_backfills() {
    for config in [IvmConfig::default(), IvmConfig { track_changes: true, ..IvmConfig::default() }] {
        let engine = seeded(config);
        let recorder = Recorder::default();
        let sub = recorder.subscribe(&engine, top_three());
        settle(&engine).await;
        assert_eq!(recorder.last_ids(), vec!["u6", "u5", "u4"]);

        commit(&engine, ChangeSet::new().delete("users", "u6").delete("users", "u4")).await;

        assert_eq!(recorder.last_ids(), vec!["u5", "u3", "u2"]);
        let users = recorder.last().changes.collection("users").cloned().unwrap();
        assert!(users.deletes.contains("u6") && users.deletes.contains("u4"));
        assert!(users.sets.contains_key("u3") && users.sets.contains_key("u2"));
        assert!(!users.sets.contains_key("u5"));

        commit(
            &engine,
            ChangeSet::new()
                .delete("users", "u5")
                .delete("users", "u3")
                .delete("users", "u2"),
        )
        .await;
        assert_eq!(recorder.last_ids(), vec!["u1"], "pool exhausted");
        assert_eq!(ids(&engine.results(sub.query_id()).unwrap()), ids(&raw_fetch(&engine, &top_three()).await));
    }
}

#[tokio::test]
async fn test_insert_pushes_lowest_out_of_window() {
    let engine = seeded(IvmConfig::default());
    let recorder = Recorder::default();
    recorder.subscribe(&engine, top_three());
    settle(&engine).await;

    commit(&engine, ChangeSet::new().insert("users", json!({ "id": "u9", "score": 55 }))).await;

    let update = recorder.last();
    assert_eq!(update.kind, UpdateKind::Diff);
    assert_eq!(recorder.last_ids(), vec!["u6", "u9", "u5"]);
    let users = update.changes.collection("users").unwrap();
    assert!(users.sets.contains_key("u9"));
    assert!(users.deletes.contains("u4"));

    // Below the window: nothing visible moves.
    commit(&engine, ChangeSet::new().insert("users", json!({ "id": "u0", "score": 1 }))).await;
    assert_eq!(recorder.count(), 2);
}

#[tokio::test]
async fn test_score_change_reorders_window() {
    let engine = seeded(IvmConfig::default());
    let recorder = Recorder::default();
    recorder.subscribe(&engine, top_three());
    settle(&engine).await;

    commit(&engine, ChangeSet::new().update("users", "u4", json!({ "score": 100 }))).await;
    assert_eq!(recorder.last_ids(), vec!["u4", "u6", "u5"]);

    commit(&engine, ChangeSet::new().update("users", "u4", json!({ "score": 5 }))).await;
    assert_eq!(recorder.last_ids(), vec!["u6", "u5", "u3"]);
    let users = recorder.last().changes.collection("users").cloned().unwrap();
    assert!(users.deletes.contains("u4"));
    assert!(users.sets.contains_key("u3"));
}
