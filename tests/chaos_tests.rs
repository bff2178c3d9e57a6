// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos tests: simulate failures and verify graceful degradation.
//!
//! These tests verify that expired deadlines, lock contention, corrupted
//! rows and a damaged tracker surface as typed errors, roll back cleanly,
//! and leave the engine usable.
//!
//! Run with: cargo test --test chaos_tests -- --nocapture

mod common;

use common::{assert_consistent, cluster_with, items};
use serde_json::json;
use sharing_engine::{
    with_retry, ErrorCategory, ItemEdit, ItemKind, RetryConfig, SharingError, Violation,
    Visibility,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// A second, raw connection to the engine's database file.
async fn raw_pool(path: &Path) -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite://{}", path.display()))
        .await
        .expect("raw pool")
}

// =============================================================================
// Deadlines
// =============================================================================

/// Test: An operation stuck behind a held write lock times out and rolls back
#[tokio::test]
async fn deadline_expiry_rolls_back() {
    let t = cluster_with(2).await;
    let engine = t.engine();
    let item = engine
        .create_item(ItemKind::MISSION, t.member(0), json!("M"), 0)
        .await
        .unwrap();

    // Hold the write lock from another unit of work.
    let mut holder = engine.store().transaction().await.unwrap();
    holder.lock_cluster(t.cluster).await.unwrap();

    let impatient = engine.with_timeout(Duration::from_millis(200));
    let err = impatient
        .share_item(ItemKind::MISSION, item.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SharingError::Timeout { .. }), "got {:?}", err);
    assert!(err.is_retryable());
    assert_eq!(err.http_status(), 503);

    holder.rollback().await.unwrap();

    // Nothing leaked out of the aborted share.
    let after = engine.get_item(ItemKind::MISSION, item.id).await.unwrap();
    assert_eq!(after.visibility, Visibility::Unique);
    assert!(items(engine, ItemKind::MISSION, t.member(1)).await.is_empty());

    // And the engine still works.
    let report = engine.share_item(ItemKind::MISSION, item.id).await.unwrap();
    assert_eq!(report.replicas.len(), 1);
    assert_consistent(engine, &t.members).await;
}

/// Test: with_retry rides out a lock held for less than the retry budget
#[tokio::test]
async fn retry_outlasts_short_contention() {
    let t = cluster_with(2).await;
    let engine = t.engine().clone();
    let item = engine
        .create_item(ItemKind::PO, t.member(0), json!("PO"), 0)
        .await
        .unwrap();

    let mut holder = engine.store().transaction().await.unwrap();
    holder.lock_cluster(t.cluster).await.unwrap();
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        holder.rollback().await.unwrap();
    });

    let impatient = engine.with_timeout(Duration::from_millis(50));
    let report = with_retry(&RetryConfig::testing(), "share_item", || {
        impatient.share_item(ItemKind::PO, item.id)
    })
    .await
    .unwrap();
    assert_eq!(report.replicas.len(), 1);

    release.await.unwrap();
    assert_consistent(&engine, &t.members).await;
}

// =============================================================================
// Concurrency
// =============================================================================

/// Test: Two concurrent removals of the same member; exactly one wins
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_remove_member_single_winner() {
    let t = cluster_with(3).await;
    let (a, b) = (t.member(0), t.member(1));
    let engine = t.engine().clone();

    let m = engine
        .create_item(ItemKind::PSO, a, json!("shared"), 0)
        .await
        .unwrap();
    engine.share_item(ItemKind::PSO, m.id).await.unwrap();

    let spawn_removal = |engine: sharing_engine::ClusterEngine, cluster: i64| {
        tokio::spawn(async move {
            with_retry(&RetryConfig::testing(), "remove_member", || {
                engine.remove_member(cluster, b)
            })
            .await
        })
    };
    let first = spawn_removal(engine.clone(), t.cluster);
    let second = spawn_removal(engine.clone(), t.cluster);
    let results = [first.await.unwrap(), second.await.unwrap()];

    let wins = results.iter().filter(|r| r.is_ok()).count();
    let not_member = results
        .iter()
        .filter(|r| matches!(r, Err(SharingError::NotMember { .. })))
        .count();
    assert_eq!((wins, not_member), (1, 1), "results: {:?}", results);

    let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
    assert_eq!(winner.adopted.len(), 1);
    assert!(engine.cluster_of(b).await.unwrap().is_none());
    assert_consistent(&engine, &t.members).await;
}

/// Test: Concurrent edits with the same expected version; the loser sees
/// a version conflict instead of silently overwriting
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_edits_lost_update_detected() {
    let t = cluster_with(2).await;
    let engine = t.engine().clone();
    let m = engine
        .create_item(ItemKind::MISSION, t.member(0), json!("v0"), 0)
        .await
        .unwrap();
    engine.share_item(ItemKind::MISSION, m.id).await.unwrap();
    let version = engine.get_item(ItemKind::MISSION, m.id).await.unwrap().version;

    let edit = |engine: sharing_engine::ClusterEngine, text: &'static str| {
        tokio::spawn(async move {
            with_retry(&RetryConfig::testing(), "update_item", || {
                engine.update_item(
                    ItemKind::MISSION,
                    m.id,
                    ItemEdit::new(json!(text), 0).expecting_version(version),
                )
            })
            .await
        })
    };
    let left = edit(engine.clone(), "left");
    let right = edit(engine.clone(), "right");
    let results = [left.await.unwrap(), right.await.unwrap()];

    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(SharingError::VersionConflict { .. })))
        .count();
    assert_eq!(conflicts, 1, "results: {:?}", results);

    // Whatever won, the replica agrees with the source.
    let source = engine.get_item(ItemKind::MISSION, m.id).await.unwrap();
    let replica = &items(&engine, ItemKind::MISSION, t.member(1)).await[0];
    assert_eq!(replica.payload, source.payload);
    assert_consistent(&engine, &t.members).await;
}

// =============================================================================
// Corrupted Data Handling
// =============================================================================

/// Test: A payload that is not JSON is a fatal store error, not a panic
#[tokio::test]
async fn corrupted_payload_is_fatal() {
    let t = cluster_with(1).await;
    let engine = t.engine();
    let m = engine
        .create_item(ItemKind::MISSION, t.member(0), json!("fine"), 0)
        .await
        .unwrap();

    let raw = raw_pool(&t.env.db_path()).await;
    sqlx::query("UPDATE missions SET statement = '{not json' WHERE id = ?")
        .bind(m.id)
        .execute(&raw)
        .await
        .unwrap();
    raw.close().await;

    let err = engine.get_item(ItemKind::MISSION, m.id).await.unwrap_err();
    assert!(matches!(err, SharingError::Fatal { .. }), "got {:?}", err);
    assert!(!err.is_retryable());
    assert_eq!(err.category(), ErrorCategory::Store);

    // A write through the corrupted row fails the same way and changes nothing.
    let err = engine.share_item(ItemKind::MISSION, m.id).await.unwrap_err();
    assert!(matches!(err, SharingError::Fatal { .. }));
}

/// Test: A half-set source reference is rejected on read
#[tokio::test]
async fn half_set_source_is_fatal() {
    let t = cluster_with(1).await;
    let engine = t.engine();
    let m = engine
        .create_item(ItemKind::PEO, t.member(0), json!("PEO"), 0)
        .await
        .unwrap();

    let raw = raw_pool(&t.env.db_path()).await;
    sqlx::query("UPDATE peos SET source_item_id = 999 WHERE id = ?")
        .bind(m.id)
        .execute(&raw)
        .await
        .unwrap();
    raw.close().await;

    assert!(matches!(
        engine.get_item(ItemKind::PEO, m.id).await,
        Err(SharingError::Fatal { .. })
    ));
}

// =============================================================================
// Tracker Damage
// =============================================================================

/// Test: A replica whose record vanished blocks member removal and is
/// reported by the audit; the failed removal leaves everything in place
#[tokio::test]
async fn missing_record_is_tracker_inconsistent() {
    let t = cluster_with(2).await;
    let (a, b) = (t.member(0), t.member(1));
    let engine = t.engine();

    let m = engine
        .create_item(ItemKind::MISSION, a, json!("M"), 0)
        .await
        .unwrap();
    let replica = engine.share_item(ItemKind::MISSION, m.id).await.unwrap().replicas[0].replica_item;

    let raw = raw_pool(&t.env.db_path()).await;
    sqlx::query("DELETE FROM sharing_records WHERE replica_item_id = ?")
        .bind(replica)
        .execute(&raw)
        .await
        .unwrap();
    raw.close().await;

    let audit = engine.audit(t.cluster).await.unwrap();
    assert!(audit
        .violations
        .iter()
        .any(|v| matches!(v, Violation::UntrackedReplica { item } if item.id == replica)));

    let err = engine.remove_member(t.cluster, b).await.unwrap_err();
    assert!(matches!(err, SharingError::TrackerInconsistent(_)), "got {:?}", err);
    assert_eq!(err.http_status(), 500);

    // Rolled back: still a member, replica still linked.
    assert_eq!(engine.cluster_of(b).await.unwrap().map(|m| m.cluster), Some(t.cluster));
    let row = engine.get_item(ItemKind::MISSION, replica).await.unwrap();
    assert!(row.is_replica());
}

/// Test: A record pointing at a row that does not exist blocks unshare
#[tokio::test]
async fn dangling_record_is_tracker_inconsistent() {
    let t = cluster_with(2).await;
    let engine = t.engine();
    let m = engine
        .create_item(ItemKind::PO, t.member(0), json!("PO"), 0)
        .await
        .unwrap();
    engine.share_item(ItemKind::PO, m.id).await.unwrap();

    let raw = raw_pool(&t.env.db_path()).await;
    sqlx::query(
        "INSERT INTO sharing_records (kind, source_item_id, target_curriculum_id, replica_item_id, created_at) \
         VALUES ('po', ?, ?, 4242, 0)",
    )
    .bind(m.id)
    .bind(t.member(1))
    .execute(&raw)
    .await
    .unwrap();
    raw.close().await;

    let audit = engine.audit(t.cluster).await.unwrap();
    assert!(audit
        .violations
        .iter()
        .any(|v| matches!(v, Violation::DanglingRecord { replica_item: 4242, .. })));

    let err = engine.unshare_item(ItemKind::PO, m.id).await.unwrap_err();
    assert!(matches!(err, SharingError::TrackerInconsistent(_)), "got {:?}", err);

    // The real replica survived the aborted unshare.
    assert_eq!(items(engine, ItemKind::PO, t.member(1)).await.len(), 1);
    assert_eq!(
        engine.get_item(ItemKind::PO, m.id).await.unwrap().visibility,
        Visibility::Cluster
    );
}
