//! Shared test utilities for integration, property and chaos tests.
//!
//! This module provides:
//! - Engines over throwaway SQLite files (`tempfile`)
//! - Clusters pre-populated with curricula
//! - Invariant assertions backed by the engine audit

#![allow(dead_code)]

use sharing_engine::{
    ClusterEngine, EngineConfig, ItemKind, Registry, ShareableItem, Visibility,
};
use tempfile::TempDir;

/// An engine and the directory holding its database.
///
/// Keep the fixture alive for the duration of the test; dropping it removes
/// the database file.
pub struct TestEngine {
    pub engine: ClusterEngine,
    pub dir: TempDir,
}

impl TestEngine {
    pub fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("sharing.db")
    }
}

/// Fresh engine with the default registry on a temp file.
pub async fn test_engine() -> TestEngine {
    test_engine_with(Registry::default()).await
}

pub async fn test_engine_with(registry: Registry) -> TestEngine {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EngineConfig::for_testing(dir.path().join("sharing.db"));
    let engine = ClusterEngine::open(&config, registry)
        .await
        .expect("open engine");
    TestEngine { engine, dir }
}

/// A cluster whose members were admitted in order.
pub struct TestCluster {
    pub env: TestEngine,
    pub cluster: i64,
    pub members: Vec<i64>,
}

impl TestCluster {
    pub fn engine(&self) -> &ClusterEngine {
        &self.env.engine
    }

    pub fn member(&self, i: usize) -> i64 {
        self.members[i]
    }
}

/// Cluster with `n` members named A, B, C, ...
pub async fn cluster_with(n: usize) -> TestCluster {
    let env = test_engine().await;
    let cluster = env
        .engine
        .create_cluster("test-cluster", Some("fixture"))
        .await
        .expect("create cluster")
        .id;

    let mut members = Vec::with_capacity(n);
    for i in 0..n {
        let name = ((b'A' + i as u8) as char).to_string();
        let c = env.engine.register_curriculum(&name).await.expect("curriculum");
        env.engine.add_member(cluster, c.id).await.expect("add member");
        members.push(c.id);
    }
    TestCluster {
        env,
        cluster,
        members,
    }
}

/// Live items of `kind` in `curriculum`.
pub async fn items(engine: &ClusterEngine, kind: ItemKind, curriculum: i64) -> Vec<ShareableItem> {
    engine.list_items(kind, curriculum).await.expect("list items")
}

/// Assert the item is owned (no source) and UNIQUE.
pub fn assert_unique_owned(item: &ShareableItem) {
    assert!(item.source.is_none(), "{:?} should have no source", item);
    assert_eq!(item.visibility, Visibility::Unique, "{:?} should be UNIQUE", item);
}

/// Assert the audit finds nothing wrong across `curricula`.
pub async fn assert_consistent(engine: &ClusterEngine, curricula: &[i64]) {
    let report = engine.audit_curricula(curricula).await.expect("audit");
    assert!(
        report.is_consistent(),
        "sharing invariants violated: {:#?}",
        report.violations
    );
}
