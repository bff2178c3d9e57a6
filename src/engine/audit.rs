// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read-only consistency audit.
//!
//! Checks the sharing invariants for a set of curricula and reports every
//! violation it finds. The audit never repairs: reconciling is an operator
//! decision.
//!
//! # Checks
//!
//! | Check | Violation |
//! |-------|-----------|
//! | replica row without a record | [`Violation::UntrackedReplica`] |
//! | record without a matching live replica row | [`Violation::DanglingRecord`] |
//! | replica tagged UNIQUE | [`Violation::ReplicaNotShared`] |
//! | replica whose source is missing, deleted or held elsewhere | [`Violation::BrokenSource`] |
//! | replica of a replica, or of its own curriculum | [`Violation::DishonestSource`] |
//! | deleted row still linked to a source | [`Violation::DeletedReplica`] |
//! | UNIQUE owned item with records | [`Violation::UniqueWithReplicas`] |
//!
//! An owned CLUSTER item with no replicas is legal (a cluster of one, or a
//! peer that left) and is listed under [`AuditReport::idle_shares`].

use super::{registered_kinds, ClusterEngine};
use crate::error::Result;
use crate::metrics;
use crate::model::{ItemRef, Visibility};
use crate::registry::ItemKind;
use crate::store::StoreTx;
use serde::Serialize;
use std::fmt;
use tracing::{instrument, warn};

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Violation {
    UntrackedReplica { item: ItemRef },
    DanglingRecord {
        kind: ItemKind,
        source_item: i64,
        target_curriculum: i64,
        replica_item: i64,
    },
    ReplicaNotShared { item: ItemRef },
    BrokenSource { item: ItemRef, source_item: i64 },
    DishonestSource { item: ItemRef, source_item: i64 },
    DeletedReplica { item: ItemRef },
    UniqueWithReplicas { item: ItemRef, replicas: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::UntrackedReplica { item } => write!(f, "{} has a source but no record", item),
            Violation::DanglingRecord {
                kind,
                source_item,
                target_curriculum,
                replica_item,
            } => write!(
                f,
                "record ({}, {}, {}, {}) has no matching live replica",
                kind, source_item, target_curriculum, replica_item
            ),
            Violation::ReplicaNotShared { item } => write!(f, "replica {} is tagged UNIQUE", item),
            Violation::BrokenSource { item, source_item } => {
                write!(f, "{} points at unusable source {}", item, source_item)
            }
            Violation::DishonestSource { item, source_item } => {
                write!(f, "{} points at source {} that is not a peer's own item", item, source_item)
            }
            Violation::DeletedReplica { item } => write!(f, "deleted {} still has a source", item),
            Violation::UniqueWithReplicas { item, replicas } => {
                write!(f, "UNIQUE {} still has {} replica(s)", item, replicas)
            }
        }
    }
}

/// Outcome of an audit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub curricula: Vec<i64>,
    pub items_checked: usize,
    pub records_checked: usize,
    pub violations: Vec<Violation>,
    /// Owned CLUSTER items with no replica.
    pub idle_shares: Vec<ItemRef>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

impl ClusterEngine {
    /// Audit the members of a cluster.
    #[instrument(skip(self))]
    pub async fn audit(&self, cluster: i64) -> Result<AuditReport> {
        self.bounded("audit", async {
            let mut tx = self.store.transaction().await?;
            tx.lock_cluster(cluster).await?;
            let members: Vec<i64> = tx
                .members_of(cluster)
                .await?
                .into_iter()
                .map(|m| m.curriculum)
                .collect();
            let report = self.audit_in(&mut tx, &members).await?;
            // Read-only: the lock bump is discarded.
            tx.rollback().await?;
            Ok(report)
        })
        .await
    }

    /// Audit arbitrary curricula, in or out of clusters.
    #[instrument(skip(self))]
    pub async fn audit_curricula(&self, curricula: &[i64]) -> Result<AuditReport> {
        self.bounded("audit", async {
            let mut tx = self.store.transaction().await?;
            let report = self.audit_in(&mut tx, curricula).await?;
            tx.rollback().await?;
            Ok(report)
        })
        .await
    }

    async fn audit_in(&self, tx: &mut StoreTx, curricula: &[i64]) -> Result<AuditReport> {
        let mut report = AuditReport {
            curricula: curricula.to_vec(),
            ..Default::default()
        };

        for kind in registered_kinds(tx) {
            for &curriculum in curricula {
                self.audit_items(tx, kind, curriculum, &mut report).await?;
                self.audit_records(tx, kind, curriculum, &mut report).await?;
            }
        }

        metrics::record_audit(report.violations.len());
        for violation in &report.violations {
            warn!(violation = %violation, "Sharing invariant violated");
        }
        Ok(report)
    }

    async fn audit_items(
        &self,
        tx: &mut StoreTx,
        kind: ItemKind,
        curriculum: i64,
        report: &mut AuditReport,
    ) -> Result<()> {
        let items = tx.read_by_owner(kind, curriculum, true).await?;
        report.items_checked += items.len();

        for item in items {
            let item_ref = item.item_ref();
            let Some(source) = item.source else {
                if item.is_deleted() {
                    continue;
                }
                let replicas = self.tracker.replicas_of(tx, kind, item.id).await?;
                match item.visibility {
                    Visibility::Unique if !replicas.is_empty() => {
                        report.violations.push(Violation::UniqueWithReplicas {
                            item: item_ref,
                            replicas: replicas.len(),
                        });
                    }
                    Visibility::Cluster if replicas.is_empty() => {
                        report.idle_shares.push(item_ref);
                    }
                    _ => {}
                }
                continue;
            };

            if item.is_deleted() {
                report.violations.push(Violation::DeletedReplica { item: item_ref });
            }
            if item.visibility != Visibility::Cluster {
                report.violations.push(Violation::ReplicaNotShared { item: item_ref });
            }
            match self.tracker.source_of(tx, kind, item.id).await? {
                Some(r) if r.source_item == source.item && r.target_curriculum == curriculum => {}
                _ => report.violations.push(Violation::UntrackedReplica { item: item_ref }),
            }

            match tx.read_item(kind, source.item).await? {
                None => report.violations.push(Violation::BrokenSource {
                    item: item_ref,
                    source_item: source.item,
                }),
                Some(original) => {
                    if original.is_replica() || original.owner == curriculum {
                        report.violations.push(Violation::DishonestSource {
                            item: item_ref,
                            source_item: source.item,
                        });
                    } else if original.is_deleted() || original.owner != source.curriculum {
                        report.violations.push(Violation::BrokenSource {
                            item: item_ref,
                            source_item: source.item,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn audit_records(
        &self,
        tx: &mut StoreTx,
        kind: ItemKind,
        curriculum: i64,
        report: &mut AuditReport,
    ) -> Result<()> {
        let records = self.tracker.records_targeting(tx, kind, curriculum).await?;
        report.records_checked += records.len();

        for record in records {
            let matches = tx
                .read_item(kind, record.replica_item)
                .await?
                .is_some_and(|row| {
                    !row.is_deleted()
                        && row.owner == record.target_curriculum
                        && row.source.map(|s| s.item) == Some(record.source_item)
                });
            if !matches {
                report.violations.push(Violation::DanglingRecord {
                    kind,
                    source_item: record.source_item,
                    target_curriculum: record.target_curriculum,
                    replica_item: record.replica_item,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::store::Store;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clean_cluster_is_consistent() {
        let store = Store::in_memory(Registry::default()).await.unwrap();
        let engine = ClusterEngine::new(store, Duration::from_secs(10));
        let cluster = engine.create_cluster("X", None).await.unwrap().id;
        let a = engine.register_curriculum("A").await.unwrap().id;
        let b = engine.register_curriculum("B").await.unwrap().id;
        engine.add_member(cluster, a).await.unwrap();

        let item = engine
            .create_item(ItemKind::PO, a, json!("PO1"), 0)
            .await
            .unwrap();
        engine.share_item(ItemKind::PO, item.id).await.unwrap();

        // Cluster of one: shared with nobody yet.
        let report = engine.audit(cluster).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.idle_shares, vec![item.item_ref()]);

        engine.add_member(cluster, b).await.unwrap();
        let report = engine.audit(cluster).await.unwrap();
        assert!(report.is_consistent(), "{:?}", report.violations);
        assert!(report.idle_shares.is_empty());
        assert_eq!(report.records_checked, 1);
    }

    #[tokio::test]
    async fn test_untracked_replica_reported() {
        let store = Store::in_memory(Registry::default()).await.unwrap();
        let engine = ClusterEngine::new(store.clone(), Duration::from_secs(10));
        let a = engine.register_curriculum("A").await.unwrap().id;
        let b = engine.register_curriculum("B").await.unwrap().id;
        let source = engine
            .create_item(ItemKind::MISSION, a, json!("M"), 0)
            .await
            .unwrap();

        // A linked row written behind the engine's back.
        let mut tx = store.transaction().await.unwrap();
        tx.insert_item(ItemKind::MISSION, &crate::model::NewItem::replica_of(&source, b))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let report = engine.audit_curricula(&[a, b]).await.unwrap();
        assert!(!report.is_consistent());
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::UntrackedReplica { .. })));
    }

    #[test]
    fn test_violation_display() {
        let v = Violation::UniqueWithReplicas {
            item: ItemRef { kind: ItemKind::PEO, id: 3 },
            replicas: 2,
        };
        assert_eq!(v.to_string(), "UNIQUE peo#3 still has 2 replica(s)");
    }
}
