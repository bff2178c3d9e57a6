// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sharing, edit propagation, copy-on-write and deletion.
//!
//! # Edit Rules
//!
//! | Target | Payload | Effect |
//! |--------|---------|--------|
//! | owned UNIQUE | any | local write |
//! | owned CLUSTER | any | local write, payload copied to every replica |
//! | replica | unchanged | position written, link kept |
//! | replica | changed | copy-on-write: converted to owned UNIQUE |
//!
//! Replica positions are never re-synchronised from the source.
//!
//! # Copy-on-Write Order
//!
//! The sharing record is forgotten *before* the row is rewritten. A later
//! source-side unshare walks the tracker, so a converted row that was still
//! tracked would be deleted together with the former source's replicas.

use super::{
    ClusterEngine, DeleteOutcome, DeletePath, EditOutcome, EditPath, ShareReport, UnshareReport,
};
use crate::error::{Result, SharingError};
use crate::metrics;
use crate::model::{ItemEdit, NewItem, ShareableItem, SourceRef, Visibility};
use crate::registry::{DeleteMode, ItemKind};
use crate::store::StoreTx;
use crate::tracker::SharingRecord;
use tracing::{debug, info, instrument};

impl ClusterEngine {
    // ═══════════════════════════════════════════════════════════════════════
    // Share / unshare
    // ═══════════════════════════════════════════════════════════════════════

    /// Share an owned UNIQUE item with every peer of its curriculum.
    ///
    /// In a cluster of one the item becomes CLUSTER with no replicas; later
    /// joiners are backfilled.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn share_item(&self, kind: ItemKind, item: i64) -> Result<ShareReport> {
        self.bounded("share_item", async {
            let mut tx = self.store.transaction().await?;
            let report = self.share_item_in(&mut tx, kind, item).await?;
            tx.commit().await?;
            info!(
                item,
                cluster = report.cluster,
                replicas = report.replicas.len(),
                "Shared item"
            );
            Ok(report)
        })
        .await
    }

    async fn share_item_in(&self, tx: &mut StoreTx, kind: ItemKind, id: i64) -> Result<ShareReport> {
        tx.lock_item(kind, id).await?;
        let item = tx.fetch_item(kind, id).await?;

        if item.is_deleted() {
            return Err(SharingError::Vanished { kind, item: id });
        }
        if let Some(source) = item.source {
            return Err(SharingError::NotShareable {
                kind,
                item: id,
                reason: format!("it is a replica of {} {}", kind, source.item),
            });
        }
        if item.visibility == Visibility::Cluster {
            return Err(SharingError::AlreadyShared { kind, item: id });
        }
        let cluster = match tx.membership_of(item.owner).await? {
            Some(m) => m.cluster,
            None => {
                return Err(SharingError::NotShareable {
                    kind,
                    item: id,
                    reason: format!("curriculum {} is not in a cluster", item.owner),
                })
            }
        };

        tx.set_visibility(kind, id, Visibility::Cluster).await?;

        let peers: Vec<i64> = tx
            .members_of(cluster)
            .await?
            .into_iter()
            .map(|m| m.curriculum)
            .filter(|&c| c != item.owner)
            .collect();

        let mut replicas = Vec::with_capacity(peers.len());
        for peer in peers {
            replicas.push(self.replicate_into(tx, &item, peer).await?);
        }
        if !replicas.is_empty() {
            metrics::record_replicas_created(kind, "share", replicas.len());
        }

        Ok(ShareReport {
            item: item.item_ref(),
            cluster,
            replicas,
        })
    }

    /// Create and track a replica of `source` in `target`.
    ///
    /// Carries the source's payload and position at this moment.
    pub(super) async fn replicate_into(
        &self,
        tx: &mut StoreTx,
        source: &ShareableItem,
        target: i64,
    ) -> Result<SharingRecord> {
        let kind = source.kind;
        if let Some(existing) = tx.find_replica_of(kind, source.id, target).await? {
            return Err(SharingError::TrackerInconsistent(format!(
                "curriculum {} already holds {} {} linked to {}",
                target, kind, existing.id, source.id
            )));
        }

        let replica = tx.insert_item(kind, &NewItem::replica_of(source, target)).await?;
        let record = self
            .tracker
            .record(tx, kind, source.id, target, replica.id)
            .await?;
        debug!(%kind, source = source.id, target, replica = replica.id, "Created replica");
        Ok(record)
    }

    /// End sharing from the source side: replicas are deleted and the item
    /// goes back to UNIQUE.
    ///
    /// Already-UNIQUE items are left alone. Fails with `NotOwner` on a replica.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn unshare_item(&self, kind: ItemKind, item: i64) -> Result<UnshareReport> {
        self.bounded("unshare_item", async {
            let mut tx = self.store.transaction().await?;
            tx.lock_item(kind, item).await?;
            let current = tx.fetch_item(kind, item).await?;
            if current.is_deleted() {
                return Err(SharingError::Vanished { kind, item });
            }
            let removed = self.unshare_in(&mut tx, &current).await?;
            tx.commit().await?;
            info!(item, removed = removed.len(), "Unshared item");
            Ok(UnshareReport {
                item: current.item_ref(),
                removed,
            })
        })
        .await
    }

    /// Caller holds the item lock.
    async fn unshare_in(&self, tx: &mut StoreTx, item: &ShareableItem) -> Result<Vec<SharingRecord>> {
        let kind = item.kind;
        if item.is_replica() {
            return Err(SharingError::NotOwner { kind, item: item.id });
        }
        if item.visibility == Visibility::Unique {
            return Ok(Vec::new());
        }

        let records = self.tracker.replicas_of(tx, kind, item.id).await?;
        for record in &records {
            self.retire_replica(tx, record).await?;
        }
        tx.set_visibility(kind, item.id, Visibility::Unique).await?;

        if !records.is_empty() {
            metrics::record_replicas_removed(kind, "unshare", records.len());
        }
        Ok(records)
    }

    /// Delete a tracked replica on behalf of its source.
    async fn retire_replica(&self, tx: &mut StoreTx, record: &SharingRecord) -> Result<()> {
        let kind = record.kind;
        let replica = self.tracked_replica(tx, record).await?;

        self.tracker
            .forget(tx, kind, record.target_curriculum, replica.id)
            .await?;
        let mode = tx.registry_handle().spec(kind)?.delete_mode();
        if mode == DeleteMode::Soft {
            tx.set_source_and_visibility(kind, replica.id, None, Visibility::Unique)
                .await?;
        }
        tx.delete_item_row(kind, replica.id).await?;
        debug!(%kind, replica = replica.id, target = record.target_curriculum, "Deleted replica");
        Ok(())
    }

    /// Lock and read the replica a record points at, checking they agree.
    async fn tracked_replica(&self, tx: &mut StoreTx, record: &SharingRecord) -> Result<ShareableItem> {
        let kind = record.kind;
        let inconsistent = |what: &str| {
            SharingError::TrackerInconsistent(format!(
                "record ({}, {}, {}, {}) {}",
                kind, record.source_item, record.target_curriculum, record.replica_item, what
            ))
        };

        let replica = match tx.lock_item(kind, record.replica_item).await {
            Ok(()) => tx.fetch_item(kind, record.replica_item).await?,
            Err(SharingError::NotFound { .. }) => return Err(inconsistent("points at a missing replica")),
            Err(e) => return Err(e),
        };
        if replica.is_deleted() {
            return Err(inconsistent("points at a deleted replica"));
        }
        if replica.owner != record.target_curriculum
            || replica.source.map(|s| s.item) != Some(record.source_item)
        {
            return Err(inconsistent("disagrees with the replica row"));
        }
        Ok(replica)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Edits
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply a writer-facing edit. Replicas always accept edits.
    ///
    /// Fails with `Vanished` on a deleted item and `VersionConflict` when
    /// `edit.expected_version` is stale.
    #[instrument(skip(self, edit), fields(kind = %kind))]
    pub async fn update_item(&self, kind: ItemKind, item: i64, edit: ItemEdit) -> Result<EditOutcome> {
        self.bounded("update_item", async {
            let mut tx = self.store.transaction().await?;
            let path = self.update_item_in(&mut tx, kind, item, &edit).await?;
            let updated = tx.fetch_item(kind, item).await?;
            tx.commit().await?;
            debug!(item, version = updated.version, "Updated item");
            Ok(EditOutcome {
                item: updated,
                path,
            })
        })
        .await
    }

    async fn update_item_in(
        &self,
        tx: &mut StoreTx,
        kind: ItemKind,
        id: i64,
        edit: &ItemEdit,
    ) -> Result<EditPath> {
        tx.lock_item(kind, id).await?;
        let item = tx.fetch_item(kind, id).await?;

        if item.is_deleted() {
            return Err(SharingError::Vanished { kind, item: id });
        }
        if let Some(expected) = edit.expected_version {
            if expected != item.version {
                return Err(SharingError::VersionConflict {
                    kind,
                    item: id,
                    expected,
                    actual: item.version,
                });
            }
        }

        let payload_changed = item.payload != edit.payload;
        match item.source {
            None if item.visibility == Visibility::Unique => {
                tx.update_fields(kind, id, Some(&edit.payload), Some(edit.position))
                    .await?;
                Ok(EditPath::Local)
            }
            None => {
                tx.update_fields(kind, id, Some(&edit.payload), Some(edit.position))
                    .await?;
                let replicas = if payload_changed {
                    self.propagate_payload(tx, &item, &edit.payload).await?
                } else {
                    Vec::new()
                };
                Ok(EditPath::Propagated { replicas })
            }
            Some(_) if !payload_changed => {
                tx.update_fields(kind, id, None, Some(edit.position)).await?;
                Ok(EditPath::ReplicaPosition)
            }
            Some(source) => self.copy_on_write(tx, &item, source, edit).await,
        }
    }

    /// Copy a source's new payload to its replicas, ascending replica id.
    async fn propagate_payload(
        &self,
        tx: &mut StoreTx,
        source: &ShareableItem,
        payload: &serde_json::Value,
    ) -> Result<Vec<i64>> {
        let records = self.tracker.replicas_of(tx, source.kind, source.id).await?;
        let mut touched = Vec::with_capacity(records.len());
        for record in &records {
            let replica = self.tracked_replica(tx, record).await?;
            tx.update_fields(source.kind, replica.id, Some(payload), None)
                .await?;
            touched.push(replica.id);
        }
        if !touched.is_empty() {
            debug!(kind = %source.kind, source = source.id, replicas = touched.len(), "Propagated payload");
        }
        Ok(touched)
    }

    /// Convert a replica into an owned UNIQUE item.
    async fn copy_on_write(
        &self,
        tx: &mut StoreTx,
        replica: &ShareableItem,
        source: SourceRef,
        edit: &ItemEdit,
    ) -> Result<EditPath> {
        let kind = replica.kind;

        let record = self
            .tracker
            .source_of(tx, kind, replica.id)
            .await?
            .ok_or_else(|| {
                SharingError::TrackerInconsistent(format!(
                    "{} replica {} has no sharing record",
                    kind, replica.id
                ))
            })?;
        if record.source_item != source.item || record.target_curriculum != replica.owner {
            return Err(SharingError::TrackerInconsistent(format!(
                "{} replica {} disagrees with its sharing record",
                kind, replica.id
            )));
        }

        // 1. Forget first so no later unshare can reach this row.
        self.tracker
            .forget(tx, kind, replica.owner, replica.id)
            .await?;

        // 2. Sever and write.
        tx.set_source_and_visibility(kind, replica.id, None, Visibility::Unique)
            .await?;
        tx.update_fields(kind, replica.id, Some(&edit.payload), Some(edit.position))
            .await?;

        // 3. The former source goes back to UNIQUE once nobody replicates it.
        let original = match tx.lock_item(kind, source.item).await {
            Ok(()) => tx.fetch_item(kind, source.item).await?,
            Err(SharingError::NotFound { .. }) => {
                return Err(SharingError::TrackerInconsistent(format!(
                    "{} replica {} points at missing source {}",
                    kind, replica.id, source.item
                )))
            }
            Err(e) => return Err(e),
        };
        let remaining = self.tracker.replicas_of(tx, kind, original.id).await?;
        let source_reverted = remaining.is_empty() && original.is_shared_source();
        if source_reverted {
            tx.set_visibility(kind, original.id, Visibility::Unique).await?;
        }

        metrics::record_copy_on_write(kind, source_reverted);
        info!(
            %kind,
            replica = replica.id,
            former_source = original.id,
            source_reverted,
            "Replica converted by copy-on-write"
        );
        Ok(EditPath::CopyOnWrite {
            former_source: original.item_ref(),
            source_reverted,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Delete
    // ═══════════════════════════════════════════════════════════════════════

    /// Delete an item: soft for kinds with a status column, hard otherwise.
    ///
    /// A shared source is unshared first. A replica's record is forgotten and
    /// its source left untouched. Deleting a deleted item is a no-op.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn delete_item(&self, kind: ItemKind, item: i64) -> Result<DeleteOutcome> {
        self.bounded("delete_item", async {
            let mut tx = self.store.transaction().await?;
            let outcome = self.delete_item_in(&mut tx, kind, item).await?;
            tx.commit().await?;
            debug!(item, path = ?outcome.path, "Deleted item");
            Ok(outcome)
        })
        .await
    }

    async fn delete_item_in(&self, tx: &mut StoreTx, kind: ItemKind, id: i64) -> Result<DeleteOutcome> {
        tx.lock_item(kind, id).await?;
        let item = tx.fetch_item(kind, id).await?;
        let mode = tx.registry_handle().spec(kind)?.delete_mode();

        if item.is_deleted() {
            return Ok(DeleteOutcome {
                item: item.item_ref(),
                path: DeletePath::AlreadyDeleted,
                mode,
            });
        }

        let path = if item.is_replica() {
            if !self.tracker.forget(tx, kind, item.owner, id).await? {
                return Err(SharingError::TrackerInconsistent(format!(
                    "{} replica {} has no sharing record",
                    kind, id
                )));
            }
            if mode == DeleteMode::Soft {
                tx.set_source_and_visibility(kind, id, None, Visibility::Unique)
                    .await?;
            }
            metrics::record_replicas_removed(kind, "delete", 1);
            DeletePath::Replica
        } else if item.visibility == Visibility::Cluster {
            let removed = self.unshare_in(tx, &item).await?;
            DeletePath::SharedSource {
                replicas_removed: removed.len(),
            }
        } else {
            DeletePath::Owned
        };

        tx.delete_item_row(kind, id).await?;
        Ok(DeleteOutcome {
            item: item.item_ref(),
            path,
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{ClusterEngine, DeletePath, EditPath, ItemState};
    use crate::error::SharingError;
    use crate::model::{ItemEdit, Visibility};
    use crate::registry::{ItemKind, Registry};
    use crate::store::Store;
    use serde_json::json;
    use std::time::Duration;

    struct Pair {
        engine: ClusterEngine,
        cluster: i64,
        a: i64,
        b: i64,
    }

    async fn pair() -> Pair {
        let store = Store::in_memory(Registry::default()).await.unwrap();
        let engine = ClusterEngine::new(store, Duration::from_secs(10));
        let cluster = engine.create_cluster("X", None).await.unwrap().id;
        let a = engine.register_curriculum("A").await.unwrap().id;
        let b = engine.register_curriculum("B").await.unwrap().id;
        engine.add_member(cluster, a).await.unwrap();
        engine.add_member(cluster, b).await.unwrap();
        Pair { engine, cluster, a, b }
    }

    #[tokio::test]
    async fn test_share_outside_cluster_not_shareable() {
        let p = pair().await;
        let loner = p.engine.register_curriculum("L").await.unwrap().id;
        let item = p
            .engine
            .create_item(ItemKind::PO, loner, json!("PO1"), 0)
            .await
            .unwrap();
        let err = p.engine.share_item(ItemKind::PO, item.id).await.unwrap_err();
        assert!(matches!(err, SharingError::NotShareable { .. }));
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_share_twice_and_share_replica() {
        let p = pair().await;
        let item = p
            .engine
            .create_item(ItemKind::PSO, p.a, json!("PSO1"), 0)
            .await
            .unwrap();
        let report = p.engine.share_item(ItemKind::PSO, item.id).await.unwrap();
        assert_eq!(report.cluster, p.cluster);

        assert!(matches!(
            p.engine.share_item(ItemKind::PSO, item.id).await,
            Err(SharingError::AlreadyShared { .. })
        ));
        let replica = report.replicas[0].replica_item;
        assert!(matches!(
            p.engine.share_item(ItemKind::PSO, replica).await,
            Err(SharingError::NotShareable { .. })
        ));
    }

    #[tokio::test]
    async fn test_unshare_replica_is_not_owner() {
        let p = pair().await;
        let item = p
            .engine
            .create_item(ItemKind::PEO, p.a, json!("PEO1"), 0)
            .await
            .unwrap();
        let report = p.engine.share_item(ItemKind::PEO, item.id).await.unwrap();
        let err = p
            .engine
            .unshare_item(ItemKind::PEO, report.replicas[0].replica_item)
            .await
            .unwrap_err();
        assert!(matches!(err, SharingError::NotOwner { .. }));
    }

    #[tokio::test]
    async fn test_unshare_unique_is_noop() {
        let p = pair().await;
        let item = p
            .engine
            .create_item(ItemKind::MISSION, p.a, json!("M"), 0)
            .await
            .unwrap();
        let report = p.engine.unshare_item(ItemKind::MISSION, item.id).await.unwrap();
        assert!(report.was_noop());
        assert_eq!(
            p.engine.item_state(ItemKind::MISSION, item.id).await.unwrap(),
            ItemState::UniqueOwned
        );
    }

    #[tokio::test]
    async fn test_replica_position_edit_keeps_link() {
        let p = pair().await;
        let item = p
            .engine
            .create_item(ItemKind::MISSION, p.a, json!("M1"), 0)
            .await
            .unwrap();
        let report = p.engine.share_item(ItemKind::MISSION, item.id).await.unwrap();
        let replica = report.replicas[0].replica_item;

        let outcome = p
            .engine
            .update_item(ItemKind::MISSION, replica, ItemEdit::new(json!("M1"), 9))
            .await
            .unwrap();
        assert_eq!(outcome.path, EditPath::ReplicaPosition);
        assert_eq!(outcome.item.position, 9);
        assert_eq!(outcome.item.visibility, Visibility::Cluster);
        assert!(outcome.item.source.is_some());

        // Source position edits do not move replicas.
        p.engine
            .update_item(ItemKind::MISSION, item.id, ItemEdit::new(json!("M2"), 4))
            .await
            .unwrap();
        let after = p.engine.get_item(ItemKind::MISSION, replica).await.unwrap();
        assert_eq!(after.position, 9);
        assert_eq!(after.payload, json!("M2"));
    }

    #[tokio::test]
    async fn test_stale_version_rejected() {
        let p = pair().await;
        let item = p
            .engine
            .create_item(ItemKind::COURSE, p.a, json!({"code": "CS1"}), 0)
            .await
            .unwrap();
        let edit = ItemEdit::new(json!({"code": "CS2"}), 0).expecting_version(item.version);
        p.engine
            .update_item(ItemKind::COURSE, item.id, edit.clone())
            .await
            .unwrap();

        let err = p
            .engine
            .update_item(ItemKind::COURSE, item.id, edit)
            .await
            .unwrap_err();
        assert!(matches!(err, SharingError::VersionConflict { .. }));
        assert_eq!(err.http_status(), 409);
    }

    #[tokio::test]
    async fn test_delete_paths() {
        let p = pair().await;
        let shared = p
            .engine
            .create_item(ItemKind::PO, p.a, json!("PO1"), 0)
            .await
            .unwrap();
        let local = p
            .engine
            .create_item(ItemKind::PO, p.a, json!("PO2"), 1)
            .await
            .unwrap();
        p.engine.share_item(ItemKind::PO, shared.id).await.unwrap();

        let outcome = p.engine.delete_item(ItemKind::PO, shared.id).await.unwrap();
        assert_eq!(outcome.path, DeletePath::SharedSource { replicas_removed: 1 });
        assert!(p.engine.list_items(ItemKind::PO, p.b).await.unwrap().is_empty());

        let outcome = p.engine.delete_item(ItemKind::PO, local.id).await.unwrap();
        assert_eq!(outcome.path, DeletePath::Owned);
        let again = p.engine.delete_item(ItemKind::PO, local.id).await.unwrap();
        assert_eq!(again.path, DeletePath::AlreadyDeleted);

        assert!(matches!(
            p.engine
                .update_item(ItemKind::PO, local.id, ItemEdit::new(json!("x"), 0))
                .await,
            Err(SharingError::Vanished { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_replica_leaves_source() {
        let p = pair().await;
        let card = p
            .engine
            .create_item(ItemKind::CARD, p.a, json!({"semester": 1}), 0)
            .await
            .unwrap();
        let report = p.engine.share_item(ItemKind::CARD, card.id).await.unwrap();
        let replica = report.replicas[0].replica_item;

        let outcome = p.engine.delete_item(ItemKind::CARD, replica).await.unwrap();
        assert_eq!(outcome.path, DeletePath::Replica);
        // Cards are hard-deleted.
        assert!(matches!(
            p.engine.get_item(ItemKind::CARD, replica).await,
            Err(SharingError::NotFound { .. })
        ));
        assert_eq!(
            p.engine.item_state(ItemKind::CARD, card.id).await.unwrap(),
            ItemState::ClusterOwned
        );
    }

    #[tokio::test]
    async fn test_vision_text_collision_aborts_share() {
        let p = pair().await;
        let va = p
            .engine
            .create_item(ItemKind::VISION_TEXT, p.a, json!("A vision"), 0)
            .await
            .unwrap();
        p.engine
            .create_item(ItemKind::VISION_TEXT, p.b, json!("B vision"), 0)
            .await
            .unwrap();

        let err = p
            .engine
            .share_item(ItemKind::VISION_TEXT, va.id)
            .await
            .unwrap_err();
        assert!(matches!(err, SharingError::Conflict(_)));
        // Rolled back: still UNIQUE.
        assert_eq!(
            p.engine.item_state(ItemKind::VISION_TEXT, va.id).await.unwrap(),
            ItemState::UniqueOwned
        );
    }
}
