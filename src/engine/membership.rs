// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Membership churn: joining and leaving a cluster.
//!
//! Both operations lock the cluster row before any item scan, which
//! serialises churn against share, unshare and edit propagation.
//!
//! # Member Removal
//!
//! Removal never loses data on either side; it only severs live links.
//! For every registered kind, in one transaction:
//!
//! ```text
//! 1. adopt      C's replicas      → source cleared, UNIQUE, record forgotten
//! 2. release    peers' replicas   → source cleared, UNIQUE, record forgotten
//!               of C's items
//! 3. simplify   C's CLUSTER items → UNIQUE (none has a replica left)
//! 4. delete the membership row
//! ```
//!
//! Payloads are never written, so edits a peer made to its copy survive
//! verbatim.

use super::{registered_kinds, require_curriculum, ClusterEngine, JoinReport, RemovalReport};
use crate::error::{Result, SharingError};
use crate::metrics;
use crate::model::{CurriculumStatus, ItemRef, Visibility};
use crate::registry::ItemKind;
use crate::store::StoreTx;
use tracing::{debug, info, instrument};

impl ClusterEngine {
    /// Admit a curriculum and backfill a replica of every item already
    /// shared within the cluster.
    ///
    /// Fails with `AlreadyMember` if the curriculum is in any cluster.
    #[instrument(skip(self))]
    pub async fn add_member(&self, cluster: i64, curriculum: i64) -> Result<JoinReport> {
        self.bounded("add_member", async {
            let mut tx = self.store.transaction().await?;
            let report = self.add_member_in(&mut tx, cluster, curriculum).await?;
            tx.commit().await?;
            info!(
                cluster,
                curriculum,
                replicas = report.replicas.len(),
                "Curriculum joined cluster"
            );
            Ok(report)
        })
        .await
    }

    async fn add_member_in(
        &self,
        tx: &mut StoreTx,
        cluster: i64,
        curriculum: i64,
    ) -> Result<JoinReport> {
        tx.lock_cluster(cluster).await?;

        let joiner = require_curriculum(tx, curriculum).await?;
        if joiner.status == CurriculumStatus::Archived {
            return Err(SharingError::InvalidArgument(format!(
                "curriculum {} is archived",
                curriculum
            )));
        }
        if let Some(existing) = tx.membership_of(curriculum).await? {
            return Err(SharingError::AlreadyMember {
                curriculum,
                cluster: existing.cluster,
            });
        }

        let members = tx.members_of(cluster).await?;
        tx.insert_membership(cluster, curriculum).await?;

        let mut replicas = Vec::new();
        for kind in registered_kinds(tx) {
            let mut created = 0usize;
            for member in &members {
                let shared: Vec<_> = tx
                    .read_by_owner(kind, member.curriculum, false)
                    .await?
                    .into_iter()
                    .filter(|item| item.is_shared_source())
                    .collect();
                for source in &shared {
                    replicas.push(self.replicate_into(tx, source, curriculum).await?);
                    created += 1;
                }
            }
            if created > 0 {
                metrics::record_replicas_created(kind, "backfill", created);
            }
        }

        Ok(JoinReport {
            cluster,
            curriculum,
            replicas,
        })
    }

    /// Detach a curriculum from its cluster, keeping every copy on both sides.
    ///
    /// Fails with `NotMember` if the curriculum has no live membership in
    /// `cluster`. Removing the last member leaves an empty cluster.
    #[instrument(skip(self))]
    pub async fn remove_member(&self, cluster: i64, curriculum: i64) -> Result<RemovalReport> {
        self.bounded("remove_member", async {
            let mut tx = self.store.transaction().await?;
            let report = self.remove_member_in(&mut tx, cluster, curriculum).await?;
            tx.commit().await?;
            info!(
                cluster,
                curriculum,
                adopted = report.adopted.len(),
                released = report.released.len(),
                simplified = report.simplified.len(),
                "Curriculum left cluster"
            );
            Ok(report)
        })
        .await
    }

    async fn remove_member_in(
        &self,
        tx: &mut StoreTx,
        cluster: i64,
        curriculum: i64,
    ) -> Result<RemovalReport> {
        tx.lock_cluster(cluster).await?;

        match tx.membership_of(curriculum).await? {
            Some(m) if m.cluster == cluster => {}
            _ => return Err(SharingError::NotMember { curriculum, cluster }),
        }

        let peers: Vec<i64> = tx
            .members_of(cluster)
            .await?
            .into_iter()
            .map(|m| m.curriculum)
            .filter(|&c| c != curriculum)
            .collect();

        let mut report = RemovalReport {
            cluster,
            curriculum,
            ..Default::default()
        };

        for kind in registered_kinds(tx) {
            let adopted = self.adopt_received(tx, kind, curriculum).await?;
            let released = self.release_owned(tx, kind, curriculum, &peers).await?;
            let simplified = self.simplify_sources(tx, kind, curriculum).await?;

            let leftover = self.tracker.records_targeting(tx, kind, curriculum).await?;
            if let Some(record) = leftover.first() {
                return Err(SharingError::TrackerInconsistent(format!(
                    "record for {} replica {} in curriculum {} has no replica row there",
                    kind, record.replica_item, curriculum
                )));
            }

            let n = adopted.len() + released.len();
            if n > 0 {
                metrics::record_adoptions(kind, n);
            }
            report.adopted.extend(adopted);
            report.released.extend(released);
            report.simplified.extend(simplified);
        }

        tx.delete_membership(cluster, curriculum).await?;
        Ok(report)
    }

    /// Step 1: the leaving curriculum keeps what it received.
    async fn adopt_received(
        &self,
        tx: &mut StoreTx,
        kind: ItemKind,
        curriculum: i64,
    ) -> Result<Vec<ItemRef>> {
        let received: Vec<_> = tx
            .read_by_owner(kind, curriculum, false)
            .await?
            .into_iter()
            .filter(|item| item.is_replica())
            .collect();

        let mut adopted = Vec::with_capacity(received.len());
        for replica in received {
            self.sever(tx, kind, curriculum, replica.id).await?;
            debug!(%kind, replica = replica.id, curriculum, "Adopted replica");
            adopted.push(replica.item_ref());
        }
        Ok(adopted)
    }

    /// Step 2: every peer keeps what it received from the leaving curriculum.
    async fn release_owned(
        &self,
        tx: &mut StoreTx,
        kind: ItemKind,
        curriculum: i64,
        peers: &[i64],
    ) -> Result<Vec<ItemRef>> {
        let mut released = Vec::new();
        for &peer in peers {
            let from_leaver: Vec<_> = tx
                .read_by_owner(kind, peer, false)
                .await?
                .into_iter()
                .filter(|item| item.source.is_some_and(|s| s.curriculum == curriculum))
                .collect();

            for replica in from_leaver {
                self.sever(tx, kind, peer, replica.id).await?;
                debug!(%kind, replica = replica.id, peer, "Released replica");
                released.push(replica.item_ref());
            }
        }
        Ok(released)
    }

    /// Step 3: the leaving curriculum's shared items go back to UNIQUE.
    async fn simplify_sources(
        &self,
        tx: &mut StoreTx,
        kind: ItemKind,
        curriculum: i64,
    ) -> Result<Vec<ItemRef>> {
        let shared: Vec<_> = tx
            .read_by_owner(kind, curriculum, false)
            .await?
            .into_iter()
            .filter(|item| item.is_shared_source())
            .collect();

        let mut simplified = Vec::with_capacity(shared.len());
        for item in shared {
            let remaining = self.tracker.replicas_of(tx, kind, item.id).await?;
            if let Some(record) = remaining.first() {
                // Step 2 released every peer; anything left sits outside the cluster.
                return Err(SharingError::TrackerInconsistent(format!(
                    "{} {} still has replica {} in curriculum {} outside cluster",
                    kind, item.id, record.replica_item, record.target_curriculum
                )));
            }
            tx.set_visibility(kind, item.id, Visibility::Unique).await?;
            simplified.push(item.item_ref());
        }
        Ok(simplified)
    }

    /// Turn a tracked replica into an owned UNIQUE row without touching its
    /// payload.
    async fn sever(&self, tx: &mut StoreTx, kind: ItemKind, holder: i64, replica: i64) -> Result<()> {
        tx.lock_item(kind, replica).await?;
        if !self.tracker.forget(tx, kind, holder, replica).await? {
            return Err(SharingError::TrackerInconsistent(format!(
                "{} replica {} in curriculum {} has no sharing record",
                kind, replica, holder
            )));
        }
        tx.set_source_and_visibility(kind, replica, None, Visibility::Unique)
            .await
    }
}
