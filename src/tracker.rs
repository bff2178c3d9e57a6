// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sharing tracker: one record per propagated replica.
//!
//! A record is the quadruple `(kind, source item, target curriculum, replica
//! item)`. After every successful engine operation the records are in
//! bijection with the rows whose source is set:
//!
//! ```text
//! record(kind, m, B, m')      m' inserted into B as a replica of m
//! forget(kind, B, m')         m' converted to UNIQUE (copy-on-write, removal)
//!                             or deleted
//! replicas_of(kind, m)        every live replica of m, ascending replica id
//! source_of(kind, m')         inverse lookup
//! ```
//!
//! The engine consults the tracker *before* mutating a replica: copy-on-write
//! forgets the record first so a later source-side unshare cannot reach the
//! converted row.

use crate::error::Result;
use crate::registry::ItemKind;
use crate::store::{now_millis, StoreTx};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

/// One tracked replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharingRecord {
    pub kind: ItemKind,
    pub source_item: i64,
    pub target_curriculum: i64,
    pub replica_item: i64,
    /// Unix millis.
    pub created_at: i64,
}

fn decode_record(kind: ItemKind, row: &SqliteRow) -> Result<SharingRecord> {
    Ok(SharingRecord {
        kind,
        source_item: row.try_get("source_item_id")?,
        target_curriculum: row.try_get("target_curriculum_id")?,
        replica_item: row.try_get("replica_item_id")?,
        created_at: row.try_get("created_at")?,
    })
}

const SELECT_RECORD: &str =
    "SELECT source_item_id, target_curriculum_id, replica_item_id, created_at FROM sharing_records";

/// Reads and writes sharing records inside the caller's transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharingTracker;

impl SharingTracker {
    pub fn new() -> Self {
        Self
    }

    /// Track a freshly created replica. A replica may be tracked once.
    pub async fn record(
        &self,
        tx: &mut StoreTx,
        kind: ItemKind,
        source_item: i64,
        target_curriculum: i64,
        replica_item: i64,
    ) -> Result<SharingRecord> {
        let created_at = now_millis();
        sqlx::query(
            "INSERT INTO sharing_records (kind, source_item_id, target_curriculum_id, replica_item_id, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(kind.name())
        .bind(source_item)
        .bind(target_curriculum)
        .bind(replica_item)
        .bind(created_at)
        .execute(tx.conn())
        .await?;

        debug!(%kind, source_item, target_curriculum, replica_item, "Recorded replica");
        Ok(SharingRecord {
            kind,
            source_item,
            target_curriculum,
            replica_item,
            created_at,
        })
    }

    /// Stop tracking a replica. Returns whether a record existed.
    pub async fn forget(
        &self,
        tx: &mut StoreTx,
        kind: ItemKind,
        target_curriculum: i64,
        replica_item: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM sharing_records WHERE kind = ? AND target_curriculum_id = ? AND replica_item_id = ?",
        )
        .bind(kind.name())
        .bind(target_curriculum)
        .bind(replica_item)
        .execute(tx.conn())
        .await?;

        let existed = result.rows_affected() > 0;
        debug!(%kind, target_curriculum, replica_item, existed, "Forgot replica");
        Ok(existed)
    }

    /// Every tracked replica of `source_item`, ascending replica id.
    pub async fn replicas_of(
        &self,
        tx: &mut StoreTx,
        kind: ItemKind,
        source_item: i64,
    ) -> Result<Vec<SharingRecord>> {
        let sql = format!(
            "{} WHERE kind = ? AND source_item_id = ? ORDER BY replica_item_id",
            SELECT_RECORD
        );
        let rows = sqlx::query(&sql)
            .bind(kind.name())
            .bind(source_item)
            .fetch_all(tx.conn())
            .await?;
        rows.iter().map(|r| decode_record(kind, r)).collect()
    }

    /// The record tracking `replica_item`, if any.
    pub async fn source_of(
        &self,
        tx: &mut StoreTx,
        kind: ItemKind,
        replica_item: i64,
    ) -> Result<Option<SharingRecord>> {
        let sql = format!("{} WHERE kind = ? AND replica_item_id = ?", SELECT_RECORD);
        let row = sqlx::query(&sql)
            .bind(kind.name())
            .bind(replica_item)
            .fetch_optional(tx.conn())
            .await?;
        row.map(|r| decode_record(kind, &r)).transpose()
    }

    /// Records whose replica lives in `target_curriculum`.
    pub async fn records_targeting(
        &self,
        tx: &mut StoreTx,
        kind: ItemKind,
        target_curriculum: i64,
    ) -> Result<Vec<SharingRecord>> {
        let sql = format!(
            "{} WHERE kind = ? AND target_curriculum_id = ? ORDER BY replica_item_id",
            SELECT_RECORD
        );
        let rows = sqlx::query(&sql)
            .bind(kind.name())
            .bind(target_curriculum)
            .fetch_all(tx.conn())
            .await?;
        rows.iter().map(|r| decode_record(kind, r)).collect()
    }
}
