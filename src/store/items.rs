// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-kind item operations.
//!
//! All SQL here is generated from the [`KindSpec`](crate::registry::KindSpec)
//! of the kind in hand, so each kind is a value rather than a code path.

use super::{now_millis, StoreTx};
use crate::error::{Result, SharingError};
use crate::model::{ItemStatus, NewItem, ShareableItem, SourceRef, Visibility};
use crate::registry::{DeleteMode, ItemKind};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

fn decode_item(kind: ItemKind, row: &SqliteRow) -> Result<ShareableItem> {
    let id: i64 = row.try_get("id")?;

    let payload_text: String = row.try_get("payload")?;
    let payload = serde_json::from_str(&payload_text)
        .map_err(|e| SharingError::fatal(format!("{} {} payload is not JSON: {}", kind, id, e)))?;

    let source_item: Option<i64> = row.try_get("source_item_id")?;
    let source_curriculum: Option<i64> = row.try_get("source_curriculum_id")?;
    let source = match (source_item, source_curriculum) {
        (None, None) => None,
        (Some(item), Some(curriculum)) => Some(SourceRef { item, curriculum }),
        _ => {
            return Err(SharingError::fatal(format!(
                "{} {} has a half-set source reference",
                kind, id
            )))
        }
    };

    let visibility: String = row.try_get("visibility")?;
    let visibility = visibility
        .parse::<Visibility>()
        .map_err(|e| SharingError::fatal(format!("{} {}: {}", kind, id, e)))?;

    let status: String = row.try_get("status")?;
    let status = status
        .parse::<ItemStatus>()
        .map_err(|e| SharingError::fatal(format!("{} {}: {}", kind, id, e)))?;

    Ok(ShareableItem {
        kind,
        id,
        owner: row.try_get("owner_id")?,
        source,
        visibility,
        payload,
        position: row.try_get("position")?,
        status,
        version: row.try_get("version")?,
    })
}

impl StoreTx {
    /// Read one row, deleted or not.
    pub async fn read_item(&mut self, kind: ItemKind, id: i64) -> Result<Option<ShareableItem>> {
        let registry = self.registry_handle();
        let spec = registry.spec(kind)?;

        let sql = format!("{} WHERE id = ?", spec.select_sql());
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.conn())
            .await?;

        row.map(|r| decode_item(kind, &r)).transpose()
    }

    /// Read one row or fail with `NotFound`.
    pub async fn fetch_item(&mut self, kind: ItemKind, id: i64) -> Result<ShareableItem> {
        self.read_item(kind, id)
            .await?
            .ok_or(SharingError::NotFound {
                entity: kind.name(),
                id,
            })
    }

    /// Rows held by `owner`, ordered by position then id.
    pub async fn read_by_owner(
        &mut self,
        kind: ItemKind,
        owner: i64,
        include_deleted: bool,
    ) -> Result<Vec<ShareableItem>> {
        let registry = self.registry_handle();
        let spec = registry.spec(kind)?;

        let live = if include_deleted {
            String::new()
        } else {
            format!(" AND {}", spec.live_predicate())
        };
        let sql = format!(
            "{select} WHERE {owner} = ?{live} ORDER BY {position}, id",
            select = spec.select_sql(),
            owner = spec.owner_column(),
            live = live,
            position = spec.position_column(),
        );

        let rows = sqlx::query(&sql)
            .bind(owner)
            .fetch_all(self.conn())
            .await?;
        rows.iter().map(|r| decode_item(kind, r)).collect()
    }

    /// The live replica of `source_item` held by `target`, if any.
    pub async fn find_replica_of(
        &mut self,
        kind: ItemKind,
        source_item: i64,
        target: i64,
    ) -> Result<Option<ShareableItem>> {
        let registry = self.registry_handle();
        let spec = registry.spec(kind)?;

        let sql = format!(
            "{select} WHERE {source_item} = ? AND {owner} = ? AND {live} ORDER BY id LIMIT 1",
            select = spec.select_sql(),
            source_item = spec.source_item_column(),
            owner = spec.owner_column(),
            live = spec.live_predicate(),
        );
        let row = sqlx::query(&sql)
            .bind(source_item)
            .bind(target)
            .fetch_optional(self.conn())
            .await?;

        row.map(|r| decode_item(kind, &r)).transpose()
    }

    /// Insert a row and read it back.
    pub async fn insert_item(&mut self, kind: ItemKind, new: &NewItem) -> Result<ShareableItem> {
        let registry = self.registry_handle();
        let spec = registry.spec(kind)?;

        let sql = format!(
            "INSERT INTO {table} ({owner}, {payload}, {position}, {source_item}, {source_curriculum}, {visibility}, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            table = spec.table(),
            owner = spec.owner_column(),
            payload = spec.payload_column(),
            position = spec.position_column(),
            source_item = spec.source_item_column(),
            source_curriculum = spec.source_curriculum_column(),
            visibility = spec.visibility_column(),
        );
        let payload = serde_json::to_string(&new.payload)?;
        let now = now_millis();

        let result = sqlx::query(&sql)
            .bind(new.owner)
            .bind(payload)
            .bind(new.position)
            .bind(new.source.map(|s| s.item))
            .bind(new.source.map(|s| s.curriculum))
            .bind(new.visibility.as_str())
            .bind(now)
            .bind(now)
            .execute(self.conn())
            .await?;

        let id = result.last_insert_rowid();
        self.fetch_item(kind, id).await
    }

    /// Write payload and/or position. Bumps the version.
    pub async fn update_fields(
        &mut self,
        kind: ItemKind,
        id: i64,
        payload: Option<&serde_json::Value>,
        position: Option<i64>,
    ) -> Result<()> {
        if payload.is_none() && position.is_none() {
            return Ok(());
        }
        let registry = self.registry_handle();
        let spec = registry.spec(kind)?;

        let mut sets = vec!["version = version + 1".to_string(), "updated_at = ?".to_string()];
        if payload.is_some() {
            sets.push(format!("{} = ?", spec.payload_column()));
        }
        if position.is_some() {
            sets.push(format!("{} = ?", spec.position_column()));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?",
            spec.table(),
            sets.join(", ")
        );

        let mut query = sqlx::query(&sql).bind(now_millis());
        if let Some(payload) = payload {
            query = query.bind(serde_json::to_string(payload)?);
        }
        if let Some(position) = position {
            query = query.bind(position);
        }
        let result = query.bind(id).execute(self.conn()).await?;
        expect_one_row(kind, id, result.rows_affected())
    }

    /// Rewrite the sharing linkage of a row. Bumps the version.
    pub async fn set_source_and_visibility(
        &mut self,
        kind: ItemKind,
        id: i64,
        source: Option<SourceRef>,
        visibility: Visibility,
    ) -> Result<()> {
        let registry = self.registry_handle();
        let spec = registry.spec(kind)?;

        let sql = format!(
            "UPDATE {table} SET {source_item} = ?, {source_curriculum} = ?, {visibility} = ?, \
             version = version + 1, updated_at = ? WHERE id = ?",
            table = spec.table(),
            source_item = spec.source_item_column(),
            source_curriculum = spec.source_curriculum_column(),
            visibility = spec.visibility_column(),
        );
        let result = sqlx::query(&sql)
            .bind(source.map(|s| s.item))
            .bind(source.map(|s| s.curriculum))
            .bind(visibility.as_str())
            .bind(now_millis())
            .bind(id)
            .execute(self.conn())
            .await?;
        expect_one_row(kind, id, result.rows_affected())
    }

    /// Change only the visibility tag. Bumps the version.
    pub async fn set_visibility(
        &mut self,
        kind: ItemKind,
        id: i64,
        visibility: Visibility,
    ) -> Result<()> {
        let registry = self.registry_handle();
        let spec = registry.spec(kind)?;

        let sql = format!(
            "UPDATE {} SET {} = ?, version = version + 1, updated_at = ? WHERE id = ?",
            spec.table(),
            spec.visibility_column()
        );
        let result = sqlx::query(&sql)
            .bind(visibility.as_str())
            .bind(now_millis())
            .bind(id)
            .execute(self.conn())
            .await?;
        expect_one_row(kind, id, result.rows_affected())
    }

    /// Flag a row deleted. Only for kinds with a status column.
    pub async fn soft_delete(&mut self, kind: ItemKind, id: i64) -> Result<()> {
        let registry = self.registry_handle();
        let spec = registry.spec(kind)?;

        let status = match (spec.delete_mode(), spec.status_column()) {
            (DeleteMode::Soft, Some(col)) => col,
            _ => {
                return Err(SharingError::InvalidArgument(format!(
                    "kind {} has no status column; use hard delete",
                    kind
                )))
            }
        };
        let sql = format!(
            "UPDATE {} SET {} = 'deleted', version = version + 1, updated_at = ? WHERE id = ?",
            spec.table(),
            status
        );
        let result = sqlx::query(&sql)
            .bind(now_millis())
            .bind(id)
            .execute(self.conn())
            .await?;
        expect_one_row(kind, id, result.rows_affected())
    }

    /// Remove a row.
    pub async fn hard_delete(&mut self, kind: ItemKind, id: i64) -> Result<()> {
        let registry = self.registry_handle();
        let spec = registry.spec(kind)?;

        let sql = format!("DELETE FROM {} WHERE id = ?", spec.table());
        let result = sqlx::query(&sql).bind(id).execute(self.conn()).await?;
        expect_one_row(kind, id, result.rows_affected())
    }

    /// Delete per the kind's mode.
    pub async fn delete_item_row(&mut self, kind: ItemKind, id: i64) -> Result<DeleteMode> {
        let mode = self.registry_handle().spec(kind)?.delete_mode();
        match mode {
            DeleteMode::Soft => self.soft_delete(kind, id).await?,
            DeleteMode::Hard => self.hard_delete(kind, id).await?,
        }
        Ok(mode)
    }

    /// Take the write lock for `id` (see module docs on SQLite locking).
    pub async fn lock_item(&mut self, kind: ItemKind, id: i64) -> Result<()> {
        let registry = self.registry_handle();
        let spec = registry.spec(kind)?;

        let sql = format!("UPDATE {} SET version = version WHERE id = ?", spec.table());
        let result = sqlx::query(&sql).bind(id).execute(self.conn()).await?;
        expect_one_row(kind, id, result.rows_affected())
    }
}

fn expect_one_row(kind: ItemKind, id: i64, rows_affected: u64) -> Result<()> {
    match rows_affected {
        1 => Ok(()),
        0 => Err(SharingError::NotFound {
            entity: kind.name(),
            id,
        }),
        n => Err(SharingError::fatal(format!(
            "{} id {} matched {} rows",
            kind, id, n
        ))),
    }
}
