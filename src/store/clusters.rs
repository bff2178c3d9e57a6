// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Curricula, clusters and memberships.

use super::{now_millis, StoreTx};
use crate::error::{Result, SharingError};
use crate::model::{Cluster, Curriculum, CurriculumStatus, Membership};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

fn decode_curriculum(row: &SqliteRow) -> Result<Curriculum> {
    let status: String = row.try_get("status")?;
    Ok(Curriculum {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: status
            .parse::<CurriculumStatus>()
            .map_err(|e| SharingError::fatal(e.to_string()))?,
    })
}

fn decode_cluster(row: &SqliteRow) -> Result<Cluster> {
    Ok(Cluster {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
    })
}

fn decode_membership(row: &SqliteRow) -> Result<Membership> {
    Ok(Membership {
        cluster: row.try_get("cluster_id")?,
        curriculum: row.try_get("curriculum_id")?,
        joined_at: row.try_get("joined_at")?,
    })
}

impl StoreTx {
    pub async fn insert_curriculum(&mut self, name: &str) -> Result<Curriculum> {
        let result = sqlx::query("INSERT INTO curricula (name, status, created_at) VALUES (?, 'active', ?)")
            .bind(name)
            .bind(now_millis())
            .execute(self.conn())
            .await?;
        Ok(Curriculum {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            status: CurriculumStatus::Active,
        })
    }

    pub async fn read_curriculum(&mut self, id: i64) -> Result<Option<Curriculum>> {
        let row = sqlx::query("SELECT id, name, status FROM curricula WHERE id = ?")
            .bind(id)
            .fetch_optional(self.conn())
            .await?;
        row.map(|r| decode_curriculum(&r)).transpose()
    }

    pub async fn set_curriculum_status(&mut self, id: i64, status: CurriculumStatus) -> Result<()> {
        let result = sqlx::query("UPDATE curricula SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(self.conn())
            .await?;
        if result.rows_affected() == 0 {
            return Err(SharingError::NotFound {
                entity: "curriculum",
                id,
            });
        }
        Ok(())
    }

    /// Insert a cluster. Duplicate names fail with `Conflict`.
    pub async fn insert_cluster(&mut self, name: &str, description: Option<&str>) -> Result<Cluster> {
        let result = sqlx::query(
            "INSERT INTO clusters (name, description, lock_version, created_at) VALUES (?, ?, 0, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(now_millis())
        .execute(self.conn())
        .await?;
        Ok(Cluster {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            description: description.map(str::to_string),
        })
    }

    pub async fn read_cluster(&mut self, id: i64) -> Result<Option<Cluster>> {
        let row = sqlx::query("SELECT id, name, description FROM clusters WHERE id = ?")
            .bind(id)
            .fetch_optional(self.conn())
            .await?;
        row.map(|r| decode_cluster(&r)).transpose()
    }

    /// Take the write lock for a cluster's membership (see module docs).
    pub async fn lock_cluster(&mut self, id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE clusters SET lock_version = lock_version + 1 WHERE id = ?")
            .bind(id)
            .execute(self.conn())
            .await?;
        if result.rows_affected() == 0 {
            return Err(SharingError::NotFound {
                entity: "cluster",
                id,
            });
        }
        Ok(())
    }

    pub async fn delete_cluster(&mut self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM clusters WHERE id = ?")
            .bind(id)
            .execute(self.conn())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The live membership of a curriculum, in any cluster.
    pub async fn membership_of(&mut self, curriculum: i64) -> Result<Option<Membership>> {
        let row = sqlx::query(
            "SELECT cluster_id, curriculum_id, joined_at FROM cluster_members WHERE curriculum_id = ?",
        )
        .bind(curriculum)
        .fetch_optional(self.conn())
        .await?;
        row.map(|r| decode_membership(&r)).transpose()
    }

    /// Memberships of a cluster, ordered by curriculum id.
    pub async fn members_of(&mut self, cluster: i64) -> Result<Vec<Membership>> {
        let rows = sqlx::query(
            "SELECT cluster_id, curriculum_id, joined_at FROM cluster_members \
             WHERE cluster_id = ? ORDER BY curriculum_id",
        )
        .bind(cluster)
        .fetch_all(self.conn())
        .await?;
        rows.iter().map(decode_membership).collect()
    }

    /// Insert a membership. A second membership for the curriculum fails
    /// with `Conflict`.
    pub async fn insert_membership(&mut self, cluster: i64, curriculum: i64) -> Result<Membership> {
        let joined_at = now_millis();
        sqlx::query("INSERT INTO cluster_members (cluster_id, curriculum_id, joined_at) VALUES (?, ?, ?)")
            .bind(cluster)
            .bind(curriculum)
            .bind(joined_at)
            .execute(self.conn())
            .await?;
        Ok(Membership {
            cluster,
            curriculum,
            joined_at,
        })
    }

    pub async fn delete_membership(&mut self, cluster: i64, curriculum: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cluster_members WHERE cluster_id = ? AND curriculum_id = ?")
            .bind(cluster)
            .bind(curriculum)
            .execute(self.conn())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
