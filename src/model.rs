// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Row types shared by the store, the tracker and the engine.

use crate::engine::ItemState;
use crate::error::SharingError;
use crate::registry::ItemKind;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Visibility tag of a shareable item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Visibility {
    /// Local to its curriculum.
    Unique,
    /// Participating in cluster sharing (shared source or live replica).
    Cluster,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Unique => "UNIQUE",
            Visibility::Cluster => "CLUSTER",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = SharingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNIQUE" => Ok(Visibility::Unique),
            "CLUSTER" => Ok(Visibility::Cluster),
            other => Err(SharingError::InvalidArgument(format!(
                "unknown visibility {:?}",
                other
            ))),
        }
    }
}

/// Soft-delete status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ItemStatus {
    Active,
    Deleted,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = SharingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ItemStatus::Active),
            "deleted" => Ok(ItemStatus::Deleted),
            other => Err(SharingError::InvalidArgument(format!(
                "unknown item status {:?}",
                other
            ))),
        }
    }
}

/// Lifecycle status of a curriculum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CurriculumStatus {
    Active,
    Archived,
}

impl CurriculumStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurriculumStatus::Active => "active",
            CurriculumStatus::Archived => "archived",
        }
    }
}

impl FromStr for CurriculumStatus {
    type Err = SharingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CurriculumStatus::Active),
            "archived" => Ok(CurriculumStatus::Archived),
            other => Err(SharingError::InvalidArgument(format!(
                "unknown curriculum status {:?}",
                other
            ))),
        }
    }
}

/// Where a replica came from: the source row and its owner at replication time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceRef {
    pub item: i64,
    pub curriculum: i64,
}

/// A (kind, id) pair addressing one shareable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: i64,
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// One row of a registered kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareableItem {
    pub kind: ItemKind,
    pub id: i64,
    /// Curriculum holding this row.
    pub owner: i64,
    /// `None` for owned rows, `Some` for replicas.
    pub source: Option<SourceRef>,
    pub visibility: Visibility,
    pub payload: serde_json::Value,
    pub position: i64,
    pub status: ItemStatus,
    pub version: i64,
}

impl ShareableItem {
    pub fn item_ref(&self) -> ItemRef {
        ItemRef {
            kind: self.kind,
            id: self.id,
        }
    }

    pub fn is_replica(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_owned(&self) -> bool {
        self.source.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ItemStatus::Deleted
    }

    /// Owned, CLUSTER and live: a row the cluster replicates.
    pub fn is_shared_source(&self) -> bool {
        self.is_owned() && self.visibility == Visibility::Cluster && !self.is_deleted()
    }

    /// Position in the per-item state machine.
    pub fn state(&self) -> ItemState {
        if self.is_deleted() {
            ItemState::SoftDeleted
        } else if self.is_replica() {
            ItemState::ClusterReplica
        } else if self.visibility == Visibility::Cluster {
            ItemState::ClusterOwned
        } else {
            ItemState::UniqueOwned
        }
    }
}

/// Values for a row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub owner: i64,
    pub payload: serde_json::Value,
    pub position: i64,
    pub source: Option<SourceRef>,
    pub visibility: Visibility,
}

impl NewItem {
    /// An owned, UNIQUE row.
    pub fn owned(owner: i64, payload: serde_json::Value, position: i64) -> Self {
        Self {
            owner,
            payload,
            position,
            source: None,
            visibility: Visibility::Unique,
        }
    }

    /// A CLUSTER replica of `source` held by `target`.
    ///
    /// Carries the source's payload and position at this moment.
    pub fn replica_of(source: &ShareableItem, target: i64) -> Self {
        Self {
            owner: target,
            payload: source.payload.clone(),
            position: source.position,
            source: Some(SourceRef {
                item: source.id,
                curriculum: source.owner,
            }),
            visibility: Visibility::Cluster,
        }
    }
}

/// A writer-facing edit.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemEdit {
    pub payload: serde_json::Value,
    pub position: i64,
    /// Reject the edit unless the row is still at this version.
    pub expected_version: Option<i64>,
}

impl ItemEdit {
    pub fn new(payload: serde_json::Value, position: i64) -> Self {
        Self {
            payload,
            position,
            expected_version: None,
        }
    }

    pub fn expecting_version(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// A curriculum (a.k.a. regulation).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Curriculum {
    pub id: i64,
    pub name: String,
    pub status: CurriculumStatus,
}

/// A named set of curricula that mutually share.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// Binds one curriculum to one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Membership {
    pub cluster: i64,
    pub curriculum: i64,
    /// Unix millis.
    pub joined_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(source: Option<SourceRef>, visibility: Visibility, status: ItemStatus) -> ShareableItem {
        ShareableItem {
            kind: ItemKind::MISSION,
            id: 7,
            owner: 1,
            source,
            visibility,
            payload: json!("M1"),
            position: 0,
            status,
            version: 1,
        }
    }

    #[test]
    fn test_visibility_parse() {
        assert_eq!("UNIQUE".parse::<Visibility>().unwrap(), Visibility::Unique);
        assert_eq!("CLUSTER".parse::<Visibility>().unwrap(), Visibility::Cluster);
        assert!("cluster".parse::<Visibility>().is_err());
        assert_eq!(Visibility::Cluster.to_string(), "CLUSTER");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("deleted".parse::<ItemStatus>().unwrap(), ItemStatus::Deleted);
        assert!("gone".parse::<ItemStatus>().is_err());
        assert_eq!(
            "archived".parse::<CurriculumStatus>().unwrap(),
            CurriculumStatus::Archived
        );
    }

    #[test]
    fn test_item_states() {
        let src = SourceRef { item: 3, curriculum: 2 };
        assert_eq!(
            item(None, Visibility::Unique, ItemStatus::Active).state(),
            ItemState::UniqueOwned
        );
        assert_eq!(
            item(None, Visibility::Cluster, ItemStatus::Active).state(),
            ItemState::ClusterOwned
        );
        assert_eq!(
            item(Some(src), Visibility::Cluster, ItemStatus::Active).state(),
            ItemState::ClusterReplica
        );
        assert_eq!(
            item(Some(src), Visibility::Cluster, ItemStatus::Deleted).state(),
            ItemState::SoftDeleted
        );
    }

    #[test]
    fn test_replica_of_copies_payload_and_position() {
        let mut source = item(None, Visibility::Cluster, ItemStatus::Active);
        source.position = 4;
        let new = NewItem::replica_of(&source, 9);
        assert_eq!(new.owner, 9);
        assert_eq!(new.payload, json!("M1"));
        assert_eq!(new.position, 4);
        assert_eq!(new.source, Some(SourceRef { item: 7, curriculum: 1 }));
        assert_eq!(new.visibility, Visibility::Cluster);
    }

    #[test]
    fn test_item_ref_display() {
        let r = ItemRef { kind: ItemKind::PO, id: 12 };
        assert_eq!(r.to_string(), "po#12");
    }
}
