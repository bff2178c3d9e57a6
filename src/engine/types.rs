// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Item state machine and operation reports.
//!
//! # Item States
//!
//! ```text
//!                 share_item
//! UniqueOwned ─────────────────→ ClusterOwned
//!      ↑  ↑                           │
//!      │  │  unshare_item, member     │
//!      │  └─ removal simplification ──┘
//!      │     last replica forked
//!      │
//!      │  copy-on-write edit,
//!      │  source member removed
//!      │
//! ClusterReplica ←── add_member / share_item propagation
//!
//! any ──delete_item──→ SoftDeleted   (terminal)
//! ```

use crate::model::ItemRef;
use crate::registry::DeleteMode;
use crate::tracker::SharingRecord;
use serde::Serialize;

/// Where an item sits in the sharing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ItemState {
    /// Owned and local to its curriculum.
    UniqueOwned,
    /// Owned and propagated to the cluster.
    ClusterOwned,
    /// Downstream copy of a peer's item.
    ClusterReplica,
    /// Deleted. No further transitions.
    SoftDeleted,
}

impl ItemState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::SoftDeleted)
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemState::UniqueOwned => write!(f, "UNIQUE_OWNED"),
            ItemState::ClusterOwned => write!(f, "CLUSTER_OWNED"),
            ItemState::ClusterReplica => write!(f, "CLUSTER_REPLICA"),
            ItemState::SoftDeleted => write!(f, "SOFT_DELETED"),
        }
    }
}

/// Result of `add_member`.
#[derive(Debug, Clone, Serialize)]
pub struct JoinReport {
    pub cluster: i64,
    pub curriculum: i64,
    /// Replicas backfilled into the joining curriculum.
    pub replicas: Vec<SharingRecord>,
}

/// Result of `remove_member`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemovalReport {
    pub cluster: i64,
    pub curriculum: i64,
    /// Replicas the leaving curriculum kept as its own.
    pub adopted: Vec<ItemRef>,
    /// Replicas peers kept as their own.
    pub released: Vec<ItemRef>,
    /// Items of the leaving curriculum turned back to UNIQUE.
    pub simplified: Vec<ItemRef>,
}

impl RemovalReport {
    pub fn items_touched(&self) -> usize {
        self.adopted.len() + self.released.len() + self.simplified.len()
    }
}

/// Result of `share_item`.
#[derive(Debug, Clone, Serialize)]
pub struct ShareReport {
    pub item: ItemRef,
    pub cluster: i64,
    /// One record per peer, ascending curriculum id.
    pub replicas: Vec<SharingRecord>,
}

/// Result of `unshare_item`.
#[derive(Debug, Clone, Serialize)]
pub struct UnshareReport {
    pub item: ItemRef,
    /// Records of the replicas that were deleted.
    pub removed: Vec<SharingRecord>,
}

impl UnshareReport {
    /// True when the item was already UNIQUE.
    pub fn was_noop(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Which propagation rule an edit followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EditPath {
    /// Owned UNIQUE item: written locally.
    Local,
    /// Owned CLUSTER item: written locally, payload copied to these replicas.
    Propagated { replicas: Vec<i64> },
    /// Replica, payload unchanged: position written, link kept.
    ReplicaPosition,
    /// Replica, payload changed: converted to an owned UNIQUE item.
    CopyOnWrite {
        former_source: ItemRef,
        /// The former source lost its last replica and went back to UNIQUE.
        source_reverted: bool,
    },
}

/// Result of `update_item`.
#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    /// The edited row as committed.
    pub item: crate::model::ShareableItem,
    pub path: EditPath,
}

/// Which deletion rule applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeletePath {
    /// Owned UNIQUE item.
    Owned,
    /// Owned CLUSTER item: unshared first.
    SharedSource { replicas_removed: usize },
    /// Replica: record forgotten, source untouched.
    Replica,
    /// Already deleted; nothing done.
    AlreadyDeleted,
}

/// Result of `delete_item`.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub item: ItemRef,
    pub path: DeletePath,
    pub mode: DeleteMode,
}
