// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster sharing engine.
//!
//! The policy core. Every write from the CRUD layer that touches a shareable
//! item goes through a [`ClusterEngine`] operation, which decides whether the
//! write is local, propagates to cluster peers, converts a replica into an
//! owned item, or unshares.
//!
//! # Operation Shape
//!
//! Each public operation:
//! 1. Opens one store transaction
//! 2. Takes its lock first (cluster row for membership churn, item row for
//!    sharing and edits)
//! 3. Runs its algorithm against the [`StoreTx`] and the [`SharingTracker`]
//! 4. Commits
//!
//! The whole sequence runs under the engine deadline. On expiry, or on any
//! error, the transaction is dropped and rolled back: partial propagation is
//! never visible.
//!
//! # Submodules
//!
//! - [`membership`]: `add_member` / `remove_member`
//! - [`propagation`]: `share_item`, `unshare_item`, `update_item`, `delete_item`
//! - [`audit`]: read-only consistency checks

pub mod audit;
mod membership;
mod propagation;
mod types;

pub use audit::{AuditReport, Violation};
pub use types::{
    DeleteOutcome, DeletePath, EditOutcome, EditPath, ItemState, JoinReport, RemovalReport,
    ShareReport, UnshareReport,
};

use crate::config::EngineConfig;
use crate::error::{Result, SharingError};
use crate::metrics;
use crate::model::{Cluster, Curriculum, CurriculumStatus, Membership, NewItem, ShareableItem};
use crate::registry::{ItemKind, Registry};
use crate::store::{Store, StoreTx};
use crate::tracker::SharingTracker;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// The sharing engine. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct ClusterEngine {
    store: Store,
    tracker: SharingTracker,
    /// Deadline applied to every operation.
    deadline: Duration,
}

impl ClusterEngine {
    /// Connect to the configured store and bootstrap the registered kinds.
    pub async fn open(config: &EngineConfig, registry: Registry) -> Result<Self> {
        config.validate()?;
        let store = Store::connect(&config.store, registry).await?;
        Ok(Self::new(store, config.operation_timeout_duration()))
    }

    /// Engine over an existing store.
    pub fn new(store: Store, deadline: Duration) -> Self {
        Self {
            store,
            tracker: SharingTracker::new(),
            deadline,
        }
    }

    /// A handle on the same store with a different deadline.
    pub fn with_timeout(&self, deadline: Duration) -> Self {
        Self {
            store: self.store.clone(),
            tracker: self.tracker,
            deadline,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        self.store.registry()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `fut` under the engine deadline and record its outcome.
    ///
    /// On expiry `fut` is dropped, which drops its open transaction.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(SharingError::Timeout {
                operation: operation.to_string(),
                deadline: self.deadline,
            }),
        };
        metrics::record_operation(operation, &result, start.elapsed());
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Curricula
    // ═══════════════════════════════════════════════════════════════════════

    /// Register a curriculum. New curricula are active and in no cluster.
    #[instrument(skip(self))]
    pub async fn register_curriculum(&self, name: &str) -> Result<Curriculum> {
        let name = validate_name("curriculum", name)?;
        self.bounded("register_curriculum", async {
            let mut tx = self.store.transaction().await?;
            let curriculum = tx.insert_curriculum(name).await?;
            tx.commit().await?;
            info!(curriculum = curriculum.id, "Registered curriculum");
            Ok(curriculum)
        })
        .await
    }

    /// Archive a curriculum. It must leave its cluster first.
    #[instrument(skip(self))]
    pub async fn archive_curriculum(&self, curriculum: i64) -> Result<Curriculum> {
        self.bounded("archive_curriculum", async {
            let mut tx = self.store.transaction().await?;
            let mut current = require_curriculum(&mut tx, curriculum).await?;
            if let Some(m) = tx.membership_of(curriculum).await? {
                return Err(SharingError::InvalidArgument(format!(
                    "curriculum {} is a member of cluster {}; remove it first",
                    curriculum, m.cluster
                )));
            }
            if current.status != CurriculumStatus::Archived {
                tx.set_curriculum_status(curriculum, CurriculumStatus::Archived)
                    .await?;
                current.status = CurriculumStatus::Archived;
            }
            tx.commit().await?;
            info!(curriculum, "Archived curriculum");
            Ok(current)
        })
        .await
    }

    pub async fn get_curriculum(&self, curriculum: i64) -> Result<Curriculum> {
        self.bounded("get_curriculum", async {
            let mut tx = self.store.transaction().await?;
            require_curriculum(&mut tx, curriculum).await
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Clusters
    // ═══════════════════════════════════════════════════════════════════════

    /// Create an empty cluster. Names are unique.
    #[instrument(skip(self, description))]
    pub async fn create_cluster(&self, name: &str, description: Option<&str>) -> Result<Cluster> {
        let name = validate_name("cluster", name)?;
        self.bounded("create_cluster", async {
            let mut tx = self.store.transaction().await?;
            let cluster = tx
                .insert_cluster(name, description)
                .await
                .map_err(|e| match e {
                    SharingError::Conflict(_) => {
                        SharingError::Conflict(format!("cluster name {:?} is taken", name))
                    }
                    other => other,
                })?;
            tx.commit().await?;
            info!(cluster = cluster.id, "Created cluster");
            Ok(cluster)
        })
        .await
    }

    /// Destroy a cluster. Only empty clusters can be destroyed.
    #[instrument(skip(self))]
    pub async fn delete_cluster(&self, cluster: i64) -> Result<()> {
        self.bounded("delete_cluster", async {
            let mut tx = self.store.transaction().await?;
            tx.lock_cluster(cluster).await?;
            let members = tx.members_of(cluster).await?;
            if !members.is_empty() {
                return Err(SharingError::ClusterNotEmpty {
                    cluster,
                    members: members.len(),
                });
            }
            tx.delete_cluster(cluster).await?;
            tx.commit().await?;
            info!(cluster, "Deleted cluster");
            Ok(())
        })
        .await
    }

    pub async fn get_cluster(&self, cluster: i64) -> Result<Cluster> {
        self.bounded("get_cluster", async {
            let mut tx = self.store.transaction().await?;
            require_cluster(&mut tx, cluster).await
        })
        .await
    }

    /// Live memberships of a cluster, ascending curriculum id.
    pub async fn members(&self, cluster: i64) -> Result<Vec<Membership>> {
        self.bounded("members", async {
            let mut tx = self.store.transaction().await?;
            require_cluster(&mut tx, cluster).await?;
            tx.members_of(cluster).await
        })
        .await
    }

    /// The membership of a curriculum, if it is in a cluster.
    pub async fn cluster_of(&self, curriculum: i64) -> Result<Option<Membership>> {
        self.bounded("cluster_of", async {
            let mut tx = self.store.transaction().await?;
            require_curriculum(&mut tx, curriculum).await?;
            tx.membership_of(curriculum).await
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Items
    // ═══════════════════════════════════════════════════════════════════════

    /// Create an owned UNIQUE item.
    ///
    /// One-per-curriculum kinds reject a second live row with `Conflict`.
    #[instrument(skip(self, payload), fields(kind = %kind))]
    pub async fn create_item(
        &self,
        kind: ItemKind,
        curriculum: i64,
        payload: serde_json::Value,
        position: i64,
    ) -> Result<ShareableItem> {
        self.registry().spec(kind)?;
        self.bounded("create_item", async {
            let mut tx = self.store.transaction().await?;
            let owner = require_curriculum(&mut tx, curriculum).await?;
            if owner.status == CurriculumStatus::Archived {
                return Err(SharingError::InvalidArgument(format!(
                    "curriculum {} is archived",
                    curriculum
                )));
            }
            let item = tx
                .insert_item(kind, &NewItem::owned(curriculum, payload, position))
                .await?;
            tx.commit().await?;
            debug!(item = item.id, curriculum, "Created item");
            Ok(item)
        })
        .await
    }

    /// Read one item, deleted or not.
    pub async fn get_item(&self, kind: ItemKind, item: i64) -> Result<ShareableItem> {
        self.bounded("get_item", async {
            let mut tx = self.store.transaction().await?;
            tx.fetch_item(kind, item).await
        })
        .await
    }

    /// Live items held by a curriculum, ordered by position.
    pub async fn list_items(&self, kind: ItemKind, curriculum: i64) -> Result<Vec<ShareableItem>> {
        self.bounded("list_items", async {
            let mut tx = self.store.transaction().await?;
            tx.read_by_owner(kind, curriculum, false).await
        })
        .await
    }

    pub async fn item_state(&self, kind: ItemKind, item: i64) -> Result<ItemState> {
        Ok(self.get_item(kind, item).await?.state())
    }
}

fn validate_name<'a>(entity: &str, name: &'a str) -> Result<&'a str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SharingError::InvalidArgument(format!(
            "{} name must not be empty",
            entity
        )));
    }
    Ok(trimmed)
}

pub(crate) async fn require_curriculum(tx: &mut StoreTx, id: i64) -> Result<Curriculum> {
    tx.read_curriculum(id).await?.ok_or(SharingError::NotFound {
        entity: "curriculum",
        id,
    })
}

pub(crate) async fn require_cluster(tx: &mut StoreTx, id: i64) -> Result<Cluster> {
    tx.read_cluster(id).await?.ok_or(SharingError::NotFound {
        entity: "cluster",
        id,
    })
}

/// Kinds of the registry, in registration order.
pub(crate) fn registered_kinds(tx: &StoreTx) -> Vec<ItemKind> {
    tx.registry().kinds().map(|spec| spec.kind()).collect()
}
