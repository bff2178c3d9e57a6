//! # Sharing Engine
//!
//! Cluster sharing for curriculum management: curricula grouped into a
//! *cluster* share editable items (vision text, missions, PEOs, POs, PSOs,
//! cards, courses) so that edits by one member reach the others, while
//! leaving a cluster detaches both sides without losing data.
//!
//! ## Architecture
//!
//! Every write from the surrounding CRUD layer that touches a shareable item
//! goes through the engine:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                            sharing-engine                                 │
//! │                                                                           │
//! │  ┌───────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │ ClusterEngine │───►│ membership │ propagation │ audit             │    │
//! │  │ (deadline,    │    │ (join/     │ (share, edit, copy-on-write,    │    │
//! │  │  metrics)     │    │  leave)    │  unshare, delete)               │    │
//! │  └───────────────┘    └──────────────────────────────────────────────┘    │
//! │                                   │                                       │
//! │                 ┌─────────────────┼──────────────────┐                    │
//! │                 ▼                 ▼                  ▼                    │
//! │         ┌──────────────┐  ┌────────────────┐  ┌──────────────┐            │
//! │         │ StoreTx      │  │ SharingTracker │  │ Registry     │            │
//! │         │ (SQLite, one │  │ (replica       │  │ (kinds and   │            │
//! │         │ transaction) │  │  records)      │  │  columns)    │            │
//! │         └──────────────┘  └────────────────┘  └──────────────┘            │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each operation runs in one store transaction under a deadline; errors and
//! expired deadlines roll the transaction back.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sharing_engine::{ClusterEngine, EngineConfig, ItemEdit, ItemKind, Registry};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> sharing_engine::Result<()> {
//!     let config = EngineConfig::from_env()?;
//!     let engine = ClusterEngine::open(&config, Registry::default()).await?;
//!
//!     let cluster = engine.create_cluster("CSE", None).await?;
//!     let a = engine.register_curriculum("R2021").await?;
//!     let b = engine.register_curriculum("R2024").await?;
//!     engine.add_member(cluster.id, a.id).await?;
//!     engine.add_member(cluster.id, b.id).await?;
//!
//!     let mission = engine.create_item(ItemKind::MISSION, a.id, json!("M1"), 0).await?;
//!     engine.share_item(ItemKind::MISSION, mission.id).await?;
//!     engine
//!         .update_item(ItemKind::MISSION, mission.id, ItemEdit::new(json!("M1-v2"), 0))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod resilience;
pub mod store;
pub mod tracker;

// Re-exports for convenience
pub use config::{EngineConfig, StoreConfig};
pub use engine::{
    AuditReport, ClusterEngine, DeleteOutcome, DeletePath, EditOutcome, EditPath, ItemState,
    JoinReport, RemovalReport, ShareReport, UnshareReport, Violation,
};
pub use error::{ErrorCategory, Result, SharingError};
pub use model::{
    Cluster, Curriculum, CurriculumStatus, ItemEdit, ItemRef, ItemStatus, Membership, NewItem,
    ShareableItem, SourceRef, Visibility,
};
pub use registry::{Cardinality, DeleteMode, ItemKind, KindSpec, Registry};
pub use resilience::{with_retry, RetryConfig};
pub use store::{Store, StoreTx};
pub use tracker::{SharingRecord, SharingTracker};
