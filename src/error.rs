// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the sharing engine.
//!
//! Every engine operation returns a typed [`SharingError`]. The engine never
//! logs-and-swallows: the caller (usually the HTTP layer) decides whether to
//! present, retry or alert.
//!
//! # Error Categories
//!
//! | Error Type | Category | Retryable | HTTP |
//! |------------|----------|-----------|------|
//! | `InvalidArgument` | Input | No | 400 |
//! | `NotFound` | Input | No | 404 |
//! | `AlreadyMember` | Input | No | 400 |
//! | `NotMember` | Input | No | 404 |
//! | `NotShareable` | Input | No | 400 |
//! | `AlreadyShared` | Input | No | 400 |
//! | `NotOwner` | Input | No | 400 |
//! | `ClusterNotEmpty` | Input | No | 400 |
//! | `Conflict` | State | No | 409 |
//! | `VersionConflict` | State | Yes | 409 |
//! | `Vanished` | State | Yes | 404 |
//! | `Transient` | Store | Yes | 503 |
//! | `Timeout` | Store | Yes | 503 |
//! | `Fatal` | Store | No | 500 |
//! | `TrackerInconsistent` | Integrity | No | 500 |
//! | `Config` | Store | No | 500 |
//!
//! # Store Error Classification
//!
//! `sqlx::Error` converts into [`SharingError`] via [`From`]:
//! - `SQLITE_BUSY` / `SQLITE_LOCKED` (any extended code), pool timeouts and
//!   I/O failures become `Transient`
//! - unique and foreign-key violations become `Conflict`
//! - everything else (decode failures, missing columns, check constraints)
//!   is `Fatal`

use crate::registry::ItemKind;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sharing operations.
pub type Result<T> = std::result::Result<T, SharingError>;

/// Coarse grouping of errors, used for metrics labels and caller policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad request from the caller. Fix the input.
    Input,
    /// The data moved under the caller. Re-read and maybe retry.
    State,
    /// The store failed.
    Store,
    /// Sharing metadata contradicts the items. Operators must reconcile.
    Integrity,
}

/// Errors that can occur during sharing operations.
#[derive(Error, Debug)]
pub enum SharingError {
    /// Malformed or unacceptable argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A curriculum, cluster or item does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The curriculum already belongs to a cluster (possibly another one).
    #[error("Curriculum {curriculum} is already a member of cluster {cluster}")]
    AlreadyMember { curriculum: i64, cluster: i64 },

    /// The curriculum has no live membership in the cluster.
    #[error("Curriculum {curriculum} is not a member of cluster {cluster}")]
    NotMember { curriculum: i64, cluster: i64 },

    /// The item cannot be shared (owner outside any cluster, etc).
    #[error("{kind} {item} is not shareable: {reason}")]
    NotShareable {
        kind: ItemKind,
        item: i64,
        reason: String,
    },

    /// `share_item` on an item that is already CLUSTER.
    #[error("{kind} {item} is already shared with its cluster")]
    AlreadyShared { kind: ItemKind, item: i64 },

    /// Source-only operation attempted on a replica.
    #[error("{kind} {item} is a replica; only the owning curriculum may do this")]
    NotOwner { kind: ItemKind, item: i64 },

    /// Clusters are destroyed only when empty.
    #[error("Cluster {cluster} still has {members} member(s)")]
    ClusterNotEmpty { cluster: i64, members: usize },

    /// Uniqueness or foreign-key violation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Optimistic concurrency check on the item payload failed.
    #[error("Version conflict on {kind} {item}: expected {expected}, found {actual}")]
    VersionConflict {
        kind: ItemKind,
        item: i64,
        expected: i64,
        actual: i64,
    },

    /// Target row was soft-deleted.
    #[error("{kind} {item} has been deleted")]
    Vanished { kind: ItemKind, item: i64 },

    /// Busy/locked database, pool exhaustion, connection I/O.
    ///
    /// The whole operation may be retried.
    #[error("Transient store error ({operation}): {message}")]
    Transient {
        operation: String,
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// The operation's deadline expired; its transaction was rolled back.
    #[error("{operation} exceeded its deadline of {deadline:?}")]
    Timeout {
        operation: String,
        deadline: Duration,
    },

    /// Schema mismatch or undecodable row. Do not retry.
    #[error("Fatal store error: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// A sharing record and the items it describes disagree.
    #[error("Sharing tracker inconsistent: {0}")]
    TrackerInconsistent(String),

    /// Invalid configuration or registry entry.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SharingError {
    /// Create a transient error from a store error.
    pub fn transient(operation: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a fatal error without source.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient { .. } | Self::Timeout { .. } => true,
            Self::VersionConflict { .. } | Self::Vanished { .. } => true,
            Self::InvalidArgument(_)
            | Self::NotFound { .. }
            | Self::AlreadyMember { .. }
            | Self::NotMember { .. }
            | Self::NotShareable { .. }
            | Self::AlreadyShared { .. }
            | Self::NotOwner { .. }
            | Self::ClusterNotEmpty { .. }
            | Self::Conflict(_) => false,
            Self::Fatal { .. } | Self::TrackerInconsistent(_) | Self::Config(_) => false,
        }
    }

    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument(_)
            | Self::NotFound { .. }
            | Self::AlreadyMember { .. }
            | Self::NotMember { .. }
            | Self::NotShareable { .. }
            | Self::AlreadyShared { .. }
            | Self::NotOwner { .. }
            | Self::ClusterNotEmpty { .. } => ErrorCategory::Input,
            Self::Conflict(_) | Self::VersionConflict { .. } | Self::Vanished { .. } => {
                ErrorCategory::State
            }
            Self::Transient { .. } | Self::Timeout { .. } | Self::Fatal { .. } | Self::Config(_) => {
                ErrorCategory::Store
            }
            Self::TrackerInconsistent(_) => ErrorCategory::Integrity,
        }
    }

    /// HTTP status the transport layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Conflict(_) | Self::VersionConflict { .. } => 409,
            Self::NotFound { .. } | Self::NotMember { .. } | Self::Vanished { .. } => 404,
            Self::InvalidArgument(_)
            | Self::AlreadyMember { .. }
            | Self::NotShareable { .. }
            | Self::AlreadyShared { .. }
            | Self::NotOwner { .. }
            | Self::ClusterNotEmpty { .. } => 400,
            Self::Transient { .. } | Self::Timeout { .. } => 503,
            Self::Fatal { .. } | Self::TrackerInconsistent(_) | Self::Config(_) => 500,
        }
    }

    /// Short snake_case label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyMember { .. } => "already_member",
            Self::NotMember { .. } => "not_member",
            Self::NotShareable { .. } => "not_shareable",
            Self::AlreadyShared { .. } => "already_shared",
            Self::NotOwner { .. } => "not_owner",
            Self::ClusterNotEmpty { .. } => "cluster_not_empty",
            Self::Conflict(_) => "conflict",
            Self::VersionConflict { .. } => "version_conflict",
            Self::Vanished { .. } => "vanished",
            Self::Transient { .. } => "transient",
            Self::Timeout { .. } => "timeout",
            Self::Fatal { .. } => "fatal",
            Self::TrackerInconsistent(_) => "tracker_inconsistent",
            Self::Config(_) => "config",
        }
    }
}

/// Check if an error is a retryable SQLite busy/locked error.
///
/// sqlx reports extended result codes, so `SQLITE_BUSY_SNAPSHOT` (517) and
/// friends are folded back onto their primary code.
pub(crate) fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                if let Ok(code) = code.parse::<i64>() {
                    let primary = code & 0xff;
                    return primary == 5 || primary == 6;
                }
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

enum StoreFault {
    Transient,
    Conflict(String),
    Fatal,
}

fn classify(e: &sqlx::Error) -> StoreFault {
    if is_sqlite_busy_error(e) {
        return StoreFault::Transient;
    }
    match e {
        sqlx::Error::Database(db_err)
            if db_err.is_unique_violation() || db_err.is_foreign_key_violation() =>
        {
            StoreFault::Conflict(db_err.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
            StoreFault::Transient
        }
        _ => StoreFault::Fatal,
    }
}

impl From<sqlx::Error> for SharingError {
    fn from(e: sqlx::Error) -> Self {
        match classify(&e) {
            StoreFault::Transient => Self::transient("unknown", e),
            StoreFault::Conflict(message) => Self::Conflict(message),
            StoreFault::Fatal => Self::Fatal {
                message: e.to_string(),
                source: Some(e),
            },
        }
    }
}

impl From<serde_json::Error> for SharingError {
    fn from(e: serde_json::Error) -> Self {
        Self::fatal(format!("payload is not valid JSON: {}", e))
    }
}
