// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store adapter: the relational store as typed, transactional operations.
//!
//! The engine never issues SQL itself. It opens a [`StoreTx`] with
//! [`Store::transaction()`], calls typed operations on it, and commits.
//! Dropping a `StoreTx` without committing rolls the whole unit back, which is
//! how errors and expired deadlines guarantee that partial propagation is
//! never visible.
//!
//! # Operations
//!
//! Per registered kind ([`items`]): read-by-id, read-by-owner,
//! find-replica-of, insert, update-fields, set-source-and-visibility,
//! soft-delete, hard-delete, lock.
//!
//! Curricula, clusters and memberships ([`clusters`]): insert/read, status,
//! lock, membership lookup and churn.
//!
//! # Locking on SQLite
//!
//! SQLite has no row locks. `lock_cluster` and `lock_item` are writes that
//! bump a counter; issued as the first statement of a unit they take the
//! database write lock before any scan, so concurrent units touching the same
//! cluster or item serialise (the database-level lock is stricter than the
//! row-level discipline it stands in for). A unit that cannot get the lock
//! within `busy_timeout` fails with a transient error.
//!
//! # Error Mapping
//!
//! | Store condition | Error |
//! |-----------------|-------|
//! | row missing on lock/update/delete | `NotFound` |
//! | unique / foreign key violation | `Conflict` |
//! | busy, locked, pool timeout, I/O | `Transient` |
//! | decode failure, schema mismatch | `Fatal` |

pub mod clusters;
pub mod items;
mod schema;

use crate::config::StoreConfig;
use crate::error::{Result, SharingError};
use crate::registry::Registry;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Handle to the relational store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    registry: Arc<Registry>,
}

impl Store {
    /// Connect and create any missing tables for the registered kinds.
    pub async fn connect(config: &StoreConfig, registry: Registry) -> Result<Self> {
        config.validate()?;
        info!(
            url = %config.database_url,
            kinds = registry.len(),
            "Connecting sharing store"
        );

        let mut options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| SharingError::Config(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout_duration());

        let in_memory = config.is_in_memory();
        if config.wal && !in_memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // Every connection to `sqlite::memory:` is its own database, so an
        // in-memory store pins exactly one connection for its lifetime.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .idle_timeout(Some(Duration::from_secs(600)))
        };

        let pool = pool_options.connect_with(options).await?;

        let store = Self {
            pool,
            registry: Arc::new(registry),
        };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Private in-memory store (tests, tooling).
    pub async fn in_memory(registry: Registry) -> Result<Self> {
        Self::connect(&StoreConfig::in_memory(), registry).await
    }

    async fn bootstrap(&self) -> Result<()> {
        let statements = schema::statements(&self.registry);
        let mut tx = self.pool.begin().await?;
        for sql in &statements {
            sqlx::query(sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!(statements = statements.len(), "Sharing schema ready");
        Ok(())
    }

    /// Open an all-or-nothing unit of work on one connection.
    ///
    /// Commit with [`StoreTx::commit()`]; dropping the unit rolls it back.
    pub async fn transaction(&self) -> Result<StoreTx> {
        let tx = self.pool.begin().await?;
        Ok(StoreTx {
            tx,
            registry: Arc::clone(&self.registry),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Sharing store closed");
    }
}

/// One open transaction.
pub struct StoreTx {
    tx: Transaction<'static, Sqlite>,
    registry: Arc<Registry>,
}

impl StoreTx {
    /// Make every write of this unit visible.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Discard every write of this unit.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Registry handle that does not hold a borrow of `self`.
    pub(crate) fn registry_handle(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }
}

/// Current time in unix millis.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
