// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Table bootstrap.
//!
//! Tables are created if missing; existing tables are left alone. Evolving
//! them is the embedding service's migration tooling's job.

use crate::registry::Registry;

/// Curricula, clusters, memberships and the sharing tracker.
const CORE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS curricula (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'archived')),
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS clusters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT NULL,
        lock_version INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    // UNIQUE(curriculum_id): a curriculum is in at most one cluster.
    r#"
    CREATE TABLE IF NOT EXISTS cluster_members (
        cluster_id INTEGER NOT NULL REFERENCES clusters(id),
        curriculum_id INTEGER NOT NULL UNIQUE REFERENCES curricula(id),
        joined_at INTEGER NOT NULL,
        PRIMARY KEY (cluster_id, curriculum_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sharing_records (
        kind TEXT NOT NULL,
        source_item_id INTEGER NOT NULL,
        target_curriculum_id INTEGER NOT NULL REFERENCES curricula(id),
        replica_item_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (kind, replica_item_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sharing_records_source ON sharing_records (kind, source_item_id)",
    "CREATE INDEX IF NOT EXISTS idx_sharing_records_target ON sharing_records (kind, target_curriculum_id)",
];

/// Every DDL statement for the core tables and the registered kinds.
pub(crate) fn statements(registry: &Registry) -> Vec<String> {
    let mut out: Vec<String> = CORE_SCHEMA.iter().map(|s| s.to_string()).collect();
    for spec in registry.kinds() {
        out.extend(spec.create_table_sql());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_cover_every_kind() {
        let registry = Registry::default();
        let ddl = statements(&registry);
        for spec in registry.kinds() {
            let create = format!("CREATE TABLE IF NOT EXISTS {} ", spec.table());
            assert!(
                ddl.iter().any(|s| s.contains(&create)),
                "missing table for {}",
                spec.kind()
            );
        }
        assert!(ddl.iter().any(|s| s.contains("sharing_records")));
    }

    #[test]
    fn test_empty_registry_still_has_core_tables() {
        let ddl = statements(&Registry::empty());
        assert_eq!(ddl.len(), CORE_SCHEMA.len());
    }
}
