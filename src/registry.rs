// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Item registry: the shareable kinds and where their columns live.
//!
//! Every engine algorithm is parameterised by [`ItemKind`]. The registry maps
//! a kind to a [`KindSpec`] naming its table and the columns the engine reads
//! and writes. Adding a shareable kind is a registry entry:
//!
//! ```rust
//! use sharing_engine::registry::{ItemKind, KindSpec, Registry};
//!
//! const LAB: ItemKind = ItemKind::new("lab");
//!
//! let mut registry = Registry::default();
//! registry
//!     .register(KindSpec::new(LAB, "labs").with_payload_column("outline"))
//!     .unwrap();
//! assert!(registry.spec(LAB).is_ok());
//! ```
//!
//! # Column Conventions
//!
//! ```text
//! {table}
//! ├── id                    INTEGER PRIMARY KEY  (engine-owned)
//! ├── {owner}               curriculum holding the row
//! ├── {payload}             JSON text
//! ├── {position}            ordering within the owner
//! ├── {source_item}         NULL for owned rows, source row id for replicas
//! ├── {source_curriculum}   NULL for owned rows, source owner for replicas
//! ├── {visibility}          'UNIQUE' | 'CLUSTER'
//! ├── {status}              'active' | 'deleted'   (soft-delete kinds only)
//! ├── version               bumped on every write (engine-owned)
//! ├── created_at            unix millis (engine-owned)
//! └── updated_at            unix millis (engine-owned)
//! ```

use crate::error::{Result, SharingError};
use serde::Serialize;
use std::fmt;

/// Columns the engine manages itself; kind specs may not reuse them.
const RESERVED_COLUMNS: &[&str] = &["id", "version", "created_at", "updated_at"];

/// Tables the store owns; kind specs may not reuse them.
const RESERVED_TABLES: &[&str] = &["curricula", "clusters", "cluster_members", "sharing_records"];

/// A shareable item kind.
///
/// Kinds are values, not code paths: the name doubles as the `kind`
/// column of the sharing tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ItemKind(&'static str);

impl ItemKind {
    /// Free-text vision statement. One per curriculum.
    pub const VISION_TEXT: ItemKind = ItemKind("vision_text");
    /// Mission statements.
    pub const MISSION: ItemKind = ItemKind("mission");
    /// Program educational objectives.
    pub const PEO: ItemKind = ItemKind("peo");
    /// Program outcomes.
    pub const PO: ItemKind = ItemKind("po");
    /// Program specific outcomes.
    pub const PSO: ItemKind = ItemKind("pso");
    /// Semester cards.
    pub const CARD: ItemKind = ItemKind("card");
    /// Courses.
    pub const COURSE: ItemKind = ItemKind("course");

    /// Declare a kind. Register it with a [`KindSpec`] before use.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Kind name as stored in the tracker.
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// How many live rows of a kind one curriculum may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cardinality {
    Many,
    /// Degenerate kind (vision text): at most one live row per curriculum,
    /// enforced by a partial unique index.
    OnePerCurriculum,
}

/// What `delete_item` does to a row of this kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeleteMode {
    /// Set the status column to `deleted`.
    Soft,
    /// Remove the row. Used by link-like kinds without a status column.
    Hard,
}

/// Table and column layout of one shareable kind.
#[derive(Debug, Clone)]
pub struct KindSpec {
    kind: ItemKind,
    table: String,
    owner_column: String,
    payload_column: String,
    position_column: String,
    source_item_column: String,
    source_curriculum_column: String,
    visibility_column: String,
    status_column: Option<String>,
    cardinality: Cardinality,
}

impl KindSpec {
    /// Spec with conventional column names, soft-delete and many rows per owner.
    pub fn new(kind: ItemKind, table: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            owner_column: "curriculum_id".to_string(),
            payload_column: "payload".to_string(),
            position_column: "position".to_string(),
            source_item_column: "source_item_id".to_string(),
            source_curriculum_column: "source_curriculum_id".to_string(),
            visibility_column: "visibility".to_string(),
            status_column: Some("status".to_string()),
            cardinality: Cardinality::Many,
        }
    }

    pub fn with_owner_column(mut self, column: impl Into<String>) -> Self {
        self.owner_column = column.into();
        self
    }

    pub fn with_payload_column(mut self, column: impl Into<String>) -> Self {
        self.payload_column = column.into();
        self
    }

    pub fn with_position_column(mut self, column: impl Into<String>) -> Self {
        self.position_column = column.into();
        self
    }

    pub fn with_status_column(mut self, column: impl Into<String>) -> Self {
        self.status_column = Some(column.into());
        self
    }

    /// Drop the status column: deletes remove the row.
    pub fn hard_delete(mut self) -> Self {
        self.status_column = None;
        self
    }

    /// Allow at most one live row per curriculum.
    pub fn one_per_curriculum(mut self) -> Self {
        self.cardinality = Cardinality::OnePerCurriculum;
        self
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn owner_column(&self) -> &str {
        &self.owner_column
    }

    pub fn payload_column(&self) -> &str {
        &self.payload_column
    }

    pub fn position_column(&self) -> &str {
        &self.position_column
    }

    pub fn source_item_column(&self) -> &str {
        &self.source_item_column
    }

    pub fn source_curriculum_column(&self) -> &str {
        &self.source_curriculum_column
    }

    pub fn visibility_column(&self) -> &str {
        &self.visibility_column
    }

    pub fn status_column(&self) -> Option<&str> {
        self.status_column.as_deref()
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn delete_mode(&self) -> DeleteMode {
        match self.status_column {
            Some(_) => DeleteMode::Soft,
            None => DeleteMode::Hard,
        }
    }

    fn columns(&self) -> Vec<&str> {
        let mut cols = vec![
            self.owner_column.as_str(),
            self.payload_column.as_str(),
            self.position_column.as_str(),
            self.source_item_column.as_str(),
            self.source_curriculum_column.as_str(),
            self.visibility_column.as_str(),
        ];
        if let Some(status) = &self.status_column {
            cols.push(status.as_str());
        }
        cols
    }

    /// Check identifiers before they are spliced into SQL.
    pub(crate) fn validate(&self) -> Result<()> {
        if !is_valid_identifier(self.kind.name()) {
            return Err(SharingError::Config(format!(
                "kind name {:?} is not a valid identifier",
                self.kind.name()
            )));
        }
        if !is_valid_identifier(&self.table) {
            return Err(SharingError::Config(format!(
                "table {:?} of kind {} is not a valid identifier",
                self.table, self.kind
            )));
        }
        if RESERVED_TABLES.contains(&self.table.as_str()) {
            return Err(SharingError::Config(format!(
                "table {} is reserved by the store",
                self.table
            )));
        }

        let columns = self.columns();
        for (i, col) in columns.iter().enumerate() {
            if !is_valid_identifier(col) {
                return Err(SharingError::Config(format!(
                    "column {:?} of kind {} is not a valid identifier",
                    col, self.kind
                )));
            }
            if RESERVED_COLUMNS.contains(col) {
                return Err(SharingError::Config(format!(
                    "column {} of kind {} is reserved",
                    col, self.kind
                )));
            }
            if columns[..i].contains(col) {
                return Err(SharingError::Config(format!(
                    "column {} is declared twice for kind {}",
                    col, self.kind
                )));
            }
        }
        Ok(())
    }

    /// SELECT list decoding into the fixed aliases the store expects.
    pub(crate) fn select_sql(&self) -> String {
        let status = match &self.status_column {
            Some(col) => col.clone(),
            None => "'active'".to_string(),
        };
        format!(
            "SELECT id, {owner} AS owner_id, {payload} AS payload, {position} AS position, \
             {source_item} AS source_item_id, {source_curriculum} AS source_curriculum_id, \
             {visibility} AS visibility, {status} AS status, version FROM {table}",
            owner = self.owner_column,
            payload = self.payload_column,
            position = self.position_column,
            source_item = self.source_item_column,
            source_curriculum = self.source_curriculum_column,
            visibility = self.visibility_column,
            status = status,
            table = self.table,
        )
    }

    /// Predicate selecting live rows.
    pub(crate) fn live_predicate(&self) -> String {
        match &self.status_column {
            Some(col) => format!("{} = 'active'", col),
            None => "1 = 1".to_string(),
        }
    }

    /// DDL for this kind's table and indexes.
    pub(crate) fn create_table_sql(&self) -> Vec<String> {
        let status = match &self.status_column {
            Some(col) => format!(
                "{col} TEXT NOT NULL DEFAULT 'active' CHECK ({col} IN ('active', 'deleted')),",
                col = col
            ),
            None => String::new(),
        };

        let mut ddl = vec![format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                {owner} INTEGER NOT NULL REFERENCES curricula(id),
                {payload} TEXT NOT NULL,
                {position} INTEGER NOT NULL DEFAULT 0,
                {source_item} INTEGER NULL,
                {source_curriculum} INTEGER NULL REFERENCES curricula(id),
                {visibility} TEXT NOT NULL DEFAULT 'UNIQUE' CHECK ({visibility} IN ('UNIQUE', 'CLUSTER')),
                {status}
                version INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            table = self.table,
            owner = self.owner_column,
            payload = self.payload_column,
            position = self.position_column,
            source_item = self.source_item_column,
            source_curriculum = self.source_curriculum_column,
            visibility = self.visibility_column,
            status = status,
        )];

        ddl.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_owner ON {table} ({owner})",
            table = self.table,
            owner = self.owner_column,
        ));
        ddl.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_source ON {table} ({source_item})",
            table = self.table,
            source_item = self.source_item_column,
        ));

        if self.cardinality == Cardinality::OnePerCurriculum {
            let predicate = match &self.status_column {
                Some(col) => format!(" WHERE {} = 'active'", col),
                None => String::new(),
            };
            ddl.push(format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_{table}_owner_live ON {table} ({owner}){predicate}",
                table = self.table,
                owner = self.owner_column,
                predicate = predicate,
            ));
        }
        ddl
    }
}

/// Whether `s` can be spliced into SQL as a bare identifier.
///
/// ASCII letter or underscore first, then letters, digits, underscores;
/// at most 63 bytes.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Ordered set of registered kinds.
///
/// Iteration order is registration order, so loops over kinds (member
/// removal, audits) are deterministic.
#[derive(Debug, Clone)]
pub struct Registry {
    kinds: Vec<KindSpec>,
}

impl Registry {
    /// A registry with no kinds.
    pub fn empty() -> Self {
        Self { kinds: Vec::new() }
    }

    /// Register a kind. Fails on invalid identifiers or duplicates.
    pub fn register(&mut self, spec: KindSpec) -> Result<()> {
        spec.validate()?;
        if self.kinds.iter().any(|k| k.kind == spec.kind) {
            return Err(SharingError::Config(format!(
                "kind {} is already registered",
                spec.kind
            )));
        }
        if self.kinds.iter().any(|k| k.table == spec.table) {
            return Err(SharingError::Config(format!(
                "table {} is already used by another kind",
                spec.table
            )));
        }
        self.kinds.push(spec);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, spec: KindSpec) -> Result<Self> {
        self.register(spec)?;
        Ok(self)
    }

    /// Look up a kind's spec.
    pub fn spec(&self, kind: ItemKind) -> Result<&KindSpec> {
        self.kinds
            .iter()
            .find(|k| k.kind == kind)
            .ok_or_else(|| SharingError::InvalidArgument(format!("unknown item kind {}", kind)))
    }

    /// Look up a kind by its stored name.
    pub fn by_name(&self, name: &str) -> Option<&KindSpec> {
        self.kinds.iter().find(|k| k.kind.name() == name)
    }

    /// All kinds in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = &KindSpec> {
        self.kinds.iter()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for Registry {
    /// The curriculum kinds: vision text, mission, PEO, PO, PSO, card, course.
    fn default() -> Self {
        Self {
            kinds: vec![
                KindSpec::new(ItemKind::VISION_TEXT, "vision_texts")
                    .with_payload_column("body")
                    .one_per_curriculum(),
                KindSpec::new(ItemKind::MISSION, "missions").with_payload_column("statement"),
                KindSpec::new(ItemKind::PEO, "peos").with_payload_column("statement"),
                KindSpec::new(ItemKind::PO, "pos").with_payload_column("statement"),
                KindSpec::new(ItemKind::PSO, "psos").with_payload_column("statement"),
                KindSpec::new(ItemKind::CARD, "semester_cards")
                    .with_payload_column("card")
                    .hard_delete(),
                KindSpec::new(ItemKind::COURSE, "courses").with_payload_column("details"),
            ],
        }
    }
}
