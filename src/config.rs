// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sharing engine.
//!
//! The engine has no persisted configuration of its own. Settings are store
//! connection parameters plus the default operation deadline, constructed
//! programmatically, deserialized from YAML/JSON by the embedding service, or
//! read from the environment with [`EngineConfig::from_env()`].
//!
//! # Configuration Structure
//!
//! ```text
//! EngineConfig
//! ├── store: StoreConfig
//! │   ├── database_url: String     # sqlite://path?mode=rwc or sqlite::memory:
//! │   ├── max_connections: u32
//! │   ├── busy_timeout: String     # "5s"
//! │   └── wal: bool
//! └── operation_timeout: String    # "30s", default deadline per operation
//! ```
//!
//! # Environment
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SHARING_DATABASE_URL` | `store.database_url` |
//! | `SHARING_MAX_CONNECTIONS` | `store.max_connections` |
//! | `SHARING_BUSY_TIMEOUT` | `store.busy_timeout` |
//! | `SHARING_WAL` | `store.wal` |
//! | `SHARING_OPERATION_TIMEOUT` | `operation_timeout` |

use crate::error::{Result, SharingError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed by the embedding service to ClusterEngine::open()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ClusterEngine::open()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Relational store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Default deadline for each public operation (e.g. "30s").
    /// On expiry the operation's transaction is rolled back.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: String,
}

fn default_operation_timeout() -> String {
    "30s".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            operation_timeout: default_operation_timeout(),
        }
    }
}

impl EngineConfig {
    /// Config for tests: a SQLite file at `path`, short deadlines.
    pub fn for_testing(path: impl AsRef<Path>) -> Self {
        Self {
            store: StoreConfig::for_path(path),
            operation_timeout: "10s".to_string(),
        }
    }

    /// Read settings from `SHARING_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env()`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("SHARING_DATABASE_URL") {
            config.store.database_url = url;
        }
        if let Some(raw) = lookup("SHARING_MAX_CONNECTIONS") {
            config.store.max_connections = raw.trim().parse().map_err(|_| {
                SharingError::Config(format!("SHARING_MAX_CONNECTIONS is not a number: {:?}", raw))
            })?;
        }
        if let Some(raw) = lookup("SHARING_BUSY_TIMEOUT") {
            config.store.busy_timeout = raw;
        }
        if let Some(raw) = lookup("SHARING_WAL") {
            config.store.wal = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(SharingError::Config(format!(
                        "SHARING_WAL is not a boolean: {:?}",
                        raw
                    )))
                }
            };
        }
        if let Some(raw) = lookup("SHARING_OPERATION_TIMEOUT") {
            config.operation_timeout = raw;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every field parses.
    pub fn validate(&self) -> Result<()> {
        parse_duration("operation_timeout", &self.operation_timeout)?;
        self.store.validate()
    }

    /// Parse the operation timeout string to a Duration.
    pub fn operation_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.operation_timeout).unwrap_or(Duration::from_secs(30))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig: relational store connection settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Relational store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite URL, e.g. `sqlite:///var/lib/app/curricula.db?mode=rwc`.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Pool size. In-memory databases always use a single connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a statement waits on a locked database before failing
    /// with a transient error.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout: String,

    /// Use WAL journaling (ignored for in-memory databases).
    #[serde(default = "default_true")]
    pub wal: bool,
}

fn default_database_url() -> String {
    "sqlite://sharing.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> String {
    "5s".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            busy_timeout: default_busy_timeout(),
            wal: true,
        }
    }
}

impl StoreConfig {
    /// A private in-memory database (tests, tooling).
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            busy_timeout: default_busy_timeout(),
            wal: false,
        }
    }

    /// A database file at `path`, created if missing.
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self {
            database_url: format!("sqlite://{}?mode=rwc", path.as_ref().to_string_lossy()),
            ..Self::default()
        }
    }

    /// Whether the URL names an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }

    /// Parse the busy timeout string to a Duration.
    pub fn busy_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.busy_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(SharingError::Config("database_url is empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(SharingError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        parse_duration("busy_timeout", &self.busy_timeout)?;
        Ok(())
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw)
        .map_err(|e| SharingError::Config(format!("{} {:?} is not a duration: {}", field, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.operation_timeout_duration(), Duration::from_secs(30));
        assert_eq!(config.store.max_connections, 5);
        assert_eq!(config.store.busy_timeout_duration(), Duration::from_secs(5));
        assert!(config.store.wal);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("SHARING_DATABASE_URL", "sqlite:///tmp/x.db?mode=rwc"),
            ("SHARING_MAX_CONNECTIONS", "12"),
            ("SHARING_BUSY_TIMEOUT", "250ms"),
            ("SHARING_WAL", "off"),
            ("SHARING_OPERATION_TIMEOUT", "2s"),
        ]))
        .unwrap();

        assert_eq!(config.store.database_url, "sqlite:///tmp/x.db?mode=rwc");
        assert_eq!(config.store.max_connections, 12);
        assert_eq!(config.store.busy_timeout_duration(), Duration::from_millis(250));
        assert!(!config.store.wal);
        assert_eq!(config.operation_timeout_duration(), Duration::from_secs(2));
    }

    #[test]
    fn test_from_lookup_empty_keeps_defaults() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.operation_timeout, "30s");
        assert_eq!(config.store.database_url, default_database_url());
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let err = EngineConfig::from_lookup(lookup_from(&[("SHARING_MAX_CONNECTIONS", "many")]))
            .unwrap_err();
        assert!(matches!(err, SharingError::Config(_)));
    }

    #[test]
    fn test_from_lookup_rejects_bad_duration() {
        let err = EngineConfig::from_lookup(lookup_from(&[("SHARING_OPERATION_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("operation_timeout"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_bool() {
        assert!(EngineConfig::from_lookup(lookup_from(&[("SHARING_WAL", "maybe")])).is_err());
    }

    #[test]
    fn test_zero_connections_invalid() {
        let store = StoreConfig {
            max_connections: 0,
            ..StoreConfig::default()
        };
        assert!(store.validate().is_err());
    }

    #[test]
    fn test_in_memory_detection() {
        assert!(StoreConfig::in_memory().is_in_memory());
        assert!(!StoreConfig::for_path("/tmp/curricula.db").is_in_memory());
        assert!(StoreConfig::for_path("/tmp/curricula.db")
            .database_url
            .ends_with("curricula.db?mode=rwc"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"store": {"database_url": "sqlite::memory:"}}"#).unwrap();
        assert_eq!(config.operation_timeout, "30s");
        assert_eq!(config.store.max_connections, 5);
        assert!(config.store.is_in_memory());
    }

    #[test]
    fn test_invalid_duration_falls_back() {
        let config = EngineConfig {
            operation_timeout: "whenever".to_string(),
            ..EngineConfig::default()
        };
        assert_eq!(config.operation_timeout_duration(), Duration::from_secs(30));
        assert!(config.validate().is_err());
    }
}
