//! Startup configuration, read once from the environment (and `.env`).
//!
//! The backend choice is part of [`DatabaseConfig`] and is meant to be built
//! once and handed to the selector; nothing re-reads the environment later.

use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::types::BackendKind;

const DEFAULT_SQLITE_PATH: &str = "opsdesk.db";
const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_POOL_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";
const DEFAULT_MONGODB_DATABASE: &str = "opsdesk";
const DEFAULT_MONGODB_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LOG_LIMIT: usize = 10;
const DEFAULT_METRICS_DAYS: u32 = 7;
const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;

/// Relational (file-backed) backend settings.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: String,
    pub pool_size: usize,
    pub acquire_timeout: Duration,
    pub read_only: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_SQLITE_PATH.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            acquire_timeout: Duration::from_millis(DEFAULT_POOL_TIMEOUT_MS),
            read_only: false,
        }
    }
}

/// Document-store backend settings.
#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub server_selection_timeout: Duration,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_MONGODB_URI.to_string(),
            database: DEFAULT_MONGODB_DATABASE.to_string(),
            server_selection_timeout: Duration::from_millis(DEFAULT_MONGODB_TIMEOUT_MS),
        }
    }
}

/// Everything the backend selector needs.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub backend: BackendKind,
    pub sqlite: SqliteConfig,
    pub mongodb: MongoConfig,
}

impl DatabaseConfig {
    /// SQLite at `path` with otherwise default settings.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Sqlite,
            sqlite: SqliteConfig {
                path: path.into(),
                ..SqliteConfig::default()
            },
            mongodb: MongoConfig::default(),
        }
    }

    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn resolve<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = BackendKind::from_setting(lookup("DATABASE_TYPE").as_deref());

        let mut pool_size = parse_env(&lookup, "SQLITE_POOL_SIZE", DEFAULT_POOL_SIZE)?;
        if pool_size == 0 {
            return Err(StoreError::config("SQLITE_POOL_SIZE", "must be at least 1"));
        }
        let path = optional_env(&lookup, "SQLITE_DB_PATH")
            .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string());
        let read_only = parse_bool_env(&lookup, "SQLITE_READ_ONLY", false)?;
        if path == ":memory:" {
            if read_only {
                return Err(StoreError::config(
                    "SQLITE_READ_ONLY",
                    "an in-memory database has no schema to read",
                ));
            }
            // every in-memory connection is its own database
            pool_size = 1;
        }

        let sqlite = SqliteConfig {
            path,
            pool_size,
            acquire_timeout: Duration::from_millis(parse_env(
                &lookup,
                "SQLITE_POOL_TIMEOUT_MS",
                DEFAULT_POOL_TIMEOUT_MS,
            )?),
            read_only,
        };

        let mongodb = MongoConfig {
            uri: optional_env(&lookup, "MONGODB_URI")
                .unwrap_or_else(|| DEFAULT_MONGODB_URI.to_string()),
            database: optional_env(&lookup, "MONGODB_DATABASE")
                .unwrap_or_else(|| DEFAULT_MONGODB_DATABASE.to_string()),
            server_selection_timeout: Duration::from_millis(parse_env(
                &lookup,
                "MONGODB_TIMEOUT_MS",
                DEFAULT_MONGODB_TIMEOUT_MS,
            )?),
        };

        Ok(Self {
            backend,
            sqlite,
            mongodb,
        })
    }
}

/// Windows and limits used by the status aggregator. The log window and the
/// metrics window are independent of each other.
#[derive(Debug, Clone)]
pub struct StatusConfig {
    pub log_limit: usize,
    pub metrics_days: u32,
    pub query_timeout: Duration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            log_limit: DEFAULT_LOG_LIMIT,
            metrics_days: DEFAULT_METRICS_DAYS,
            query_timeout: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
        }
    }
}

impl StatusConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::resolve(|key| std::env::var(key).ok())
    }

    pub fn resolve<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_limit = parse_env(&lookup, "STATUS_LOG_LIMIT", DEFAULT_LOG_LIMIT)?;
        if log_limit == 0 {
            return Err(StoreError::config("STATUS_LOG_LIMIT", "must be at least 1"));
        }
        Ok(Self {
            log_limit,
            metrics_days: parse_env(&lookup, "STATUS_METRICS_DAYS", DEFAULT_METRICS_DAYS)?,
            query_timeout: Duration::from_millis(parse_env(
                &lookup,
                "STATUS_QUERY_TIMEOUT_MS",
                DEFAULT_QUERY_TIMEOUT_MS,
            )?),
        })
    }
}

fn optional_env<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(lookup, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| StoreError::config(key, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn parse_bool_env<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match optional_env(lookup, key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(StoreError::config(key, format!("expected a boolean, got '{other}'"))),
        },
        None => Ok(default),
    }
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
    fn test_defaults_select_sqlite() {
        let config = DatabaseConfig::resolve(lookup_from(&[])).unwrap();
        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.sqlite.path, "opsdesk.db");
        assert_eq!(config.sqlite.pool_size, 4);
        assert!(!config.sqlite.read_only);
    }

    #[test]
    fn test_mongodb_selection() {
        let config = DatabaseConfig::resolve(lookup_from(&[
            ("DATABASE_TYPE", "mongodb"),
            ("MONGODB_URI", "mongodb://db.internal:27017"),
            ("MONGODB_DATABASE", "logistics"),
        ]))
        .unwrap();
        assert_eq!(config.backend, BackendKind::MongoDb);
        assert_eq!(config.mongodb.uri, "mongodb://db.internal:27017");
        assert_eq!(config.mongodb.database, "logistics");
    }

    #[test]
    fn test_unrecognized_backend_falls_back_to_sqlite() {
        let config = DatabaseConfig::resolve(lookup_from(&[("DATABASE_TYPE", "mysql")])).unwrap();
        assert_eq!(config.backend, BackendKind::Sqlite);
    }

    #[test]
    fn test_memory_path_forces_single_connection() {
        let config = DatabaseConfig::resolve(lookup_from(&[
            ("SQLITE_DB_PATH", ":memory:"),
            ("SQLITE_POOL_SIZE", "8"),
        ]))
        .unwrap();
        assert_eq!(config.sqlite.pool_size, 1);
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let err = DatabaseConfig::resolve(lookup_from(&[("SQLITE_POOL_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, StoreError::Configuration { ref key, .. } if key == "SQLITE_POOL_SIZE"));

        let err = DatabaseConfig::resolve(lookup_from(&[("SQLITE_POOL_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, StoreError::Configuration { .. }));

        let err = DatabaseConfig::resolve(lookup_from(&[("SQLITE_READ_ONLY", "maybe")])).unwrap_err();
        assert!(matches!(err, StoreError::Configuration { .. }));
    }

    #[test]
    fn test_read_only_memory_database_is_rejected() {
        let err = DatabaseConfig::resolve(lookup_from(&[
            ("SQLITE_DB_PATH", ":memory:"),
            ("SQLITE_READ_ONLY", "true"),
        ]))
        .unwrap_err();
        assert!(matches!(err, StoreError::Configuration { ref key, .. } if key == "SQLITE_READ_ONLY"));

        let config = DatabaseConfig::resolve(lookup_from(&[
            ("SQLITE_DB_PATH", "/srv/opsdesk/replica.db"),
            ("SQLITE_READ_ONLY", "true"),
        ]))
        .unwrap();
        assert!(config.sqlite.read_only);
    }

    #[test]
    fn test_zero_log_window_is_rejected() {
        let err = StatusConfig::resolve(lookup_from(&[("STATUS_LOG_LIMIT", "0")])).unwrap_err();
        assert!(matches!(err, StoreError::Configuration { ref key, .. } if key == "STATUS_LOG_LIMIT"));

        let config = StatusConfig::resolve(lookup_from(&[("STATUS_LOG_LIMIT", "1")])).unwrap();
        assert_eq!(config.log_limit, 1);
    }

    #[test]
    fn test_status_windows_are_independent() {
        let config = StatusConfig::resolve(lookup_from(&[
            ("STATUS_LOG_LIMIT", "50"),
            ("STATUS_METRICS_DAYS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.log_limit, 50);
        assert_eq!(config.metrics_days, 30);
        assert_eq!(config.query_timeout, Duration::from_secs(10));
    }
}
