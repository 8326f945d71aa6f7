//! SQLite pool shared by the registries and the decision log
//!
//! Opening a [`Database`] always brings the schema up to date, so every
//! component handed a pool can assume the append-only log tables and their
//! triggers exist.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use crate::storage::migrations;

const MEMORY_PATH: &str = ":memory:";

/// Where the router keeps its state and how wide the pool is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 5,
        }
    }

    /// A private in-memory store; one connection, since each SQLite memory
    /// connection is its own database
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(MEMORY_PATH),
            max_connections: 1,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }

    // WAL lets admin listings read while routes append decisions
    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?.journal_mode(SqliteJournalMode::Memory)
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };
        Ok(options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::with_path(default_database_path())
    }
}

/// `router.db` under the platform config directory
pub fn default_database_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("siva-router"))
        .unwrap_or_default()
        .join("router.db")
}

/// Schema state reported by the health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageHealth {
    pub schema_version: i32,
    pub latest_schema_version: i32,
}

impl StorageHealth {
    pub fn is_current(&self) -> bool {
        self.schema_version >= self.latest_schema_version
    }
}

/// Migrated connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    /// Connect and migrate
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if !config.is_in_memory() {
            if let Some(dir) = config.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create database directory: {}", dir.display()))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Failed to open router database: {}", config.path.display()))?;

        migrations::run_migrations(&pool)
            .await
            .context("Failed to migrate router database")?;

        Ok(Self {
            pool,
            path: config.path,
        })
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(DatabaseConfig::with_path(path)).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Round-trip the pool and read the applied schema version
    pub async fn health(&self) -> Result<StorageHealth> {
        let status = migrations::migration_status(&self.pool)
            .await
            .context("Router database is unreachable")?;
        Ok(StorageHealth {
            schema_version: status.current_version,
            latest_schema_version: status.target_version,
        })
    }

    /// Drain the pool so the file can be reopened elsewhere
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
