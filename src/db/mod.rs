//! Database connection and the pack cache store

pub mod pack_files;
pub mod sqlite_helpers;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

pub use pack_files::{CachedPackEntry, PackLookup, PackStore, PackTorrent, SqlitePackStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS pack_torrents (
        info_hash TEXT PRIMARY KEY NOT NULL,
        title TEXT,
        series_id TEXT,
        file_count INTEGER NOT NULL DEFAULT 0,
        total_size_bytes INTEGER NOT NULL DEFAULT 0,
        service TEXT NOT NULL,
        inserted_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pack_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        info_hash TEXT NOT NULL,
        file_index INTEGER NOT NULL,
        title TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        inserted_at INTEGER NOT NULL,
        UNIQUE (info_hash, file_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS episode_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        info_hash TEXT NOT NULL,
        season INTEGER NOT NULL,
        episode INTEGER NOT NULL,
        file_index INTEGER NOT NULL,
        title TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        inserted_at INTEGER NOT NULL,
        UNIQUE (info_hash, season, episode),
        UNIQUE (info_hash, file_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_pack_files_hash ON pack_files (info_hash)",
    "CREATE INDEX IF NOT EXISTS idx_episode_files_hash ON episode_files (info_hash)",
];

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5)
    }

    /// Open (creating if missing) the database at `url` and ensure the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {}", url))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::get_max_connections())
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", url))?;

        let db = Self { pool };
        db.ensure_schema().await?;
        info!(url = %url, "Database ready");
        Ok(db)
    }

    /// Private in-memory database; a single connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Create tables and indexes that do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the pack cache store
    pub fn pack_store(&self) -> SqlitePackStore {
        SqlitePackStore::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_reentrant() {
        let db = Database::in_memory().await.unwrap();
        db.ensure_schema().await.unwrap();
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('pack_torrents', 'pack_files', 'episode_files')",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packs.db");
        let url = format!("sqlite://{}", path.display());
        let db = Database::connect(&url).await.unwrap();
        db.close().await;
        assert!(path.exists());
    }
}
