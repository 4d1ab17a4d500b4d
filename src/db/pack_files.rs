//! Pack cache persistence
//!
//! Stores the outcome of expensive pack scans: every video file of a scanned
//! pack, the files attributed to a (season, episode), and a row per scanned
//! torrent. Writes are idempotent (`ON CONFLICT DO NOTHING`), so concurrent
//! writers racing on the same pack leave exactly one row per file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;

use super::sqlite_helpers::{i64_to_u64, now_unix, ttl_cutoff, u64_to_i64, unix_to_datetime};
use crate::services::debrid::{DebridResult, MatchResult, RemoteFile};

/// A persisted file of a scanned pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPackEntry {
    /// Lowercase info-hash
    pub info_hash: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub file_index: u64,
    pub title: String,
    pub size_bytes: u64,
    pub inserted_at: DateTime<Utc>,
}

impl CachedPackEntry {
    /// Row for a file of a pack, not attributed to an episode
    pub fn pack_file(info_hash: &str, file: &RemoteFile) -> Self {
        Self {
            info_hash: info_hash.to_lowercase(),
            season: None,
            episode: None,
            file_index: file.id,
            title: file.path.clone(),
            size_bytes: file.size_bytes,
            inserted_at: Utc::now(),
        }
    }

    /// Row for a file attributed to a (season, episode)
    pub fn episode_file(info_hash: &str, season: u32, episode: u32, file: &RemoteFile) -> Self {
        Self {
            season: Some(season),
            episode: Some(episode),
            ..Self::pack_file(info_hash, file)
        }
    }

    pub fn to_remote_file(&self) -> RemoteFile {
        RemoteFile::new(self.file_index, self.title.clone(), self.size_bytes)
    }

    pub fn to_match(&self) -> MatchResult {
        MatchResult {
            file_id: self.file_index,
            file_name: self.title.clone(),
            file_size_bytes: self.size_bytes,
        }
    }
}

impl sqlx::FromRow<'_, SqliteRow> for CachedPackEntry {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let season: Option<i64> = row.try_get("season")?;
        let episode: Option<i64> = row.try_get("episode")?;
        let file_index: i64 = row.try_get("file_index")?;
        let size_bytes: i64 = row.try_get("size_bytes")?;
        let inserted_at: i64 = row.try_get("inserted_at")?;

        Ok(Self {
            info_hash: row.try_get("info_hash")?,
            season: season.and_then(|s| u32::try_from(s).ok()),
            episode: episode.and_then(|e| u32::try_from(e).ok()),
            file_index: i64_to_u64(file_index),
            title: row.try_get("title")?,
            size_bytes: i64_to_u64(size_bytes),
            inserted_at: unix_to_datetime(inserted_at),
        })
    }
}

/// Metadata row for a scanned torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackTorrent {
    pub info_hash: String,
    pub title: Option<String>,
    /// Series the pack was scanned for, when known
    pub series_id: Option<String>,
    pub file_count: u64,
    pub total_size_bytes: u64,
    /// Provider the scan went through
    pub service: String,
}

/// Result of a pack lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackLookup {
    pub files: Vec<CachedPackEntry>,
    /// The stored scan is older than the requested TTL
    pub expired: bool,
}

impl PackLookup {
    /// Whether a usable scan is stored
    pub fn is_fresh(&self) -> bool {
        !self.files.is_empty() && !self.expired
    }
}

/// Storage collaborator for the pack cache
#[async_trait]
pub trait PackStore: Send + Sync {
    /// All stored files of a pack. With a TTL, `expired` reports whether the
    /// scan is older than that many days.
    async fn get_pack_files(&self, info_hash: &str, ttl_days: Option<u32>) -> DebridResult<PackLookup>;

    async fn get_episode_file(
        &self,
        info_hash: &str,
        season: u32,
        episode: u32,
    ) -> DebridResult<Option<CachedPackEntry>>;

    /// Returns the number of rows actually inserted
    async fn insert_episode_files(&self, rows: &[CachedPackEntry]) -> DebridResult<u64>;

    /// Returns the number of rows actually inserted
    async fn insert_pack_files(&self, rows: &[CachedPackEntry]) -> DebridResult<u64>;

    async fn insert_torrent(&self, meta: &PackTorrent) -> DebridResult<()>;

    /// Forget a pack's file listing so the next lookup rescans it. Episode
    /// attributions are kept.
    async fn delete_pack(&self, info_hash: &str) -> DebridResult<()>;
}

/// [`PackStore`] on SQLite
#[derive(Clone)]
pub struct SqlitePackStore {
    pool: SqlitePool,
}

impl SqlitePackStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PackStore for SqlitePackStore {
    async fn get_pack_files(&self, info_hash: &str, ttl_days: Option<u32>) -> DebridResult<PackLookup> {
        let files = sqlx::query_as::<_, CachedPackEntry>(
            r#"
            SELECT info_hash, NULL AS season, NULL AS episode, file_index, title, size_bytes, inserted_at
            FROM pack_files
            WHERE info_hash = ?1
            ORDER BY file_index
            "#,
        )
        .bind(info_hash.to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        let expired = match ttl_days {
            Some(days) => files
                .iter()
                .map(|f| f.inserted_at.timestamp())
                .min()
                .is_some_and(|oldest| oldest < ttl_cutoff(days)),
            None => false,
        };

        Ok(PackLookup { files, expired })
    }

    async fn get_episode_file(
        &self,
        info_hash: &str,
        season: u32,
        episode: u32,
    ) -> DebridResult<Option<CachedPackEntry>> {
        let entry = sqlx::query_as::<_, CachedPackEntry>(
            r#"
            SELECT info_hash, season, episode, file_index, title, size_bytes, inserted_at
            FROM episode_files
            WHERE info_hash = ?1 AND season = ?2 AND episode = ?3
            "#,
        )
        .bind(info_hash.to_lowercase())
        .bind(i64::from(season))
        .bind(i64::from(episode))
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn insert_episode_files(&self, rows: &[CachedPackEntry]) -> DebridResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for row in rows {
            let (Some(season), Some(episode)) = (row.season, row.episode) else {
                continue;
            };
            let result = sqlx::query(
                r#"
                INSERT INTO episode_files (info_hash, season, episode, file_index, title, size_bytes, inserted_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(row.info_hash.to_lowercase())
            .bind(i64::from(season))
            .bind(i64::from(episode))
            .bind(u64_to_i64(row.file_index))
            .bind(&row.title)
            .bind(u64_to_i64(row.size_bytes))
            .bind(row.inserted_at.timestamp())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn insert_pack_files(&self, rows: &[CachedPackEntry]) -> DebridResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO pack_files (info_hash, file_index, title, size_bytes, inserted_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(row.info_hash.to_lowercase())
            .bind(u64_to_i64(row.file_index))
            .bind(&row.title)
            .bind(u64_to_i64(row.size_bytes))
            .bind(row.inserted_at.timestamp())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn insert_torrent(&self, meta: &PackTorrent) -> DebridResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pack_torrents (info_hash, title, series_id, file_count, total_size_bytes, service, inserted_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(meta.info_hash.to_lowercase())
        .bind(&meta.title)
        .bind(&meta.series_id)
        .bind(u64_to_i64(meta.file_count))
        .bind(u64_to_i64(meta.total_size_bytes))
        .bind(&meta.service)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_pack(&self, info_hash: &str) -> DebridResult<()> {
        let hash = info_hash.to_lowercase();
        let mut tx = self.pool.begin().await?;
        for statement in [
            "DELETE FROM pack_files WHERE info_hash = ?1",
            "DELETE FROM pack_torrents WHERE info_hash = ?1",
        ] {
            sqlx::query(statement).bind(&hash).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    const HASH: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";

    async fn store() -> SqlitePackStore {
        let db = Database::in_memory().await.unwrap();
        db.pack_store()
    }

    #[tokio::test]
    async fn test_episode_insert_is_idempotent() {
        let store = store().await;
        let file = RemoteFile::new(0, "Show/Show.S01E01.mkv", 500);
        let row = CachedPackEntry::episode_file(HASH, 1, 1, &file);

        assert_eq!(store.insert_episode_files(&[row.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert_episode_files(&[row]).await.unwrap(), 0);

        let found = store.get_episode_file(HASH, 1, 1).await.unwrap().unwrap();
        assert_eq!(found.file_index, 0);
        assert_eq!(found.season, Some(1));
    }

    #[tokio::test]
    async fn test_episode_never_gets_second_index() {
        let store = store().await;
        let first = CachedPackEntry::episode_file(HASH, 1, 2, &RemoteFile::new(3, "a.mkv", 1));
        let second = CachedPackEntry::episode_file(HASH, 1, 2, &RemoteFile::new(4, "b.mkv", 1));

        store.insert_episode_files(&[first, second]).await.unwrap();
        let found = store.get_episode_file(HASH, 1, 2).await.unwrap().unwrap();
        assert_eq!(found.file_index, 3);
    }

    #[tokio::test]
    async fn test_pack_lookup_ttl() {
        let store = store().await;
        let mut old = CachedPackEntry::pack_file(HASH, &RemoteFile::new(1, "Movie.mkv", 9));
        old.inserted_at = Utc::now() - Duration::days(40);
        store.insert_pack_files(&[old]).await.unwrap();

        let lookup = store.get_pack_files(HASH, Some(30)).await.unwrap();
        assert_eq!(lookup.files.len(), 1);
        assert!(lookup.expired);
        assert!(!lookup.is_fresh());

        let untimed = store.get_pack_files(HASH, None).await.unwrap();
        assert!(untimed.is_fresh());
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive_on_hash() {
        let store = store().await;
        let row = CachedPackEntry::pack_file(&HASH.to_uppercase(), &RemoteFile::new(0, "x.mkv", 1));
        store.insert_pack_files(&[row]).await.unwrap();
        assert_eq!(store.get_pack_files(HASH, Some(30)).await.unwrap().files.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_pack_forgets_listing_but_keeps_episodes() {
        let store = store().await;
        store
            .insert_pack_files(&[CachedPackEntry::pack_file(HASH, &RemoteFile::new(0, "x.mkv", 1))])
            .await
            .unwrap();
        store
            .insert_torrent(&PackTorrent {
                info_hash: HASH.to_string(),
                title: Some("x".into()),
                series_id: None,
                file_count: 1,
                total_size_bytes: 1,
                service: "torbox".into(),
            })
            .await
            .unwrap();
        store
            .insert_episode_files(&[CachedPackEntry::episode_file(HASH, 1, 1, &RemoteFile::new(0, "x.mkv", 1))])
            .await
            .unwrap();
        store.delete_pack(HASH).await.unwrap();
        assert_eq!(store.get_pack_files(HASH, None).await.unwrap(), PackLookup::default());
        assert_eq!(
            store.get_episode_file(HASH, 1, 1).await.unwrap().map(|e| e.file_index),
            Some(0)
        );
    }
}
