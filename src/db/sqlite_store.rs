//! SQLite 同步数据库

use super::{Provenance, SyncRecord, SyncStatus, SyncStore};
use crate::core::quality::Quality;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const UPSERT_SQL: &str = r#"INSERT INTO sync_records
       (local_path, song_id, name, artist, album, quality, status, synced_at,
        file_modified_at, file_size, format, bitrate, source)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
       ON CONFLICT(local_path) DO UPDATE SET
           song_id = excluded.song_id,
           name = excluded.name,
           artist = excluded.artist,
           album = excluded.album,
           quality = excluded.quality,
           status = excluded.status,
           synced_at = excluded.synced_at,
           file_modified_at = excluded.file_modified_at,
           file_size = excluded.file_size,
           format = excluded.format,
           bitrate = excluded.bitrate,
           source = excluded.source"#;

/// 数据库行
#[derive(Debug, sqlx::FromRow)]
struct SyncRecordRow {
    local_path: String,
    song_id: Option<i64>,
    name: String,
    artist: String,
    album: Option<String>,
    quality: String,
    status: String,
    synced_at: String,
    file_modified_at: String,
    file_size: i64,
    format: String,
    bitrate: Option<i64>,
    source: String,
}

impl TryFrom<SyncRecordRow> for SyncRecord {
    type Error = StoreError;

    fn try_from(row: SyncRecordRow) -> Result<Self, Self::Error> {
        Ok(SyncRecord {
            song_id: row
                .song_id
                .map(|id| from_i64("song_id", id))
                .transpose()?,
            quality: Quality::from_str(&row.quality).map_err(|_| StoreError::InvalidField {
                field: "quality",
                value: row.quality.clone(),
            })?,
            status: row.status.parse()?,
            synced_at: parse_time("synced_at", &row.synced_at)?,
            file_modified_at: parse_time("file_modified_at", &row.file_modified_at)?,
            file_size: from_i64("file_size", row.file_size)?,
            bitrate: row
                .bitrate
                .map(|b| {
                    u32::try_from(b).map_err(|_| StoreError::InvalidField {
                        field: "bitrate",
                        value: b.to_string(),
                    })
                })
                .transpose()?,
            source: row.source.parse::<Provenance>()?,
            local_path: row.local_path,
            name: row.name,
            artist: row.artist,
            album: row.album,
            format: row.format,
        })
    }
}

fn from_i64<T: TryFrom<i64>>(field: &'static str, value: i64) -> StoreResult<T> {
    T::try_from(value).map_err(|_| StoreError::InvalidField {
        field,
        value: value.to_string(),
    })
}

fn to_i64(field: &'static str, value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidField {
        field,
        value: value.to_string(),
    })
}

fn parse_time(field: &'static str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidField {
            field,
            value: value.to_string(),
        })
}

/// 固定宽度的 UTC 时间文本，按字符串排序即按时间排序
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// SQLite 存储
pub struct SqliteSyncStore {
    db: SqlitePool,
}

impl SqliteSyncStore {
    /// 打开（必要时创建）数据库文件并执行迁移
    pub async fn connect(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        // 单写者，一个连接即可
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        debug!("已打开同步数据库: {:?}", path);
        Self::with_pool(db).await
    }

    /// 内存数据库，连接关闭后数据丢失
    pub async fn in_memory() -> StoreResult<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(db).await
    }

    async fn with_pool(db: SqlitePool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations").run(&db).await?;
        Ok(Self { db })
    }

    pub async fn close(&self) {
        self.db.close().await;
    }

    async fn upsert_in(tx: &mut Transaction<'_, Sqlite>, record: &SyncRecord) -> StoreResult<()> {
        sqlx::query(UPSERT_SQL)
            .bind(&record.local_path)
            .bind(record.song_id.map(|id| to_i64("song_id", id)).transpose()?)
            .bind(&record.name)
            .bind(&record.artist)
            .bind(&record.album)
            .bind(record.quality.as_str())
            .bind(record.status.as_str())
            .bind(format_time(&record.synced_at))
            .bind(format_time(&record.file_modified_at))
            .bind(to_i64("file_size", record.file_size)?)
            .bind(&record.format)
            .bind(record.bitrate.map(i64::from))
            .bind(record.source.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    fn rows_into_records(rows: Vec<SyncRecordRow>) -> StoreResult<Vec<SyncRecord>> {
        rows.into_iter().map(SyncRecord::try_from).collect()
    }
}

#[async_trait]
impl SyncStore for SqliteSyncStore {
    async fn get(&self, path: &str) -> StoreResult<Option<SyncRecord>> {
        let row = sqlx::query_as::<_, SyncRecordRow>(
            "SELECT * FROM sync_records WHERE local_path = ?",
        )
        .bind(path)
        .fetch_optional(&self.db)
        .await?;

        row.map(SyncRecord::try_from).transpose()
    }

    async fn get_by_remote_id(&self, song_id: u64) -> StoreResult<Option<SyncRecord>> {
        let row = sqlx::query_as::<_, SyncRecordRow>(
            r#"SELECT * FROM sync_records WHERE song_id = ?
               ORDER BY (status = 'deleted') ASC, synced_at DESC
               LIMIT 1"#,
        )
        .bind(to_i64("song_id", song_id)?)
        .fetch_optional(&self.db)
        .await?;

        row.map(SyncRecord::try_from).transpose()
    }

    async fn upsert(&self, record: SyncRecord) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;
        Self::upsert_in(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_many(&self, records: Vec<SyncRecord>) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        // 任一条失败时事务随 tx 析构回滚
        let mut tx = self.db.begin().await?;
        for record in &records {
            Self::upsert_in(&mut tx, record).await?;
        }
        tx.commit().await?;

        debug!("批量写入 {} 条同步记录", records.len());
        Ok(())
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sync_records WHERE local_path = ?")
            .bind(path)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_deleted(&self, path: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE sync_records SET status = ? WHERE local_path = ?")
            .bind(SyncStatus::Deleted.as_str())
            .bind(path)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_by_status(&self, status: SyncStatus) -> StoreResult<Vec<SyncRecord>> {
        let rows = sqlx::query_as::<_, SyncRecordRow>(
            "SELECT * FROM sync_records WHERE status = ? ORDER BY local_path",
        )
        .bind(status.as_str())
        .fetch_all(&self.db)
        .await?;

        Self::rows_into_records(rows)
    }

    async fn list_all(&self) -> StoreResult<Vec<SyncRecord>> {
        let rows =
            sqlx::query_as::<_, SyncRecordRow>("SELECT * FROM sync_records ORDER BY local_path")
                .fetch_all(&self.db)
                .await?;

        Self::rows_into_records(rows)
    }

    async fn cleanup(&self) -> StoreResult<usize> {
        let result = sqlx::query("DELETE FROM sync_records WHERE status = ?")
            .bind(SyncStatus::Deleted.as_str())
            .execute(&self.db)
            .await?;

        let removed = result.rows_affected() as usize;
        if removed > 0 {
            info!("清理了 {} 条已删除记录", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(path: &str, song_id: Option<u64>, status: SyncStatus, synced_ms: i64) -> SyncRecord {
        SyncRecord {
            local_path: path.to_string(),
            song_id,
            name: "晴天".to_string(),
            artist: "周杰伦".to_string(),
            album: Some("叶惠美".to_string()),
            quality: Quality::High,
            status,
            synced_at: Utc.timestamp_millis_opt(synced_ms).unwrap(),
            file_modified_at: Utc.timestamp_millis_opt(1_690_000_000_123).unwrap(),
            file_size: 8_000_000,
            format: "mp3".to_string(),
            bitrate: Some(320),
            source: Provenance::Metadata,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let store = SqliteSyncStore::in_memory().await.unwrap();
        let original = record("/music/晴天.mp3", Some(186016), SyncStatus::Synced, 1_700_000_000_000);
        store.upsert(original.clone()).await.unwrap();

        let loaded = store.get("/music/晴天.mp3").await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.fingerprint(), original.fingerprint());

        let mut changed = original.clone();
        changed.status = SyncStatus::Upgraded;
        changed.quality = Quality::Lossless;
        store.upsert(changed).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, SyncStatus::Upgraded);
        assert_eq!(all[0].quality, Quality::Lossless);
    }

    #[tokio::test]
    async fn test_get_by_remote_id_prefers_live_then_latest() {
        let store = SqliteSyncStore::in_memory().await.unwrap();
        store
            .upsert_many(vec![
                record("/a.mp3", Some(7), SyncStatus::Deleted, 1_800_000_000_000),
                record("/b.mp3", Some(7), SyncStatus::Synced, 1_700_000_000_000),
                record("/c.mp3", Some(7), SyncStatus::Synced, 1_750_000_000_000),
            ])
            .await
            .unwrap();

        let found = store.get_by_remote_id(7).await.unwrap().unwrap();
        assert_eq!(found.local_path, "/c.mp3");
        assert!(store.get_by_remote_id(8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_listing_and_cleanup() {
        let store = SqliteSyncStore::in_memory().await.unwrap();
        store
            .upsert_many(vec![
                record("/a.mp3", None, SyncStatus::Pending, 1),
                record("/b.mp3", None, SyncStatus::Pending, 2),
                record("/c.mp3", Some(1), SyncStatus::Synced, 3),
            ])
            .await
            .unwrap();

        assert!(store.mark_deleted("/a.mp3").await.unwrap());
        assert!(!store.mark_deleted("/nope.mp3").await.unwrap());
        assert_eq!(store.list_by_status(SyncStatus::Pending).await.unwrap().len(), 1);
        assert_eq!(store.list_by_status(SyncStatus::Deleted).await.unwrap().len(), 1);

        assert_eq!(store.cleanup().await.unwrap(), 1);
        assert_eq!(store.list_all().await.unwrap().len(), 2);
        assert!(store.delete("/b.mp3").await.unwrap());
        assert!(!store.delete("/b.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync-db.sqlite");
        {
            let store = SqliteSyncStore::connect(&path).await.unwrap();
            store
                .upsert(record("/a.mp3", Some(3), SyncStatus::Synced, 5))
                .await
                .unwrap();
            store.close().await;
        }

        let store = SqliteSyncStore::connect(&path).await.unwrap();
        assert_eq!(store.get("/a.mp3").await.unwrap().unwrap().song_id, Some(3));
    }
}
