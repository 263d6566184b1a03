//! JSON 文件同步数据库
//!
//! 全部记录常驻内存，每次写操作整体重写文件（先写临时文件再原子重命名）。

use super::{SyncRecord, SyncStatus, SyncStore};
use crate::core::quality::Quality;
use crate::db::models::{Fingerprint, Provenance};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 当前存储格式版本
pub const STORE_VERSION: u32 = 2;

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    records: Vec<&'a SyncRecord>,
}

/// 磁盘上的文件格式：v1 可能是裸数组
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredState {
    Versioned { version: u32, records: Vec<Value> },
    Legacy(Vec<Value>),
}

/// 旧版本记录，缺少指纹等字段
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecord {
    local_path: String,
    #[serde(default)]
    song_id: Option<u64>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    quality: Option<Quality>,
    #[serde(default)]
    status: Option<SyncStatus>,
    #[serde(default)]
    synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    file_modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    bitrate: Option<u32>,
    #[serde(default)]
    source: Option<Provenance>,
}

impl LegacyRecord {
    /// 补齐指纹；文件已不存在则直接标记为已删除
    fn migrate(self, now: DateTime<Utc>) -> SyncRecord {
        let path = Path::new(&self.local_path);
        let live = match Fingerprint::stat(path) {
            Ok(fp) => fp,
            Err(e) => {
                warn!("迁移时无法读取文件属性 {}: {}", self.local_path, e);
                None
            }
        };

        let format = self.format.unwrap_or_else(|| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_default()
        });
        let quality = self
            .quality
            .unwrap_or_else(|| Quality::classify(&format, self.bitrate));

        let (fingerprint, status) = match live {
            Some(fp) => (
                Fingerprint::new(
                    self.file_modified_at.unwrap_or(fp.modified_at),
                    self.file_size.unwrap_or(fp.size),
                ),
                self.status.unwrap_or(SyncStatus::Pending),
            ),
            None => (
                Fingerprint::new(
                    self.file_modified_at.unwrap_or_default(),
                    self.file_size.unwrap_or(0),
                ),
                SyncStatus::Deleted,
            ),
        };

        SyncRecord {
            local_path: self.local_path,
            song_id: self.song_id,
            name: self.name,
            artist: self.artist,
            album: self.album,
            quality,
            status,
            synced_at: self.synced_at.unwrap_or(now),
            file_modified_at: fingerprint.modified_at,
            file_size: fingerprint.size,
            format,
            bitrate: self.bitrate,
            source: self.source.unwrap_or(Provenance::Filename),
        }
    }
}

/// JSON 文件存储
pub struct JsonSyncStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, SyncRecord>>,
}

impl JsonSyncStore {
    /// 打开存储文件，不存在时创建空存储，旧版本自动迁移并写回
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let (records, migrated) = Self::load(&path).await?;

        let store = Self {
            path,
            records: Mutex::new(records),
        };

        if migrated {
            let records = store.records.lock().await;
            store.persist(&records).await?;
            info!("同步数据库已迁移到版本 {}", STORE_VERSION);
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> StoreResult<(BTreeMap<String, SyncRecord>, bool)> {
        let data = match fs::read(path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("同步数据库不存在，使用空数据库: {:?}", path);
                return Ok((BTreeMap::new(), false));
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let (version, raw) = match serde_json::from_slice::<StoredState>(&data)? {
            StoredState::Versioned { version, records } => (version, records),
            StoredState::Legacy(records) => (1, records),
        };

        if version > STORE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: version,
                current: STORE_VERSION,
            });
        }

        let mut records = BTreeMap::new();
        if version == STORE_VERSION {
            for value in raw {
                let record: SyncRecord = serde_json::from_value(value)?;
                records.insert(record.local_path.clone(), record);
            }
            debug!("已加载 {} 条同步记录", records.len());
            return Ok((records, false));
        }

        info!("迁移同步数据库: 版本 {} -> {}", version, STORE_VERSION);
        let legacy: Vec<LegacyRecord> = raw
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?;

        // 迁移需要逐个 stat 文件
        let now = Utc::now();
        let migrated = tokio::task::spawn_blocking(move || {
            legacy
                .into_iter()
                .map(|r| r.migrate(now))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| StoreError::io(path, std::io::Error::other(e.to_string())))?;

        for record in migrated {
            records.insert(record.local_path.clone(), record);
        }
        Ok((records, true))
    }

    /// 整体写入：临时文件 + 重命名，写入失败时原文件保持不变
    async fn persist(&self, records: &BTreeMap<String, SyncRecord>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let file = StoreFileRef {
            version: STORE_VERSION,
            records: records.values().collect(),
        };
        let data = serde_json::to_vec_pretty(&file)?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, data)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        Ok(())
    }

    /// 在副本上修改并持久化，成功后才替换内存状态
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, SyncRecord>) -> T,
    ) -> StoreResult<T> {
        let mut guard = self.records.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next);
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }
}

#[async_trait]
impl SyncStore for JsonSyncStore {
    async fn get(&self, path: &str) -> StoreResult<Option<SyncRecord>> {
        Ok(self.records.lock().await.get(path).cloned())
    }

    async fn get_by_remote_id(&self, song_id: u64) -> StoreResult<Option<SyncRecord>> {
        let records = self.records.lock().await;
        // 优先未删除的记录，其次最近同步的
        Ok(records
            .values()
            .filter(|r| r.song_id == Some(song_id))
            .max_by_key(|r| (!r.is_deleted(), r.synced_at))
            .cloned())
    }

    async fn upsert(&self, record: SyncRecord) -> StoreResult<()> {
        self.mutate(|records| {
            records.insert(record.local_path.clone(), record);
        })
        .await
    }

    async fn upsert_many(&self, batch: Vec<SyncRecord>) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        self.mutate(|records| {
            for record in batch {
                records.insert(record.local_path.clone(), record);
            }
        })
        .await?;
        debug!("批量写入 {} 条同步记录", count);
        Ok(())
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        if !self.records.lock().await.contains_key(path) {
            return Ok(false);
        }
        self.mutate(|records| records.remove(path).is_some()).await
    }

    async fn mark_deleted(&self, path: &str) -> StoreResult<bool> {
        if !self.records.lock().await.contains_key(path) {
            return Ok(false);
        }
        self.mutate(|records| match records.get_mut(path) {
            Some(record) => {
                record.status = SyncStatus::Deleted;
                true
            }
            None => false,
        })
        .await
    }

    async fn list_by_status(&self, status: SyncStatus) -> StoreResult<Vec<SyncRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> StoreResult<Vec<SyncRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn cleanup(&self) -> StoreResult<usize> {
        let removed = self
            .mutate(|records| {
                let before = records.len();
                records.retain(|_, r| !r.is_deleted());
                before - records.len()
            })
            .await?;
        if removed > 0 {
            info!("清理了 {} 条已删除记录", removed);
        }
        Ok(removed)
    }
}
