pub mod json_store;
pub mod models;
pub mod sqlite_store;

pub use json_store::JsonSyncStore;
pub use models::*;
pub use sqlite_store::SqliteSyncStore;

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// 完整性检查结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// 文件仍存在的记录数
    pub valid: usize,
    /// 文件已不存在、尚未标记删除的路径
    pub deleted_now_missing: Vec<String>,
}

/// 同步数据库接口，主键为本地文件路径
///
/// 单写者：同一进程内由实现自行串行化写入，跨进程并发写入不安全。
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn get(&self, path: &str) -> StoreResult<Option<SyncRecord>>;

    /// 按远程 ID 查找，可能返回过期或重复记录中的一条
    async fn get_by_remote_id(&self, song_id: u64) -> StoreResult<Option<SyncRecord>>;

    /// 以路径为键插入或替换
    async fn upsert(&self, record: SyncRecord) -> StoreResult<()>;

    /// 批量插入或替换，要么全部写入要么全部不写入
    async fn upsert_many(&self, records: Vec<SyncRecord>) -> StoreResult<()>;

    /// 物理删除，返回记录是否存在
    async fn delete(&self, path: &str) -> StoreResult<bool>;

    /// 标记为已删除，返回记录是否存在
    async fn mark_deleted(&self, path: &str) -> StoreResult<bool>;

    async fn list_by_status(&self, status: SyncStatus) -> StoreResult<Vec<SyncRecord>>;

    async fn list_all(&self) -> StoreResult<Vec<SyncRecord>>;

    /// 清除所有已删除记录，返回清除数量
    async fn cleanup(&self) -> StoreResult<usize>;

    /// 重新检查每条记录的文件是否存在，只读不写
    async fn integrity_check(&self) -> StoreResult<IntegrityReport> {
        let records = self.list_all().await?;
        let paths: Vec<String> = records
            .into_iter()
            .filter(|r| !r.is_deleted())
            .map(|r| r.local_path)
            .collect();

        tokio::task::spawn_blocking(move || {
            let mut report = IntegrityReport::default();
            for path in paths {
                if Path::new(&path).is_file() {
                    report.valid += 1;
                } else {
                    debug!("文件已不存在: {}", path);
                    report.deleted_now_missing.push(path);
                }
            }
            report
        })
        .await
        .map_err(|e| StoreError::io("integrity_check", std::io::Error::other(e.to_string())))
    }
}

/// 存储后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Json,
    Sqlite,
}

/// 在数据目录下打开配置的存储后端
pub async fn open_store(backend: StoreBackend, data_dir: &Path) -> StoreResult<Arc<dyn SyncStore>> {
    let store: Arc<dyn SyncStore> = match backend {
        StoreBackend::Json => Arc::new(JsonSyncStore::open(store_path(data_dir, backend)).await?),
        StoreBackend::Sqlite => {
            Arc::new(SqliteSyncStore::connect(&store_path(data_dir, backend)).await?)
        }
    };
    Ok(store)
}

pub fn store_path(data_dir: &Path, backend: StoreBackend) -> PathBuf {
    match backend {
        StoreBackend::Json => data_dir.join("sync-db.json"),
        StoreBackend::Sqlite => data_dir.join("sync-db.sqlite"),
    }
}
