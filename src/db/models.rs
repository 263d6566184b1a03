use crate::core::quality::Quality;
use crate::error::StoreError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// 同步状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// 已扫描，尚未关联远程歌曲
    Pending,
    /// 已关联远程歌曲
    Synced,
    /// 已以更高音质重新同步
    Upgraded,
    /// 文件已不存在
    Deleted,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Upgraded => "upgraded",
            SyncStatus::Deleted => "deleted",
        }
    }

    /// synced / upgraded 状态的记录已与远程歌曲关联
    pub fn is_associated(self) -> bool {
        matches!(self, SyncStatus::Synced | SyncStatus::Upgraded)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "upgraded" => Ok(SyncStatus::Upgraded),
            "deleted" => Ok(SyncStatus::Deleted),
            other => Err(StoreError::InvalidField {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// 曲目名称/歌手的来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Filename,
    Metadata,
    Database,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Filename => "filename",
            Provenance::Metadata => "metadata",
            Provenance::Database => "database",
        }
    }
}

impl FromStr for Provenance {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filename" => Ok(Provenance::Filename),
            "metadata" => Ok(Provenance::Metadata),
            "database" => Ok(Provenance::Database),
            other => Err(StoreError::InvalidField {
                field: "source",
                value: other.to_string(),
            }),
        }
    }
}

/// 文件变更指纹：修改时间 + 文件大小
///
/// 不是内容哈希。修改时间截断到毫秒，保证序列化往返后仍可比较。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub modified_at: DateTime<Utc>,
    pub size: u64,
}

impl Fingerprint {
    pub fn new(modified_at: DateTime<Utc>, size: u64) -> Self {
        Self {
            modified_at: truncate_millis(modified_at),
            size,
        }
    }

    pub fn from_metadata(metadata: &std::fs::Metadata) -> std::io::Result<Self> {
        let modified: DateTime<Utc> = metadata.modified()?.into();
        Ok(Self::new(modified, metadata.len()))
    }

    /// 读取文件当前指纹，文件不存在时返回 None
    pub fn stat(path: &Path) -> std::io::Result<Option<Self>> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => Self::from_metadata(&meta).map(Some),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn truncate_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(time.timestamp_millis())
        .single()
        .unwrap_or_default()
}

/// 一次扫描得到的本地曲目
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalTrack {
    /// 绝对路径，同一次扫描内唯一
    pub path: String,
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub quality: Quality,
    /// 实际音频格式（加密容器为解密后的格式）
    pub format: String,
    pub file_size: u64,
    /// 码率（kbps）
    pub bitrate: Option<u32>,
    pub song_id: Option<u64>,
    pub source: Provenance,
    pub modified_at: DateTime<Utc>,
}

impl LocalTrack {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.modified_at, self.file_size)
    }

    /// 复用数据库记录（增量扫描中指纹未变的文件）
    ///
    /// 音质按记录的格式和码率重新分级，与完整解析的结果一致。
    pub fn from_record(record: &SyncRecord) -> Self {
        Self {
            path: record.local_path.clone(),
            name: record.name.clone(),
            artist: record.artist.clone(),
            album: record.album.clone(),
            quality: Quality::classify(&record.format, record.bitrate),
            format: record.format.clone(),
            file_size: record.file_size,
            bitrate: record.bitrate,
            song_id: record.song_id,
            source: Provenance::Database,
            modified_at: record.file_modified_at,
        }
    }
}

/// 持久化的同步记录，主键为本地路径
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub local_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_id: Option<u64>,
    pub name: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    pub quality: Quality,
    pub status: SyncStatus,
    pub synced_at: DateTime<Utc>,
    pub file_modified_at: DateTime<Utc>,
    pub file_size: u64,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    pub source: Provenance,
}

impl SyncRecord {
    /// 由新扫描的曲目创建待同步记录
    pub fn from_track(track: &LocalTrack, now: DateTime<Utc>) -> Self {
        Self {
            local_path: track.path.clone(),
            song_id: track.song_id,
            name: track.name.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            quality: track.quality,
            status: SyncStatus::Pending,
            synced_at: now,
            file_modified_at: track.modified_at,
            file_size: track.file_size,
            format: track.format.clone(),
            bitrate: track.bitrate,
            source: track.source,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.file_modified_at, self.file_size)
    }

    pub fn is_deleted(&self) -> bool {
        self.status == SyncStatus::Deleted
    }
}
