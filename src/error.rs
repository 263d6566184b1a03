//! 错误类型
//!
//! 组件级错误使用 thiserror 定义，应用层（引擎、命令行）统一转为 anyhow。

use std::path::PathBuf;
use thiserror::Error;

/// 加密容器解码错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// 文件头魔数不匹配
    #[error("容器格式错误: {reason}")]
    ContainerFormat { reason: String },

    /// 缓冲区长度不足，`needed` 为解析到当前字段所需的总字节数
    #[error("容器数据被截断: 需要 {needed} 字节, 实际 {available} 字节")]
    Truncated { needed: usize, available: usize },

    #[error("密钥解密失败: {0}")]
    KeyDecryption(String),

    /// 元数据解码失败，解码流程中会降级为无元数据
    #[error("元数据解码失败: {0}")]
    MetadataDecode(String),
}

impl CodecError {
    /// 魔数错误和截断都属于容器格式错误
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            CodecError::ContainerFormat { .. } | CodecError::Truncated { .. }
        )
    }
}

/// 扫描错误
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("文件系统错误 {path:?}: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("解码失败 {path:?}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("扫描已取消")]
    Cancelled,

    #[error("后台任务失败: {0}")]
    Task(String),
}

impl ScanError {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::FileSystem {
            path: path.into(),
            source,
        }
    }
}

/// 同步数据库错误，写入失败必须向上传递
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("存储 IO 错误 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("存储序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("不支持的存储版本: {found} (当前版本 {current})")]
    UnsupportedVersion { found: u32, current: u32 },

    #[error("无效的记录字段 {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
