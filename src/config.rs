//! 应用配置
//!
//! 所有配置保存在数据目录下的同一个 `config.json` 中，每个模块占一个顶层键。

use crate::core::quality::Quality;
use crate::core::scanner::ScanOptions;
use crate::db::StoreBackend;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";

/// 读取配置段，文件不存在或内容无效时返回默认值
pub fn load_section<T: DeserializeOwned + Default>(config_dir: &Path, key: &str) -> T {
    read_config(config_dir)
        .and_then(|config| config.get(key).cloned())
        .and_then(|section| serde_json::from_value(section).ok())
        .unwrap_or_default()
}

/// 写入配置段，保留文件中的其他段
pub fn save_section<T: Serialize>(config_dir: &Path, key: &str, section: &T) -> io::Result<()> {
    let mut config = read_config(config_dir)
        .filter(Value::is_object)
        .unwrap_or_else(|| serde_json::json!({}));

    config[key] = serde_json::to_value(section)?;

    fs::create_dir_all(config_dir)?;
    fs::write(
        config_dir.join(CONFIG_FILE),
        serde_json::to_string_pretty(&config)?,
    )
}

fn read_config(config_dir: &Path) -> Option<Value> {
    let content = fs::read_to_string(config_dir.join(CONFIG_FILE)).ok()?;
    serde_json::from_str(&content).ok()
}

/// 音乐库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryConfig {
    /// 默认扫描目录
    #[serde(default)]
    pub music_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// 指纹未变的文件复用数据库记录
    #[serde(default = "default_true")]
    pub incremental: bool,
    #[serde(default = "default_target_quality")]
    pub target_quality: Quality,
    #[serde(default)]
    pub store_backend: StoreBackend,
}

fn default_true() -> bool {
    true
}

fn default_target_quality() -> Quality {
    Quality::Lossless
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            music_dir: None,
            recursive: true,
            incremental: true,
            target_quality: default_target_quality(),
            store_backend: StoreBackend::default(),
        }
    }
}

impl LibraryConfig {
    const KEY: &'static str = "library";

    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, Self::KEY)
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, Self::KEY, self)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            recursive: self.recursive,
            incremental: self.incremental,
        }
    }
}
