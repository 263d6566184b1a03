use std::path::{Path, PathBuf};

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod logging;

pub use crate::config::LibraryConfig;
pub use crate::core::{ReconcileEngine, ReconcileSummary};
pub use crate::db::{open_store, StoreBackend, SyncStore};

const APP_DIR: &str = "musicsync";

/// 运行上下文，显式传给需要数据目录的组件
#[derive(Debug, Clone)]
pub struct AppContext {
    /// 配置、日志和同步数据库所在目录
    pub data_dir: PathBuf,
    pub verbose: bool,
}

impl AppContext {
    pub fn new(data_dir: impl Into<PathBuf>, verbose: bool) -> std::io::Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir, verbose })
    }

    /// 默认数据目录为系统配置目录下的 musicsync，可在其 config.json 中用 dataPath 指向别处
    pub fn from_env(verbose: bool) -> std::io::Result<Self> {
        let default_dir = dirs::config_dir()
            .map(|p| p.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_DIR)));
        std::fs::create_dir_all(&default_dir)?;

        let data_dir = custom_data_path(&default_dir)
            .inspect(|p| tracing::debug!("使用自定义数据路径: {:?}", p))
            .unwrap_or(default_dir);

        Self::new(data_dir, verbose)
    }

    pub fn library_config(&self) -> LibraryConfig {
        LibraryConfig::load(&self.data_dir)
    }
}

fn custom_data_path(default_dir: &Path) -> Option<PathBuf> {
    let content = std::fs::read_to_string(default_dir.join(config::CONFIG_FILE)).ok()?;
    let config: serde_json::Value = serde_json::from_str(&content).ok()?;
    config
        .get("dataPath")?
        .as_str()
        .map(PathBuf::from)
        .filter(|p| p.is_dir())
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("a").join("b");
        let ctx = AppContext::new(&data_dir, true).unwrap();
        assert!(ctx.data_dir.is_dir());
        assert!(ctx.verbose);
        assert!(ctx.library_config().incremental);
    }

    #[test]
    fn test_custom_data_path() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("custom");
        std::fs::create_dir(&custom).unwrap();
        std::fs::write(
            dir.path().join(config::CONFIG_FILE),
            serde_json::json!({ "dataPath": custom }).to_string(),
        )
        .unwrap();

        assert_eq!(custom_data_path(dir.path()), Some(custom));
    }

    #[test]
    fn test_custom_data_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(config::CONFIG_FILE),
            r#"{"dataPath": "/definitely/not/here"}"#,
        )
        .unwrap();
        assert_eq!(custom_data_path(dir.path()), None);
    }
}
