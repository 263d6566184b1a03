use anyhow::{bail, Context, Result};
use musicsync_lib::core::RemoteSong;
use musicsync_lib::logging::init_logging;
use musicsync_lib::{open_store, AppContext, ReconcileEngine};
use std::path::PathBuf;

const USAGE: &str = "用法: musicsync [-v|--verbose] <音乐目录> <曲库.json>";

#[tokio::main]
async fn main() -> Result<()> {
    let mut verbose = false;
    let mut positional = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            _ => positional.push(arg),
        }
    }

    let ctx = AppContext::from_env(verbose).context("无法初始化数据目录")?;
    init_logging(&ctx);

    let config = ctx.library_config();
    let (music_dir, catalog_path) = match positional.as_slice() {
        [dir, catalog] => (PathBuf::from(dir), PathBuf::from(catalog)),
        [catalog] => match &config.music_dir {
            Some(dir) => (dir.clone(), PathBuf::from(catalog)),
            None => bail!("{}", USAGE),
        },
        _ => bail!("{}", USAGE),
    };

    let content = tokio::fs::read_to_string(&catalog_path)
        .await
        .with_context(|| format!("无法读取曲库文件: {:?}", catalog_path))?;
    let catalog: serde_json::Value =
        serde_json::from_str(&content).context("曲库文件不是有效的 JSON")?;
    let remote = RemoteSong::parse_list(&catalog);

    let store = open_store(config.store_backend, &ctx.data_dir)
        .await
        .context("无法打开同步数据库")?;
    let engine = ReconcileEngine::new(store, config);

    let summary = engine.run(&music_dir, &remote).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
