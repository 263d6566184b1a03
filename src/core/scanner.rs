//! 本地音乐目录扫描
//!
//! 逐个文件顺序处理：加密容器优先读头部元数据，其次读标签，最后从文件名推断。
//! 增量模式下指纹（修改时间 + 大小）未变的文件直接复用数据库记录。

use crate::core::codec::ContainerCodec;
use crate::core::quality::Quality;
use crate::core::tags;
use crate::db::models::{Fingerprint, LocalTrack, Provenance, SyncRecord};
use crate::error::{CodecError, ScanError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 支持的音频扩展名
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "m4a", "aac", "ogg", "opus", "ape", "wma", "ncm",
];

/// 加密容器扩展名
const CONTAINER_EXTENSION: &str = "ncm";

/// 解析容器头部时首次读取的字节数
const HEADER_PROBE_BYTES: u64 = 64 * 1024;

/// 无法识别歌手时使用的占位名
pub const UNKNOWN_ARTIST: &str = "未知歌手";

/// 文件名中可作为分隔符的横线
const DASHES: [char; 4] = ['-', '－', '–', '—'];

/// 扫描选项
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub recursive: bool,
    pub incremental: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            incremental: true,
        }
    }
}

/// 扫描进度
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub current: usize,
    pub total: usize,
    pub path: String,
}

/// 扫描结果
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub total_files: usize,
    pub tracks: Vec<LocalTrack>,
    pub failed_files: Vec<String>,
    pub format_distribution: BTreeMap<String, usize>,
    pub new_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub deleted_count: usize,
    /// 本次扫描中消失的已记录文件，由调用方负责持久化
    pub deleted_paths: Vec<String>,
    pub duration_ms: u64,
}

/// 目录遍历发现的文件
#[derive(Debug, Clone)]
struct Discovered {
    path: PathBuf,
    key: String,
    fingerprint: Fingerprint,
}

/// 本地扫描器
pub struct LocalScanner {
    codec: ContainerCodec,
    options: ScanOptions,
    cancel_flag: Option<Arc<AtomicBool>>,
    progress_tx: Option<mpsc::Sender<ScanProgress>>,
}

impl LocalScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            codec: ContainerCodec::new(),
            options,
            cancel_flag: None,
            progress_tx: None,
        }
    }

    /// 设置取消标志，在两个文件之间检查
    pub fn with_cancel(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    /// 每处理完一个文件发送一次进度
    pub fn with_progress(mut self, tx: mpsc::Sender<ScanProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 扫描目录
    ///
    /// `prior_records` 为上次扫描持久化的记录，仅在增量模式下使用。
    /// 根目录先解析为绝对路径，记录主键与调用方传入的写法无关。
    pub async fn scan(
        &self,
        root: &Path,
        prior_records: &[SyncRecord],
    ) -> Result<ScanResult, ScanError> {
        let started = Instant::now();
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| ScanError::fs(root, e))?;
        let root = root.as_path();
        info!("开始扫描: {:?} (递归: {}, 增量: {})", root, self.options.recursive, self.options.incremental);

        let (discovered, mut failed_files) = self.discover(root).await?;
        let total = discovered.len() + failed_files.len();

        let prior: HashMap<&str, &SyncRecord> = if self.options.incremental {
            prior_records
                .iter()
                .filter(|r| self.in_scope(root, &r.local_path))
                .map(|r| (r.local_path.as_str(), r))
                .collect()
        } else {
            HashMap::new()
        };

        let mut result = ScanResult {
            total_files: total,
            ..Default::default()
        };

        for (index, file) in discovered.iter().enumerate() {
            if self.is_cancelled() {
                info!("扫描已取消，已处理 {}/{}", index, total);
                return Err(ScanError::Cancelled);
            }

            let previous = prior.get(file.key.as_str()).filter(|r| !r.is_deleted());

            match previous {
                Some(record) if record.fingerprint() == file.fingerprint => {
                    debug!("指纹未变，跳过: {}", file.key);
                    result.tracks.push(LocalTrack::from_record(record));
                    result.skipped_count += 1;
                }
                _ => match self.resolve(file).await {
                    Ok(track) => {
                        if previous.is_some() {
                            result.updated_count += 1;
                        } else {
                            result.new_count += 1;
                        }
                        result.tracks.push(track);
                    }
                    Err(e) => {
                        warn!("扫描文件失败: {}", e);
                        failed_files.push(file.key.clone());
                    }
                },
            }

            if let Some(tx) = &self.progress_tx {
                let _ = tx
                    .send(ScanProgress {
                        current: index + 1,
                        total,
                        path: file.key.clone(),
                    })
                    .await;
            }
        }

        // 已记录但本次未发现的文件
        let seen: HashSet<&str> = discovered
            .iter()
            .map(|f| f.key.as_str())
            .chain(failed_files.iter().map(String::as_str))
            .collect();
        let mut deleted_paths: Vec<String> = prior
            .values()
            .filter(|r| !r.is_deleted() && !seen.contains(r.local_path.as_str()))
            .map(|r| r.local_path.clone())
            .collect();
        deleted_paths.sort();

        for track in &result.tracks {
            *result
                .format_distribution
                .entry(track.format.clone())
                .or_insert(0) += 1;
        }

        result.deleted_count = deleted_paths.len();
        result.deleted_paths = deleted_paths;
        result.failed_files = failed_files;
        result.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "扫描完成: {} 个文件, 新增 {}, 更新 {}, 跳过 {}, 删除 {}, 失败 {}, 耗时 {}ms",
            result.total_files,
            result.new_count,
            result.updated_count,
            result.skipped_count,
            result.deleted_count,
            result.failed_files.len(),
            result.duration_ms
        );

        Ok(result)
    }

    /// 记录是否属于本次扫描范围
    fn in_scope(&self, root: &Path, record_path: &str) -> bool {
        let path = Path::new(record_path);
        if self.options.recursive {
            path.starts_with(root)
        } else {
            path.parent() == Some(root)
        }
    }

    /// 遍历目录，返回音频文件及无法读取属性的文件
    async fn discover(&self, root: &Path) -> Result<(Vec<Discovered>, Vec<String>), ScanError> {
        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(|e| ScanError::fs(root, e))?;
        if !metadata.is_dir() {
            return Err(ScanError::fs(
                root,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "不是目录"),
            ));
        }

        let root = root.to_path_buf();
        let max_depth = if self.options.recursive { usize::MAX } else { 1 };

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || {
            let mut found = Vec::new();
            let mut failed = Vec::new();

            for entry in WalkDir::new(&root).follow_links(false).max_depth(max_depth) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("无法访问目录项: {}", e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !is_audio_file(entry.path()) {
                    continue;
                }

                let key = entry.path().to_string_lossy().into_owned();
                match entry
                    .metadata()
                    .map_err(std::io::Error::from)
                    .and_then(|m| Fingerprint::from_metadata(&m))
                {
                    Ok(fingerprint) => found.push(Discovered {
                        path: entry.path().to_path_buf(),
                        key,
                        fingerprint,
                    }),
                    Err(e) => {
                        warn!("无法读取文件属性 {}: {}", key, e);
                        failed.push(key);
                    }
                }
            }

            // 按路径排序，保证结果与遍历顺序无关
            found.sort_by(|a: &Discovered, b: &Discovered| a.key.cmp(&b.key));
            (found, failed)
        })
        .await
        .map_err(|e| ScanError::Task(e.to_string()))
    }

    /// 识别单个文件，不经过目录遍历和增量比对
    pub async fn identify(&self, path: &Path) -> Result<LocalTrack, ScanError> {
        let path = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| ScanError::fs(path, e))?;
        let fingerprint = tokio::fs::metadata(&path)
            .await
            .and_then(|m| Fingerprint::from_metadata(&m))
            .map_err(|e| ScanError::fs(&path, e))?;
        let file = Discovered {
            key: path.to_string_lossy().into_owned(),
            path,
            fingerprint,
        };
        self.resolve(&file).await
    }

    /// 解析单个文件（阻塞 IO 放到 blocking 线程）
    async fn resolve(&self, file: &Discovered) -> Result<LocalTrack, ScanError> {
        let codec = self.codec;
        let file = file.clone();
        tokio::task::spawn_blocking(move || resolve_file(&codec, &file))
            .await
            .map_err(|e| ScanError::Task(e.to_string()))?
    }
}

/// 是否为支持的音频文件
pub fn is_audio_file(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// 从文件名拆分歌名和歌手："歌名 - 歌手"
///
/// 以第一个横线为准；找不到分隔符时整个文件名作为歌名，歌手为占位名。
pub fn parse_filename(stem: &str) -> (String, String) {
    for (index, c) in stem.char_indices() {
        if !DASHES.contains(&c) {
            continue;
        }
        let name = stem[..index].trim();
        let artist = stem[index + c.len_utf8()..].trim();
        if !name.is_empty() && !artist.is_empty() {
            return (name.to_string(), artist.to_string());
        }
    }
    let name = stem.trim();
    let name = if name.is_empty() { stem } else { name };
    (name.to_string(), UNKNOWN_ARTIST.to_string())
}

/// 识别得到的曲目信息
struct Identity {
    name: String,
    artist: String,
    album: Option<String>,
    format: String,
    bitrate: Option<u32>,
    song_id: Option<u64>,
    source: Provenance,
}

fn resolve_file(codec: &ContainerCodec, file: &Discovered) -> Result<LocalTrack, ScanError> {
    let ext = extension_of(&file.path).unwrap_or_default();
    let identity = if ext == CONTAINER_EXTENSION {
        resolve_container(codec, &file.path)?
    } else {
        resolve_plain(&file.path, &ext)
    };

    Ok(LocalTrack {
        path: file.key.clone(),
        quality: Quality::classify(&identity.format, identity.bitrate),
        name: identity.name,
        artist: identity.artist,
        album: identity.album,
        format: identity.format,
        file_size: file.fingerprint.size,
        bitrate: identity.bitrate,
        song_id: identity.song_id,
        source: identity.source,
        modified_at: file.fingerprint.modified_at,
    })
}

fn resolve_plain(path: &Path, ext: &str) -> Identity {
    let tags = match tags::read_from_path(path) {
        Ok(info) => Some(info),
        Err(e) => {
            debug!("读取标签失败 {:?}: {}", path, e);
            None
        }
    };

    if let Some((title, artist)) = tags.as_ref().and_then(|t| t.identity()) {
        return Identity {
            name: title.to_string(),
            artist: artist.to_string(),
            album: tags.as_ref().and_then(|t| t.album.clone()),
            format: ext.to_string(),
            bitrate: tags.as_ref().and_then(|t| t.bitrate),
            song_id: None,
            source: Provenance::Metadata,
        };
    }

    from_filename(path, ext.to_string(), tags.and_then(|t| t.bitrate), None)
}

fn resolve_container(codec: &ContainerCodec, path: &Path) -> Result<Identity, ScanError> {
    // 先只读头部
    let prefix = read_prefix(path, HEADER_PROBE_BYTES)?;
    let probed = match codec.probe_metadata(&prefix) {
        Ok(meta) => meta,
        Err(CodecError::Truncated { needed, .. }) if needed > prefix.len() => {
            let prefix = read_prefix(path, needed as u64)?;
            codec
                .probe_metadata(&prefix)
                .map_err(|source| ScanError::Codec {
                    path: path.to_path_buf(),
                    source,
                })?
        }
        Err(source) => {
            return Err(ScanError::Codec {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if let Some(meta) = probed.filter(|m| m.is_usable()) {
        if let Some(format) = meta.format {
            debug!("使用容器头部元数据: {:?}", path);
            return Ok(Identity {
                name: meta.title.trim().to_string(),
                artist: meta.artist_line(),
                album: meta.album.clone(),
                format: format.as_str().to_string(),
                bitrate: meta.bitrate_kbps(),
                song_id: meta.music_id,
                source: Provenance::Metadata,
            });
        }
    }

    // 完整解码
    let bytes = std::fs::read(path).map_err(|e| ScanError::fs(path, e))?;
    let decoded = codec.decode(&bytes).map_err(|source| ScanError::Codec {
        path: path.to_path_buf(),
        source,
    })?;
    let format = decoded.format.as_str().to_string();

    if let Some(meta) = decoded.metadata.as_ref().filter(|m| m.is_usable()) {
        return Ok(Identity {
            name: meta.title.trim().to_string(),
            artist: meta.artist_line(),
            album: meta.album.clone(),
            format,
            bitrate: meta.bitrate_kbps(),
            song_id: meta.music_id,
            source: Provenance::Metadata,
        });
    }

    let song_id = decoded.metadata.as_ref().and_then(|m| m.music_id);
    match tags::read_from_bytes(&decoded.audio) {
        Ok(info) => {
            if let Some((title, artist)) = info.identity() {
                return Ok(Identity {
                    name: title.to_string(),
                    artist: artist.to_string(),
                    album: info.album.clone(),
                    format,
                    bitrate: info.bitrate,
                    song_id,
                    source: Provenance::Metadata,
                });
            }
            Ok(from_filename(path, format, info.bitrate, song_id))
        }
        Err(e) => {
            debug!("解密音频标签读取失败 {:?}: {}", path, e);
            Ok(from_filename(path, format, None, song_id))
        }
    }
}

fn from_filename(path: &Path, format: String, bitrate: Option<u32>, song_id: Option<u64>) -> Identity {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (name, artist) = parse_filename(&stem);
    Identity {
        name,
        artist,
        album: None,
        format,
        bitrate,
        song_id,
        source: Provenance::Filename,
    }
}

fn read_prefix(path: &Path, limit: u64) -> Result<Vec<u8>, ScanError> {
    let file = File::open(path).map_err(|e| ScanError::fs(path, e))?;
    let mut buf = Vec::new();
    file.take(limit)
        .read_to_end(&mut buf)
        .map_err(|e| ScanError::fs(path, e))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{ArtistRef, AudioFormat, DecryptedTrackMetadata};
    use crate::db::models::SyncStatus;
    use chrono::Utc;

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, data).unwrap();
        path
    }

    fn container(title: &str, artist: &str, format: Option<AudioFormat>) -> Vec<u8> {
        let meta = DecryptedTrackMetadata {
            music_id: Some(77),
            title: title.to_string(),
            artists: vec![ArtistRef {
                name: artist.to_string(),
                id: Some(1),
            }],
            album: None,
            album_id: None,
            bitrate: Some(320_000),
            duration_ms: None,
            format,
        };
        ContainerCodec::new().encode(b"ID3\x03\0\0\0\0\0\0", b"rc4-key", Some(&meta))
    }

    #[test]
    fn test_parse_filename() {
        assert_eq!(
            parse_filename("稻香 - 周杰伦"),
            ("稻香".to_string(), "周杰伦".to_string())
        );
        assert_eq!(
            parse_filename("晴天—周杰伦"),
            ("晴天".to_string(), "周杰伦".to_string())
        );
        assert_eq!(
            parse_filename("七里香"),
            ("七里香".to_string(), UNKNOWN_ARTIST.to_string())
        );
        // 第一个横线生效
        assert_eq!(
            parse_filename("a - b - c"),
            ("a".to_string(), "b - c".to_string())
        );
        assert_eq!(
            parse_filename("-开头"),
            ("-开头".to_string(), UNKNOWN_ARTIST.to_string())
        );
    }

    #[test]
    fn test_is_audio_file() {
        assert!(is_audio_file(Path::new("/a/b.FLAC")));
        assert!(is_audio_file(Path::new("x.ncm")));
        assert!(!is_audio_file(Path::new("cover.jpg")));
        assert!(!is_audio_file(Path::new("noext")));
    }

    #[tokio::test]
    async fn test_filename_fallback() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "稻香 - 周杰伦.flac", b"not really flac");

        let result = LocalScanner::new(ScanOptions::default())
            .scan(dir.path(), &[])
            .await
            .unwrap();

        assert_eq!(result.total_files, 1);
        assert_eq!(result.new_count, 1);
        let track = &result.tracks[0];
        assert_eq!(track.name, "稻香");
        assert_eq!(track.artist, "周杰伦");
        assert_eq!(track.source, Provenance::Filename);
        assert_eq!(track.quality, Quality::Lossless);
        assert_eq!(result.format_distribution.get("flac"), Some(&1));
    }

    #[tokio::test]
    async fn test_container_header_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x.ncm", &container("稻香", "周杰伦", Some(AudioFormat::Mp3)));

        let result = LocalScanner::new(ScanOptions::default())
            .scan(dir.path(), &[])
            .await
            .unwrap();

        let track = &result.tracks[0];
        assert_eq!(track.name, "稻香");
        assert_eq!(track.artist, "周杰伦");
        assert_eq!(track.song_id, Some(77));
        assert_eq!(track.format, "mp3");
        assert_eq!(track.bitrate, Some(320));
        assert_eq!(track.quality, Quality::High);
        assert_eq!(track.source, Provenance::Metadata);
    }

    #[tokio::test]
    async fn test_container_without_declared_format_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "y.ncm", &container("晴天", "周杰伦", None));

        let result = LocalScanner::new(ScanOptions::default())
            .scan(dir.path(), &[])
            .await
            .unwrap();
        assert_eq!(result.tracks[0].format, "mp3");
        assert_eq!(result.tracks[0].name, "晴天");
    }

    #[tokio::test]
    async fn test_bad_container_does_not_abort_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = container("稻香", "周杰伦", Some(AudioFormat::Mp3));
        bad[0] = b'X';
        write(dir.path(), "bad.ncm", &bad);
        write(dir.path(), "ok - 歌手.mp3", b"junk");

        let result = LocalScanner::new(ScanOptions::default())
            .scan(dir.path(), &[])
            .await
            .unwrap();

        assert_eq!(result.total_files, 2);
        assert_eq!(result.tracks.len(), 1);
        assert_eq!(result.failed_files.len(), 1);
        assert!(result.failed_files[0].ends_with("bad.ncm"));
    }

    #[tokio::test]
    async fn test_non_recursive() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a - b.mp3", b"x");
        write(dir.path(), "sub/c - d.mp3", b"x");
        write(dir.path(), "cover.jpg", b"x");

        let flat = LocalScanner::new(ScanOptions {
            recursive: false,
            incremental: false,
        })
        .scan(dir.path(), &[])
        .await
        .unwrap();
        assert_eq!(flat.total_files, 1);

        let deep = LocalScanner::new(ScanOptions::default())
            .scan(dir.path(), &[])
            .await
            .unwrap();
        assert_eq!(deep.total_files, 2);
    }

    #[tokio::test]
    async fn test_incremental_skip_update_delete() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a - b.mp3", b"x");
        write(dir.path(), "c - d.mp3", b"x");

        let scanner = LocalScanner::new(ScanOptions::default());
        let first = scanner.scan(dir.path(), &[]).await.unwrap();
        let mut records: Vec<SyncRecord> = first
            .tracks
            .iter()
            .map(|t| SyncRecord::from_track(t, Utc::now()))
            .collect();

        let second = scanner.scan(dir.path(), &records).await.unwrap();
        assert_eq!(second.skipped_count, 2);
        assert_eq!(second.new_count + second.updated_count, 0);
        assert!(second.tracks.iter().all(|t| t.source == Provenance::Database));

        // 修改一个文件大小，删除另一个，记录一个已删除的旧文件
        write(dir.path(), "a - b.mp3", b"longer content");
        std::fs::remove_file(dir.path().join("c - d.mp3")).unwrap();
        let mut gone = records[0].clone();
        gone.local_path = dir.path().join("old.mp3").to_string_lossy().into_owned();
        gone.status = SyncStatus::Deleted;
        records.push(gone);

        let third = scanner.scan(dir.path(), &records).await.unwrap();
        assert_eq!(third.updated_count, 1);
        assert_eq!(third.deleted_count, 1);
        assert!(third.deleted_paths[0].ends_with("c - d.mp3"));
    }

    #[tokio::test]
    async fn test_progress_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a - b.mp3", b"x");
        write(dir.path(), "c - d.mp3", b"x");

        let (tx, mut rx) = mpsc::channel(8);
        LocalScanner::new(ScanOptions::default())
            .with_progress(tx)
            .scan(dir.path(), &[])
            .await
            .unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!((first.current, first.total), (1, 2));

        let cancel = Arc::new(AtomicBool::new(true));
        let err = LocalScanner::new(ScanOptions::default())
            .with_cancel(cancel)
            .scan(dir.path(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
    }

    #[tokio::test]
    async fn test_root_spelling_does_not_change_keys() {
        let cwd = std::env::current_dir().unwrap();
        let dir = tempfile::tempdir_in(&cwd).unwrap();
        let relative = dir.path().strip_prefix(&cwd).unwrap();
        assert!(relative.is_relative());
        write(dir.path(), "稻香 - 周杰伦.flac", b"x");
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let scanner = LocalScanner::new(ScanOptions::default());
        let first = scanner.scan(relative, &[]).await.unwrap();
        let key = first.tracks[0].path.clone();
        assert!(Path::new(&key).is_absolute());

        let records: Vec<SyncRecord> = first
            .tracks
            .iter()
            .map(|t| SyncRecord::from_track(t, Utc::now()))
            .collect();
        let absolute = dir.path().canonicalize().unwrap();
        for root in [
            absolute.clone(),
            absolute.join("."),
            absolute.join("sub").join(".."),
        ] {
            let again = scanner.scan(&root, &records).await.unwrap();
            assert_eq!(again.new_count, 0, "root: {:?}", root);
            assert_eq!(again.skipped_count, 1);
            assert_eq!(again.deleted_count, 0);
            assert_eq!(again.tracks[0].path, key);
        }
    }

    #[tokio::test]
    async fn test_identify_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "sub/x.ncm", &container("稻香", "周杰伦", Some(AudioFormat::Mp3)));

        let scanner = LocalScanner::new(ScanOptions::default());
        let track = scanner
            .identify(&dir.path().join("sub").join("..").join("sub").join("x.ncm"))
            .await
            .unwrap();
        assert_eq!(track.path, path.canonicalize().unwrap().to_string_lossy());
        assert_eq!(track.quality, Quality::High);
        assert_eq!(track.song_id, Some(77));

        assert!(scanner.identify(&dir.path().join("missing.mp3")).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_root() {
        let err = LocalScanner::new(ScanOptions::default())
            .scan(Path::new("/definitely/not/here"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::FileSystem { .. }));
    }
}
