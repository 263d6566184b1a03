//! 对账引擎：扫描本地目录、与远程曲库匹配，并把结果写回同步数据库

use crate::config::LibraryConfig;
use crate::core::catalog::RemoteSong;
use crate::core::matcher::{CatalogMatcher, MatchResult};
use crate::core::quality::Quality;
use crate::core::scanner::{LocalScanner, ScanProgress, ScanResult};
use crate::db::{IntegrityReport, LocalTrack, Provenance, SyncRecord, SyncStatus, SyncStore};
use crate::error::ScanError;
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// 一次对账的汇总，供展示层使用
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub target_quality: Quality,
    pub total_files: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub deleted_count: usize,
    pub failed_count: usize,
    pub failed_files: Vec<String>,
    pub format_distribution: BTreeMap<String, usize>,
    pub remote_total: usize,
    pub matched: usize,
    pub upgradable: usize,
    pub missing: usize,
    pub unavailable: usize,
    pub scan_duration_ms: u64,
    pub duration_ms: u64,
}

impl ReconcileSummary {
    pub fn new(scan: &ScanResult, result: &MatchResult, target_quality: Quality) -> Self {
        Self {
            target_quality,
            total_files: scan.total_files,
            new_count: scan.new_count,
            updated_count: scan.updated_count,
            skipped_count: scan.skipped_count,
            deleted_count: scan.deleted_count,
            failed_count: scan.failed_files.len(),
            failed_files: scan.failed_files.clone(),
            format_distribution: scan.format_distribution.clone(),
            remote_total: result.total(),
            matched: result.matched.len(),
            upgradable: result.upgradable.len(),
            missing: result.missing.len(),
            unavailable: result.unavailable.len(),
            scan_duration_ms: scan.duration_ms,
            duration_ms: scan.duration_ms,
        }
    }
}

/// 对账引擎
pub struct ReconcileEngine {
    store: Arc<dyn SyncStore>,
    config: LibraryConfig,
    matcher: CatalogMatcher,
}

impl ReconcileEngine {
    pub fn new(store: Arc<dyn SyncStore>, config: LibraryConfig) -> Self {
        Self {
            store,
            config,
            matcher: CatalogMatcher::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    /// 扫描并按配置的目标音质对账
    pub async fn run(&self, dir: &Path, remote: &[RemoteSong]) -> Result<ReconcileSummary> {
        let started = Instant::now();
        let scan = self.scan(dir, None, None).await?;
        let result = self
            .reconcile(remote, &scan, self.config.target_quality)
            .await?;

        let mut summary = ReconcileSummary::new(&scan, &result, self.config.target_quality);
        summary.duration_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }

    /// 扫描目录并持久化新增/变更/消失的文件
    ///
    /// 指纹未变而跳过的文件不写入；已关联远程歌曲的记录保留关联和状态。
    pub async fn scan(
        &self,
        dir: &Path,
        progress: Option<mpsc::Sender<ScanProgress>>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<ScanResult> {
        let prior = self.store.list_all().await.context("读取同步记录失败")?;

        let mut scanner = LocalScanner::new(self.config.scan_options());
        if let Some(tx) = progress {
            scanner = scanner.with_progress(tx);
        }
        if let Some(flag) = cancel {
            scanner = scanner.with_cancel(flag);
        }

        let result = scanner.scan(dir, &prior).await?;

        let prior_by_path: HashMap<&str, &SyncRecord> =
            prior.iter().map(|r| (r.local_path.as_str(), r)).collect();
        let now = Utc::now();
        let mut batch = Vec::new();

        for track in result.tracks.iter().filter(|t| t.source != Provenance::Database) {
            let mut record = SyncRecord::from_track(track, now);
            if let Some(previous) = prior_by_path.get(track.path.as_str()) {
                if previous.status.is_associated() && previous.song_id.is_some() {
                    record.song_id = previous.song_id;
                    record.status = previous.status;
                    record.synced_at = previous.synced_at;
                }
            }
            batch.push(record);
        }

        for path in &result.deleted_paths {
            if let Some(previous) = prior_by_path.get(path.as_str()) {
                let mut record = (*previous).clone();
                record.status = SyncStatus::Deleted;
                batch.push(record);
            }
        }

        if !batch.is_empty() {
            let count = batch.len();
            self.store
                .upsert_many(batch)
                .await
                .context("保存扫描结果失败")?;
            debug!("扫描结果已写入 {} 条记录", count);
        }

        Ok(result)
    }

    /// 与远程曲库匹配，并把匹配到的远程 ID 写回记录
    pub async fn reconcile(
        &self,
        remote: &[RemoteSong],
        scan: &ScanResult,
        target_quality: Quality,
    ) -> Result<MatchResult> {
        let records = self.store.list_all().await.context("读取同步记录失败")?;
        let result = self
            .matcher
            .reconcile(remote, &scan.tracks, &records, target_quality);

        let by_path: HashMap<&str, &SyncRecord> =
            records.iter().map(|r| (r.local_path.as_str(), r)).collect();
        let now = Utc::now();
        let mut batch = Vec::new();

        let associations = result
            .matched
            .iter()
            .map(|m| (&m.local_track, m.song.id))
            .chain(result.upgradable.iter().map(|u| (&u.local_track, u.song.id)));

        for (track, song_id) in associations {
            let mut record = match by_path.get(track.path.as_str()) {
                Some(existing) => (*existing).clone(),
                None => SyncRecord::from_track(track, now),
            };
            let status = match record.status {
                SyncStatus::Upgraded => SyncStatus::Upgraded,
                _ => SyncStatus::Synced,
            };
            if record.song_id == Some(song_id) && record.status == status {
                continue;
            }
            record.song_id = Some(song_id);
            record.status = status;
            record.synced_at = now;
            batch.push(record);
        }

        if !batch.is_empty() {
            let count = batch.len();
            self.store
                .upsert_many(batch)
                .await
                .context("保存匹配结果失败")?;
            debug!("更新了 {} 条关联记录", count);
        }

        info!(
            "对账完成: 远程 {} 首, 已匹配 {}, 可升级 {}, 缺失 {}, 不可获取 {}",
            result.total(),
            result.matched.len(),
            result.upgradable.len(),
            result.missing.len(),
            result.unavailable.len()
        );

        Ok(result)
    }

    /// 下载完成后登记新文件
    ///
    /// 格式、码率和音质从文件本身识别，与扫描得到的结果一致。
    pub async fn record_download(&self, path: &Path, song: &RemoteSong) -> Result<SyncRecord> {
        let track = self
            .identify(path)
            .await
            .with_context(|| format!("无法识别下载文件: {:?}", path))?;

        let mut record = SyncRecord::from_track(&track, Utc::now());
        record.song_id = Some(song.id);
        record.name = song.name.clone();
        record.artist = song.artist_line();
        record.album = Some(song.album.name.clone()).filter(|a| !a.is_empty());
        record.status = SyncStatus::Synced;

        self.store.upsert(record.clone()).await?;
        info!("已登记下载: {} ({})", record.local_path, record.quality);
        Ok(record)
    }

    /// 以更高音质的文件替换原文件后登记升级
    ///
    /// `replacement` 可以与原路径相同；路径不同时原记录被新路径的记录取代。
    pub async fn record_upgrade(&self, path: &str, replacement: &Path) -> Result<SyncRecord> {
        let previous = self
            .store
            .get(path)
            .await?
            .ok_or_else(|| anyhow!("没有该文件的同步记录: {}", path))?;
        if previous.is_deleted() {
            bail!("记录已标记删除: {}", path);
        }

        let track = self
            .identify(replacement)
            .await
            .with_context(|| format!("无法识别升级文件: {:?}", replacement))?;
        if track.quality <= previous.quality {
            bail!(
                "新音质 {} 不高于当前音质 {}: {}",
                track.quality,
                previous.quality,
                path
            );
        }

        let mut record = SyncRecord::from_track(&track, Utc::now());
        record.song_id = previous.song_id;
        record.name = previous.name;
        record.artist = previous.artist;
        record.album = previous.album;
        record.status = SyncStatus::Upgraded;

        self.store.upsert(record.clone()).await?;
        if record.local_path != previous.local_path {
            self.store.delete(&previous.local_path).await?;
        }
        info!(
            "已登记升级: {} -> {} ({} -> {})",
            path, record.local_path, previous.quality, record.quality
        );
        Ok(record)
    }

    async fn identify(&self, path: &Path) -> Result<LocalTrack, ScanError> {
        LocalScanner::new(self.config.scan_options())
            .identify(path)
            .await
    }

    /// 解除与远程歌曲的关联，返回记录是否存在
    pub async fn dissociate(&self, path: &str) -> Result<bool> {
        let Some(mut record) = self.store.get(path).await? else {
            return Ok(false);
        };
        record.song_id = None;
        if record.status != SyncStatus::Deleted {
            record.status = SyncStatus::Pending;
        }
        self.store.upsert(record).await?;
        Ok(true)
    }

    /// 检查文件是否仍存在，并把缺失的标记为已删除
    pub async fn integrity_sweep(&self) -> Result<IntegrityReport> {
        let report = self.store.integrity_check().await?;
        for path in &report.deleted_now_missing {
            self.store.mark_deleted(path).await?;
        }
        if !report.deleted_now_missing.is_empty() {
            info!(
                "完整性检查: {} 个文件有效, {} 个已标记删除",
                report.valid,
                report.deleted_now_missing.len()
            );
        }
        Ok(report)
    }

    pub async fn cleanup(&self) -> Result<usize> {
        Ok(self.store.cleanup().await?)
    }
}
