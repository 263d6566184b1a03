//! 本地曲目与远程曲库的匹配
//!
//! 对每首远程歌曲依次尝试：
//! 1. 同步数据库中记录的远程 ID
//! 2. 扫描结果中直接携带的远程 ID（来自容器元数据）
//! 3. 歌名 + 歌手的模糊匹配
//!
//! 匹配成功后再按音质分入 matched / upgradable。整个过程是纯函数，不做 IO。

use crate::core::catalog::RemoteSong;
use crate::core::normalize::{normalize, normalize_artist, similarity};
use crate::core::quality::Quality;
use crate::core::scanner::UNKNOWN_ARTIST;
use crate::db::models::{LocalTrack, SyncRecord};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// 匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Id,
    Exact,
    Fuzzy,
}

/// 不可获取的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnavailableReason {
    Copyright,
    Vip,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedTrack {
    pub song: RemoteSong,
    pub local_track: LocalTrack,
    pub match_method: MatchMethod,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradableTrack {
    pub song: RemoteSong,
    pub local_track: LocalTrack,
    pub current_quality: Quality,
    pub target_quality: Quality,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnavailableSong {
    pub song: RemoteSong,
    pub reason: UnavailableReason,
}

/// 匹配结果：四个集合互不相交，覆盖全部输入歌曲
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchResult {
    pub matched: Vec<MatchedTrack>,
    pub upgradable: Vec<UpgradableTrack>,
    pub missing: Vec<RemoteSong>,
    pub unavailable: Vec<UnavailableSong>,
}

impl MatchResult {
    pub fn total(&self) -> usize {
        self.matched.len() + self.upgradable.len() + self.missing.len() + self.unavailable.len()
    }
}

/// 候选匹配
#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    track: &'a LocalTrack,
    method: MatchMethod,
    confidence: f64,
}

/// 预先归一化的本地曲目
struct PreparedTrack<'a> {
    track: &'a LocalTrack,
    name: String,
    artist: String,
}

/// 曲库匹配器
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogMatcher;

impl CatalogMatcher {
    /// 最终接受匹配的置信度下限（严格大于）
    pub const ACCEPT_THRESHOLD: f64 = 0.75;
    /// 编辑距离相似度下限（严格大于）
    pub const FUZZY_THRESHOLD: f64 = 0.8;
    /// 置信度不低于此值视为精确匹配
    pub const EXACT_THRESHOLD: f64 = 0.95;
    /// 包含关系成立所需的最短/最长长度比（严格大于）
    const CONTAINMENT_RATIO: f64 = 0.5;
    const ARTIST_CONTAINMENT_SCORE: f64 = 0.9;

    pub fn new() -> Self {
        Self
    }

    pub fn reconcile(
        &self,
        remote_songs: &[RemoteSong],
        local_tracks: &[LocalTrack],
        sync_records: &[SyncRecord],
        target_quality: Quality,
    ) -> MatchResult {
        let mut result = MatchResult::default();

        let by_path: HashMap<&str, &LocalTrack> =
            local_tracks.iter().map(|t| (t.path.as_str(), t)).collect();

        // 数据库记录：远程 ID -> 本次扫描中仍存在的曲目（按路径取第一个，保证稳定）
        let mut record_index: HashMap<u64, &LocalTrack> = HashMap::new();
        let mut records: Vec<&SyncRecord> = sync_records
            .iter()
            .filter(|r| !r.is_deleted() && r.song_id.is_some())
            .collect();
        records.sort_by(|a, b| a.local_path.cmp(&b.local_path));
        for record in records {
            if let (Some(id), Some(track)) = (record.song_id, by_path.get(record.local_path.as_str())) {
                record_index.entry(id).or_insert(*track);
            }
        }

        let mut sorted_tracks: Vec<&LocalTrack> = local_tracks.iter().collect();
        sorted_tracks.sort_by(|a, b| a.path.cmp(&b.path));

        let mut track_index: HashMap<u64, &LocalTrack> = HashMap::new();
        for track in &sorted_tracks {
            if let Some(id) = track.song_id {
                track_index.entry(id).or_insert(*track);
            }
        }

        // 模糊匹配只在需要时才归一化本地曲目
        let mut prepared: Option<Vec<PreparedTrack<'_>>> = None;

        for song in remote_songs {
            if !song.available {
                result.unavailable.push(UnavailableSong {
                    song: song.clone(),
                    reason: if song.need_vip {
                        UnavailableReason::Vip
                    } else {
                        UnavailableReason::Copyright
                    },
                });
                continue;
            }

            let by_id = record_index
                .get(&song.id)
                .or_else(|| track_index.get(&song.id))
                .copied()
                .map(|track| Candidate {
                    track,
                    method: MatchMethod::Id,
                    confidence: 1.0,
                });

            let candidate = by_id.or_else(|| {
                let tracks = prepared.get_or_insert_with(|| prepare(&sorted_tracks));
                self.best_fuzzy(song, tracks)
            });

            match candidate {
                Some(c) => {
                    let online = Quality::best_online(&song.available_qualities, target_quality);
                    let local = c.track.quality;
                    if online.rank() > local.rank() {
                        result.upgradable.push(UpgradableTrack {
                            song: song.clone(),
                            local_track: c.track.clone(),
                            current_quality: local,
                            target_quality: online,
                        });
                    } else {
                        result.matched.push(MatchedTrack {
                            song: song.clone(),
                            local_track: c.track.clone(),
                            match_method: c.method,
                            confidence: c.confidence,
                        });
                    }
                }
                None => result.missing.push(song.clone()),
            }
        }

        debug!(
            "匹配完成: {} 已匹配, {} 可升级, {} 缺失, {} 不可用",
            result.matched.len(),
            result.upgradable.len(),
            result.missing.len(),
            result.unavailable.len()
        );

        result
    }

    fn best_fuzzy<'a>(
        &self,
        song: &RemoteSong,
        tracks: &[PreparedTrack<'a>],
    ) -> Option<Candidate<'a>> {
        let song_name = normalize(&song.name);
        if song_name.is_empty() {
            return None;
        }
        let song_artists: Vec<String> = song
            .artists
            .iter()
            .map(|a| normalize_artist(&a.name))
            .filter(|a| !a.is_empty())
            .collect();
        if song_artists.is_empty() {
            return None;
        }

        let mut best: Option<Candidate<'a>> = None;
        for prepared in tracks {
            let name_score = Self::name_confidence(&song_name, &prepared.name);
            if name_score == 0.0 {
                continue;
            }
            let artist_score = Self::artist_confidence(&prepared.artist, &song_artists);
            if artist_score == 0.0 {
                continue;
            }

            let confidence = (name_score + artist_score) / 2.0;
            // 同分时保留路径靠前的曲目（tracks 已按路径排序）
            if best.map_or(true, |b| confidence > b.confidence) {
                best = Some(Candidate {
                    track: prepared.track,
                    method: MatchMethod::Fuzzy,
                    confidence,
                });
            }
        }

        best.filter(|c| c.confidence > Self::ACCEPT_THRESHOLD)
            .map(|mut c| {
                if c.confidence >= Self::EXACT_THRESHOLD {
                    c.method = MatchMethod::Exact;
                }
                c
            })
    }

    /// 歌名置信度，0 表示不匹配
    pub fn name_confidence(a: &str, b: &str) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }

        let (a_len, b_len) = (a.chars().count(), b.chars().count());
        let (shorter, longer, short_len, long_len) = if a_len <= b_len {
            (a, b, a_len, b_len)
        } else {
            (b, a, b_len, a_len)
        };
        if longer.contains(shorter) {
            let ratio = short_len as f64 / long_len as f64;
            if ratio > Self::CONTAINMENT_RATIO {
                return 0.85 + ratio * 0.1;
            }
        }

        Self::fuzzy_score(a, b)
    }

    /// 歌手置信度：取与任一远程歌手的最佳得分，0 表示不匹配
    pub fn artist_confidence(local: &str, remote_artists: &[String]) -> f64 {
        if local.is_empty() {
            return 0.0;
        }
        remote_artists
            .iter()
            .filter(|r| !r.is_empty())
            .map(|remote| {
                if local == remote {
                    1.0
                } else if local.contains(remote.as_str()) || remote.contains(local) {
                    Self::ARTIST_CONTAINMENT_SCORE
                } else {
                    Self::fuzzy_score(local, remote)
                }
            })
            .fold(0.0, f64::max)
    }

    fn fuzzy_score(a: &str, b: &str) -> f64 {
        let sim = similarity(a, b);
        if sim > Self::FUZZY_THRESHOLD {
            sim
        } else {
            0.0
        }
    }
}

fn prepare<'a>(tracks: &[&'a LocalTrack]) -> Vec<PreparedTrack<'a>> {
    tracks
        .iter()
        .map(|&track| PreparedTrack {
            track,
            name: normalize(&track.name),
            // 占位歌手不参与模糊匹配
            artist: if track.artist == UNKNOWN_ARTIST {
                String::new()
            } else {
                normalize_artist(&track.artist)
            },
        })
        .collect()
}
