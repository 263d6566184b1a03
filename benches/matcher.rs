//! 模糊匹配基准：远程歌曲数 × 本地曲目数
//!
//! 运行: cargo bench --bench matcher

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use musicsync_lib::core::{CatalogMatcher, Quality, RemoteSong};
use musicsync_lib::db::{LocalTrack, Provenance};
use serde_json::json;

fn remote_songs(count: usize) -> Vec<RemoteSong> {
    (0..count)
        .map(|i| {
            RemoteSong::from_value(&json!({
                "id": i as u64 + 1,
                "name": format!("远程歌曲 {} (Live)", i),
                "artists": [{"name": format!("歌手{}", i % 37)}],
                "availableQualities": ["standard", "exhigh", "lossless"]
            }))
            .unwrap_or_else(|e| panic!("invalid fixture: {}", e))
        })
        .collect()
}

fn local_tracks(count: usize) -> Vec<LocalTrack> {
    let now = Utc::now();
    (0..count)
        .map(|i| LocalTrack {
            path: format!("/music/{:05}.mp3", i),
            // 一半能命中，一半只是相似
            name: if i % 2 == 0 {
                format!("远程歌曲 {}", i)
            } else {
                format!("本地歌曲 {}", i)
            },
            artist: format!("歌手{}", i % 37),
            album: None,
            quality: Quality::High,
            format: "mp3".to_string(),
            file_size: 4_000_000,
            bitrate: Some(320),
            song_id: None,
            source: Provenance::Filename,
            modified_at: now,
        })
        .collect()
}

fn bench_reconcile(c: &mut Criterion) {
    let matcher = CatalogMatcher::new();
    let mut group = c.benchmark_group("reconcile");

    for size in [100usize, 500, 1000] {
        let remote = remote_songs(size);
        let local = local_tracks(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                matcher.reconcile(
                    black_box(&remote),
                    black_box(&local),
                    &[],
                    Quality::Lossless,
                )
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reconcile);
criterion_main!(benches);
