//! 音频标签读取
//!
//! 通过 lofty 读取标签，只解析文件头尾的标签区域和流属性，不会读入整个音频流。

use lofty::config::ParseOptions;
use lofty::error::LoftyError;
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use std::io::Cursor;
use std::path::Path;

/// 标签中读出的曲目信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// 码率（kbps）
    pub bitrate: Option<u32>,
}

impl TagInfo {
    /// 标题和歌手都存在才可用于识别
    pub fn identity(&self) -> Option<(&str, &str)> {
        match (self.title.as_deref(), self.artist.as_deref()) {
            (Some(title), Some(artist)) => Some((title, artist)),
            _ => None,
        }
    }
}

pub fn read_from_path(path: &Path) -> Result<TagInfo, LoftyError> {
    let tagged = Probe::open(path)?
        .options(ParseOptions::new())
        .guess_file_type()?
        .read()?;
    Ok(collect(&tagged))
}

/// 从内存中的音频读取（用于解密后的容器音频）
pub fn read_from_bytes(audio: &[u8]) -> Result<TagInfo, LoftyError> {
    let tagged = Probe::new(Cursor::new(audio))
        .options(ParseOptions::new())
        .guess_file_type()?
        .read()?;
    Ok(collect(&tagged))
}

fn collect(tagged: &TaggedFile) -> TagInfo {
    let properties = tagged.properties();
    let mut info = TagInfo {
        bitrate: properties.audio_bitrate().or(properties.overall_bitrate()),
        ..Default::default()
    };

    if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
        info.title = tag.title().and_then(|s| clean(&s));
        info.artist = tag.artist().and_then(|s| clean(&s));
        info.album = tag.album().and_then(|s| clean(&s));
    }

    info
}

fn clean(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_matches('\0');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
