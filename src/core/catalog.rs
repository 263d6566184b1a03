//! 远程曲库歌曲
//!
//! 远程接口返回的是松散的 JSON，这里在边界处统一校验并补齐默认值。

use crate::core::quality::Quality;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteSongError {
    #[error("歌曲数据不是 JSON 对象")]
    NotAnObject,
    #[error("缺少字段: {0}")]
    MissingField(&'static str),
    #[error("字段类型错误: {0}")]
    InvalidField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteArtist {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteAlbum {
    pub id: u64,
    pub name: String,
}

/// 远程曲库中的一首歌
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSong {
    pub id: u64,
    pub name: String,
    pub artists: Vec<RemoteArtist>,
    pub album: RemoteAlbum,
    /// 时长（毫秒）
    pub duration: u64,
    pub available_qualities: Vec<Quality>,
    pub available: bool,
    pub need_vip: bool,
}

impl RemoteSong {
    /// 从接口 JSON 构造，`id` 和 `name` 必须存在，其余字段缺失时取默认值
    pub fn from_value(value: &Value) -> Result<Self, RemoteSongError> {
        let obj = value.as_object().ok_or(RemoteSongError::NotAnObject)?;

        let id = obj
            .get("id")
            .ok_or(RemoteSongError::MissingField("id"))
            .and_then(|v| as_id(v).ok_or(RemoteSongError::InvalidField("id")))?;
        let name = obj
            .get("name")
            .ok_or(RemoteSongError::MissingField("name"))?
            .as_str()
            .ok_or(RemoteSongError::InvalidField("name"))?
            .to_string();

        let artists = obj
            .get("artists")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|a| {
                        let name = a.get("name")?.as_str()?.trim();
                        if name.is_empty() {
                            return None;
                        }
                        Some(RemoteArtist {
                            id: a.get("id").and_then(as_id).unwrap_or(0),
                            name: name.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let album = obj
            .get("album")
            .map(|a| RemoteAlbum {
                id: a.get("id").and_then(as_id).unwrap_or(0),
                name: a
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
            .unwrap_or_default();

        let available_qualities = obj
            .get("availableQualities")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| s.parse::<Quality>().ok())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id,
            name,
            artists,
            album,
            duration: obj.get("duration").and_then(Value::as_u64).unwrap_or(0),
            available_qualities,
            available: obj.get("available").and_then(Value::as_bool).unwrap_or(true),
            need_vip: obj.get("needVip").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    /// 解析歌曲数组，无效条目记录警告后跳过
    pub fn parse_list(value: &Value) -> Vec<Self> {
        let Some(items) = value.as_array() else {
            warn!("远程曲库数据不是数组");
            return Vec::new();
        };

        items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| match Self::from_value(item) {
                Ok(song) => Some(song),
                Err(e) => {
                    warn!("跳过第 {} 首远程歌曲: {}", index, e);
                    None
                }
            })
            .collect()
    }

    pub fn artist_line(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
