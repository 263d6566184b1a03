//! 加密音频容器解码
//!
//! 容器布局（整数均为小端）：
//!
//! ```text
//! magic(8) gap(2) key_len(4) key[key_len] meta_len(4) meta[meta_len]
//! crc(4) gap(5) image_len(4) image[image_len] audio[..]
//! ```
//!
//! 密钥块经 XOR + AES-128-ECB 包装出 RC4 密钥，音频块使用该密钥生成的
//! 置换表做逐字节异或。元数据块经 XOR + base64 + AES-128-ECB 包装为 JSON。

use crate::error::CodecError;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const AES_BLOCK: usize = 16;

/// 解密后音频的编码格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Flac,
}

impl AudioFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "flac" => Some(AudioFormat::Flac),
            _ => None,
        }
    }
}

/// 根据魔数判断音频格式，无法识别时按 mp3 处理
pub fn detect_format(audio: &[u8]) -> AudioFormat {
    if audio.starts_with(b"fLaC") {
        return AudioFormat::Flac;
    }
    if audio.starts_with(b"ID3") {
        return AudioFormat::Mp3;
    }
    // MPEG 帧同步：11 个 1
    if audio.len() >= 2 && audio[0] == 0xFF && audio[1] & 0xE0 == 0xE0 {
        return AudioFormat::Mp3;
    }
    AudioFormat::Mp3
}

/// 歌手（名称 + 远程 ID）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub name: String,
    pub id: Option<u64>,
}

/// 容器内嵌的曲目元数据
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedTrackMetadata {
    pub music_id: Option<u64>,
    pub title: String,
    pub artists: Vec<ArtistRef>,
    pub album: Option<String>,
    pub album_id: Option<u64>,
    /// 码率（bps）
    pub bitrate: Option<u64>,
    pub duration_ms: Option<u64>,
    pub format: Option<AudioFormat>,
}

impl DecryptedTrackMetadata {
    /// 多个歌手以 "/" 连接
    pub fn artist_line(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.trim())
            .filter(|n| !n.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// 标题和歌手都存在才可直接用于识别
    pub fn is_usable(&self) -> bool {
        !self.title.trim().is_empty() && !self.artist_line().is_empty()
    }

    pub fn bitrate_kbps(&self) -> Option<u32> {
        self.bitrate.map(|bps| (bps / 1000) as u32)
    }

    fn from_json(json: &[u8]) -> Result<Self, CodecError> {
        let raw: RawMetadata = serde_json::from_slice(json)
            .map_err(|e| CodecError::MetadataDecode(format!("JSON 解析失败: {}", e)))?;

        let artists = raw
            .artist
            .unwrap_or_default()
            .into_iter()
            .filter_map(|pair| {
                let name = pair.first()?.as_str()?.to_string();
                let id = pair.get(1).and_then(id_from_value);
                Some(ArtistRef { name, id })
            })
            .collect();

        Ok(Self {
            music_id: raw.music_id.as_ref().and_then(id_from_value),
            title: raw.music_name.unwrap_or_default(),
            artists,
            album: raw.album.filter(|a| !a.trim().is_empty()),
            album_id: raw.album_id.as_ref().and_then(id_from_value),
            bitrate: raw.bitrate,
            duration_ms: raw.duration,
            format: raw.format.as_deref().and_then(AudioFormat::parse),
        })
    }

    fn to_json(&self) -> Value {
        let artist: Vec<Value> = self
            .artists
            .iter()
            .map(|a| serde_json::json!([a.name, a.id]))
            .collect();
        serde_json::json!({
            "musicId": self.music_id,
            "musicName": self.title,
            "artist": artist,
            "album": self.album,
            "albumId": self.album_id,
            "bitrate": self.bitrate,
            "duration": self.duration_ms,
            "format": self.format.map(AudioFormat::as_str),
        })
    }
}

/// 容器中的元数据 JSON，ID 可能是数字也可能是字符串
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    #[serde(default)]
    music_id: Option<Value>,
    #[serde(default)]
    music_name: Option<String>,
    #[serde(default)]
    artist: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    album_id: Option<Value>,
    #[serde(default)]
    bitrate: Option<u64>,
    #[serde(default)]
    duration: Option<u64>,
    #[serde(default)]
    format: Option<String>,
}

fn id_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 解码结果
#[derive(Debug, Clone)]
pub struct DecodedContainer {
    pub audio: Vec<u8>,
    pub metadata: Option<DecryptedTrackMetadata>,
    /// 优先取元数据声明的格式，否则按魔数判断
    pub format: AudioFormat,
}

/// 容器解码器
///
/// 无内部状态，可在任意线程并行使用。
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerCodec;

/// 按布局切分后的各段
struct Sections<'a> {
    key_block: &'a [u8],
    meta_block: &'a [u8],
    /// 仅在完整解析时存在
    audio: Option<&'a [u8]>,
}

impl ContainerCodec {
    pub const MAGIC: [u8; 8] = *b"CTENFDAM";
    const CORE_KEY: [u8; 16] = *b"hzHRAmso5kInbaxW";
    const META_KEY: [u8; 16] = *b"#14ljk_!\\]&0U<'(";
    const KEY_XOR: u8 = 0x64;
    const META_XOR: u8 = 0x63;
    const KEY_PREFIX: &'static [u8] = b"neteasecloudmusic";
    const META_PREFIX: &'static [u8] = b"163 key(Don't modify):";
    const META_JSON_PREFIX: &'static [u8] = b"music:";

    pub fn new() -> Self {
        Self
    }

    /// 是否以容器魔数开头
    pub fn is_container(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(&Self::MAGIC)
    }

    /// 完整解码：恢复音频明文，元数据失败时返回 None 而不报错
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedContainer, CodecError> {
        let sections = Self::split(bytes, true)?;
        let rc4_key = self.unwrap_key(sections.key_block)?;

        let mut audio = sections.audio.unwrap_or_default().to_vec();
        apply_keystream(&rc4_key, &mut audio);

        let metadata = self.metadata_or_none(sections.meta_block);
        let format = metadata
            .as_ref()
            .and_then(|m| m.format)
            .unwrap_or_else(|| detect_format(&audio));

        Ok(DecodedContainer {
            audio,
            metadata,
            format,
        })
    }

    /// 只解析文件头部读取元数据，不触碰音频数据
    ///
    /// `prefix` 不够长时返回 [`CodecError::Truncated`]，`needed` 为需要读取的字节数。
    pub fn probe_metadata(
        &self,
        prefix: &[u8],
    ) -> Result<Option<DecryptedTrackMetadata>, CodecError> {
        let sections = Self::split(prefix, false)?;
        Ok(self.metadata_or_none(sections.meta_block))
    }

    /// 构造容器（与 decode 使用相同的内置密钥），CRC 写 0，封面为空
    pub fn encode(
        &self,
        audio: &[u8],
        rc4_key: &[u8],
        metadata: Option<&DecryptedTrackMetadata>,
    ) -> Vec<u8> {
        let mut key_plain = Self::KEY_PREFIX.to_vec();
        key_plain.extend_from_slice(rc4_key);
        let mut key_block = aes_ecb_encrypt(&Self::CORE_KEY, &key_plain);
        xor_in_place(&mut key_block, Self::KEY_XOR);

        let meta_block = match metadata {
            Some(meta) => {
                let mut plain = Self::META_JSON_PREFIX.to_vec();
                plain.extend_from_slice(meta.to_json().to_string().as_bytes());
                let encrypted = aes_ecb_encrypt(&Self::META_KEY, &plain);
                let mut block = Self::META_PREFIX.to_vec();
                block.extend_from_slice(BASE64.encode(encrypted).as_bytes());
                xor_in_place(&mut block, Self::META_XOR);
                block
            }
            None => Vec::new(),
        };

        let mut encrypted_audio = audio.to_vec();
        if !rc4_key.is_empty() {
            apply_keystream(rc4_key, &mut encrypted_audio);
        }

        let mut out = Vec::with_capacity(
            8 + 2 + 4 + key_block.len() + 4 + meta_block.len() + 9 + 4 + audio.len(),
        );
        out.extend_from_slice(&Self::MAGIC);
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&(key_block.len() as u32).to_le_bytes());
        out.extend_from_slice(&key_block);
        out.extend_from_slice(&(meta_block.len() as u32).to_le_bytes());
        out.extend_from_slice(&meta_block);
        out.extend_from_slice(&[0u8; 9]);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&encrypted_audio);
        out
    }

    fn split(bytes: &[u8], full: bool) -> Result<Sections<'_>, CodecError> {
        let mut cursor = Cursor::new(bytes);

        let magic = cursor.take(Self::MAGIC.len())?;
        if magic != Self::MAGIC {
            return Err(CodecError::ContainerFormat {
                reason: "魔数不匹配".to_string(),
            });
        }
        cursor.skip(2)?;

        let key_len = cursor.read_u32()? as usize;
        let key_block = cursor.take(key_len)?;
        let meta_len = cursor.read_u32()? as usize;
        let meta_block = cursor.take(meta_len)?;

        if !full {
            return Ok(Sections {
                key_block,
                meta_block,
                audio: None,
            });
        }

        // CRC(4) + gap(5)
        cursor.skip(9)?;
        let image_len = cursor.read_u32()? as usize;
        cursor.skip(image_len)?;

        Ok(Sections {
            key_block,
            meta_block,
            audio: Some(cursor.rest()),
        })
    }

    fn unwrap_key(&self, key_block: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut data = key_block.to_vec();
        xor_in_place(&mut data, Self::KEY_XOR);

        let plain = aes_ecb_decrypt(&Self::CORE_KEY, &data).map_err(CodecError::KeyDecryption)?;
        let key = plain.strip_prefix(Self::KEY_PREFIX).ok_or_else(|| {
            CodecError::KeyDecryption("密钥前缀不匹配".to_string())
        })?;
        if key.is_empty() {
            return Err(CodecError::KeyDecryption("RC4 密钥为空".to_string()));
        }
        Ok(key.to_vec())
    }

    fn metadata_or_none(&self, meta_block: &[u8]) -> Option<DecryptedTrackMetadata> {
        if meta_block.is_empty() {
            return None;
        }
        match self.unwrap_metadata(meta_block) {
            Ok(meta) => Some(meta),
            Err(e) => {
                debug!("忽略容器元数据: {}", e);
                None
            }
        }
    }

    fn unwrap_metadata(&self, meta_block: &[u8]) -> Result<DecryptedTrackMetadata, CodecError> {
        let mut data = meta_block.to_vec();
        xor_in_place(&mut data, Self::META_XOR);

        let encoded = data
            .strip_prefix(Self::META_PREFIX)
            .ok_or_else(|| CodecError::MetadataDecode("元数据前缀不匹配".to_string()))?;
        let encrypted = BASE64
            .decode(encoded)
            .map_err(|e| CodecError::MetadataDecode(format!("base64 解码失败: {}", e)))?;
        let plain =
            aes_ecb_decrypt(&Self::META_KEY, &encrypted).map_err(CodecError::MetadataDecode)?;
        let json = plain
            .strip_prefix(Self::META_JSON_PREFIX)
            .ok_or_else(|| CodecError::MetadataDecode("JSON 前缀不匹配".to_string()))?;

        DecryptedTrackMetadata::from_json(json)
    }
}

/// 顺序读取器，越界时报告所需长度
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated {
            needed: usize::MAX,
            available: self.buf.len(),
        })?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated {
                needed: end,
                available: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.take(n).map(|_| ())
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

fn xor_in_place(data: &mut [u8], mask: u8) {
    for b in data.iter_mut() {
        *b ^= mask;
    }
}

/// 由 RC4 密钥调度算法生成 256 字节置换表
fn key_box(key: &[u8]) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = i as u8;
    }
    let mut j: u8 = 0;
    for i in 0..256 {
        j = j.wrapping_add(table[i]).wrapping_add(key[i % key.len()]);
        table.swap(i, j as usize);
    }
    table
}

/// 该格式特有的密钥流：第 i 字节只取决于 i mod 256，与标准 RC4 不同
fn apply_keystream(key: &[u8], data: &mut [u8]) {
    let table = key_box(key);
    let mut stream = [0u8; 256];
    for (i, out) in stream.iter_mut().enumerate() {
        let j = (i + 1) & 0xff;
        let tj = table[j] as usize;
        let k = (tj + table[(tj + j) & 0xff] as usize) & 0xff;
        *out = table[k];
    }
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= stream[i & 0xff];
    }
}

fn aes_ecb_decrypt(key: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, String> {
    if data.is_empty() || data.len() % AES_BLOCK != 0 {
        return Err(format!("密文长度 {} 不是块大小的整数倍", data.len()));
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = data.to_vec();
    for chunk in out.chunks_exact_mut(AES_BLOCK) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }

    // PKCS#7
    let pad = out[out.len() - 1] as usize;
    if pad == 0 || pad > AES_BLOCK || out[out.len() - pad..].iter().any(|&b| b as usize != pad) {
        return Err("PKCS#7 填充无效".to_string());
    }
    out.truncate(out.len() - pad);
    Ok(out)
}

fn aes_ecb_encrypt(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let pad = AES_BLOCK - data.len() % AES_BLOCK;
    let mut out = data.to_vec();
    out.extend(std::iter::repeat(pad as u8).take(pad));

    let cipher = Aes128::new(GenericArray::from_slice(key));
    for chunk in out.chunks_exact_mut(AES_BLOCK) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> DecryptedTrackMetadata {
        DecryptedTrackMetadata {
            music_id: Some(185811),
            title: "稻香".to_string(),
            artists: vec![ArtistRef {
                name: "周杰伦".to_string(),
                id: Some(6452),
            }],
            album: Some("魔杰座".to_string()),
            album_id: Some(18896),
            bitrate: Some(999_000),
            duration_ms: Some(223_000),
            format: Some(AudioFormat::Flac),
        }
    }

    fn sample_audio(len: usize) -> Vec<u8> {
        let mut audio = b"fLaC".to_vec();
        audio.extend((0..len).map(|i| (i * 31 % 251) as u8));
        audio
    }

    #[test]
    fn test_round_trip_audio() {
        let codec = ContainerCodec::new();
        let audio = sample_audio(5000);
        let key = b"123456789012345678901234567890123456";
        let bytes = codec.encode(&audio, key, Some(&sample_metadata()));

        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.audio, audio);
        assert_eq!(decoded.metadata, Some(sample_metadata()));
        assert_eq!(decoded.format, AudioFormat::Flac);
    }

    #[test]
    fn test_audio_is_obfuscated() {
        let codec = ContainerCodec::new();
        let audio = sample_audio(600);
        let bytes = codec.encode(&audio, b"E7fT49x7dof9OKCgg9cdvhEuezy3iZCL", None);
        assert!(!bytes.windows(audio.len()).any(|w| w == audio.as_slice()));
    }

    #[test]
    fn test_missing_metadata_is_not_fatal() {
        let codec = ContainerCodec::new();
        let audio = vec![0xFF, 0xFB, 0x90, 0x00, 1, 2, 3];
        let bytes = codec.encode(&audio, b"key", None);
        let decoded = codec.decode(&bytes).unwrap();
        assert!(decoded.metadata.is_none());
        assert_eq!(decoded.format, AudioFormat::Mp3);
        assert_eq!(decoded.audio, audio);
    }

    #[test]
    fn test_corrupt_metadata_degrades_to_none() {
        let codec = ContainerCodec::new();
        let audio = sample_audio(100);
        let mut bytes = codec.encode(&audio, b"key", Some(&sample_metadata()));
        // 破坏元数据前缀
        let key_len = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]) as usize;
        let meta_start = 14 + key_len + 4;
        bytes[meta_start] ^= 0xFF;

        let decoded = codec.decode(&bytes).unwrap();
        assert!(decoded.metadata.is_none());
        // 未声明格式时按魔数判断
        assert_eq!(decoded.format, AudioFormat::Flac);
        assert_eq!(decoded.audio, audio);
    }

    #[test]
    fn test_bad_magic() {
        let codec = ContainerCodec::new();
        let mut bytes = codec.encode(&sample_audio(10), b"key", None);
        bytes[0] = b'X';
        let err = codec.decode(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::ContainerFormat { .. }));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_truncated_buffer() {
        let codec = ContainerCodec::new();
        let bytes = codec.encode(&sample_audio(10), b"key", Some(&sample_metadata()));
        let err = codec.decode(&bytes[..20]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_corrupt_key_block() {
        let codec = ContainerCodec::new();
        let mut bytes = codec.encode(&sample_audio(10), b"key", None);
        bytes[14] ^= 0x01;
        let err = codec.decode(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::KeyDecryption(_)));
    }

    #[test]
    fn test_probe_reports_needed_length() {
        let codec = ContainerCodec::new();
        let bytes = codec.encode(&sample_audio(4000), b"key", Some(&sample_metadata()));

        let needed = match codec.probe_metadata(&bytes[..32]) {
            Err(CodecError::Truncated { needed, .. }) => needed,
            other => panic!("unexpected: {:?}", other),
        };
        assert!(needed > 32);

        // 读到所需长度后可能还需要元数据段，再重试一次
        let mut len = needed;
        let meta = loop {
            match codec.probe_metadata(&bytes[..len]) {
                Ok(meta) => break meta,
                Err(CodecError::Truncated { needed, .. }) => len = needed,
                Err(e) => panic!("unexpected: {:?}", e),
            }
        };
        assert_eq!(meta, Some(sample_metadata()));
        assert!(len < bytes.len());
    }

    #[test]
    fn test_metadata_accepts_string_ids() {
        let json = br#"{"musicId":"123","musicName":"x","artist":[["a","7"],["b",8]],"format":"MP3","bitrate":320000}"#;
        let meta = DecryptedTrackMetadata::from_json(json).unwrap();
        assert_eq!(meta.music_id, Some(123));
        assert_eq!(meta.artists[0].id, Some(7));
        assert_eq!(meta.artists[1].id, Some(8));
        assert_eq!(meta.format, Some(AudioFormat::Mp3));
        assert_eq!(meta.bitrate_kbps(), Some(320));
        assert_eq!(meta.artist_line(), "a/b");
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(b"fLaC\0\0"), AudioFormat::Flac);
        assert_eq!(detect_format(b"ID3\x03"), AudioFormat::Mp3);
        assert_eq!(detect_format(&[0xFF, 0xFB]), AudioFormat::Mp3);
        assert_eq!(detect_format(b"RIFF"), AudioFormat::Mp3);
        assert_eq!(detect_format(&[]), AudioFormat::Mp3);
    }

    #[test]
    fn test_keystream_is_total_and_symmetric() {
        let all: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        let mut data = all.clone();
        apply_keystream(b"k", &mut data);
        apply_keystream(b"k", &mut data);
        assert_eq!(data, all);
    }
}
