//! 音质等级与分类规则
//!
//! 扫描器和匹配器共用同一套分类规则，保证本地音质与在线音质可比较。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 高音质码率阈值（kbps）
pub const HIGH_BITRATE_KBPS: u32 = 256;

/// 音质等级，声明顺序即排序顺序
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    Higher,
    #[serde(alias = "exhigh")]
    High,
    Lossless,
    #[serde(alias = "hi-res")]
    Hires,
    #[serde(alias = "sky")]
    Spatial,
    #[serde(alias = "jyeffect")]
    Dolby,
    #[serde(alias = "jymaster")]
    Master,
}

impl Quality {
    /// 在线音质回退链（从高到低）
    const FALLBACK_CHAIN: [Quality; 3] = [Quality::Lossless, Quality::High, Quality::Standard];

    pub fn rank(self) -> u8 {
        match self {
            Quality::Standard => 0,
            Quality::Higher => 1,
            Quality::High => 2,
            Quality::Lossless => 3,
            Quality::Hires => 4,
            Quality::Spatial => 5,
            Quality::Dolby => 6,
            Quality::Master => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Standard => "standard",
            Quality::Higher => "higher",
            Quality::High => "high",
            Quality::Lossless => "lossless",
            Quality::Hires => "hires",
            Quality::Spatial => "spatial",
            Quality::Dolby => "dolby",
            Quality::Master => "master",
        }
    }

    /// 根据格式和码率判定本地文件音质
    pub fn classify(format: &str, bitrate_kbps: Option<u32>) -> Quality {
        let format = format.to_ascii_lowercase();
        if format == "flac" || format == "wav" {
            return Quality::Lossless;
        }
        match bitrate_kbps {
            Some(rate) if rate >= HIGH_BITRATE_KBPS => Quality::High,
            _ => Quality::Standard,
        }
    }

    /// 计算在线可获取的最佳音质
    ///
    /// 优先目标音质；不可用时按 lossless → high → standard 回退，
    /// 但不会超过目标音质。全部不可用时视为 standard。
    pub fn best_online(available: &[Quality], target: Quality) -> Quality {
        if available.contains(&target) {
            return target;
        }
        Self::FALLBACK_CHAIN
            .into_iter()
            .find(|q| q.rank() <= target.rank() && available.contains(q))
            .unwrap_or(Quality::Standard)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Quality::Standard),
            "higher" => Ok(Quality::Higher),
            "high" | "exhigh" => Ok(Quality::High),
            "lossless" => Ok(Quality::Lossless),
            "hires" | "hi-res" => Ok(Quality::Hires),
            "spatial" | "sky" => Ok(Quality::Spatial),
            "dolby" | "jyeffect" => Ok(Quality::Dolby),
            "master" | "jymaster" => Ok(Quality::Master),
            other => Err(format!("未知音质: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Quality::classify("flac", None), Quality::Lossless);
        assert_eq!(Quality::classify("WAV", Some(128)), Quality::Lossless);
        assert_eq!(Quality::classify("mp3", Some(320)), Quality::High);
        assert_eq!(Quality::classify("mp3", Some(256)), Quality::High);
        assert_eq!(Quality::classify("mp3", Some(192)), Quality::Standard);
        assert_eq!(Quality::classify("m4a", None), Quality::Standard);
    }

    #[test]
    fn test_rank_matches_ordering() {
        let all = [
            Quality::Standard,
            Quality::Higher,
            Quality::High,
            Quality::Lossless,
            Quality::Hires,
            Quality::Spatial,
            Quality::Dolby,
            Quality::Master,
        ];
        for pair in all.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn test_best_online() {
        use Quality::*;
        assert_eq!(Quality::best_online(&[Standard, High, Lossless], Lossless), Lossless);
        assert_eq!(Quality::best_online(&[Standard, High], Lossless), High);
        assert_eq!(Quality::best_online(&[Standard], Lossless), Standard);
        assert_eq!(Quality::best_online(&[], Lossless), Standard);
        // 不超过目标音质
        assert_eq!(Quality::best_online(&[Standard, Lossless], High), Standard);
        assert_eq!(Quality::best_online(&[Lossless, Hires], Hires), Hires);
        assert_eq!(Quality::best_online(&[Lossless], Master), Lossless);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("exhigh".parse::<Quality>(), Ok(Quality::High));
        assert_eq!("JYMASTER".parse::<Quality>(), Ok(Quality::Master));
        assert!("ultra".parse::<Quality>().is_err());
        let q: Quality = serde_json::from_str("\"sky\"").unwrap();
        assert_eq!(q, Quality::Spatial);
        assert_eq!(serde_json::to_string(&Quality::Lossless).unwrap(), "\"lossless\"");
    }
}
