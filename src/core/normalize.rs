//! 歌名/歌手名归一化与相似度

use regex::Regex;
use std::sync::OnceLock;

const BRACKETS: [(char, char); 4] = [('(', ')'), ('（', '）'), ('[', ']'), ('【', '】')];

fn feat_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(^|[^a-z0-9])(?:featuring|feat|ft)([^a-z0-9]|$)").ok())
        .as_ref()
}

/// 归一化歌名：转小写、去掉括号段、去掉空白，只保留 ASCII 字母数字和 CJK 表意文字
pub fn normalize(s: &str) -> String {
    let lowered = s.to_lowercase();
    keep_word_chars(&strip_brackets(&lowered))
}

/// 归一化歌手名，额外去掉 feat. / ft. 标记
pub fn normalize_artist(s: &str) -> String {
    let lowered = s.to_lowercase();
    let stripped = strip_brackets(&lowered);
    let without_feat = match feat_pattern() {
        // 前后字符原样保留，中文歌手名后紧跟 feat 也能去掉
        Some(re) => re.replace_all(&stripped, "${1} ${2}").into_owned(),
        None => stripped,
    };
    keep_word_chars(&without_feat)
}

/// 去掉括号及其中内容，未闭合的括号吞掉其后全部内容
fn strip_brackets(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut stack: Vec<char> = Vec::new();
    for c in s.chars() {
        if let Some(&(_, close)) = BRACKETS.iter().find(|(open, _)| *open == c) {
            stack.push(close);
            continue;
        }
        if stack.last() == Some(&c) {
            stack.pop();
            continue;
        }
        if stack.is_empty() {
            out.push(c);
        }
    }
    out
}

fn keep_word_chars(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || is_cjk_ideograph(*c))
        .collect()
}

/// CJK 统一表意文字及扩展区、兼容表意文字
fn is_cjk_ideograph(c: char) -> bool {
    matches!(
        c,
        '\u{3400}'..='\u{4DBF}'
            | '\u{4E00}'..='\u{9FFF}'
            | '\u{F900}'..='\u{FAFF}'
            | '\u{20000}'..='\u{2A6DF}'
            | '\u{2A700}'..='\u{2EBEF}'
            | '\u{2F800}'..='\u{2FA1F}'
            | '\u{30000}'..='\u{3134F}'
    )
}

/// 字符级编辑距离
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// 归一化编辑距离相似度，范围 [0, 1]
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("稻香"), "稻香");
        assert_eq!(normalize("Love Story (Taylor's Version)"), "lovestory");
        assert_eq!(normalize("晴天（Live）"), "晴天");
        assert_eq!(normalize("告白气球 [伴奏]"), "告白气球");
        assert_eq!(normalize("Hello, World! 2"), "helloworld2");
        assert_eq!(normalize("【官方】七里香"), "七里香");
        // 假名、谚文和带重音的拉丁字母不保留
        assert_eq!(normalize("千本桜 ボカロ"), "千本桜");
        assert_eq!(normalize("사랑 Love"), "love");
        assert_eq!(normalize("Café 2"), "caf2");
    }

    #[test]
    fn test_normalize_idempotent() {
        let samples = [
            "稻香",
            "Love Story (Taylor's Version)",
            "a (b [c) d] e",
            "unclosed (bracket",
            "İstanbul ÉTÉ",
            "  多  空格 ",
            "",
            ")))(((",
            "Ⅻ ½ ①",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "input: {:?}", s);
        }
    }

    #[test]
    fn test_normalize_artist() {
        assert_eq!(normalize_artist("周杰伦 feat. 费玉清"), "周杰伦费玉清");
        assert_eq!(normalize_artist("Eminem ft. Rihanna"), "eminemrihanna");
        assert_eq!(normalize_artist("Taylor Swift"), "taylorswift");
        assert_eq!(normalize_artist("A (feat. B)"), "a");
        assert_eq!(normalize_artist("周杰伦feat.费玉清"), "周杰伦费玉清");
        assert_eq!(normalize_artist("周杰伦feat费玉清"), "周杰伦费玉清");
        assert_eq!(normalize_artist("Featuring X"), "x");
        // 单词内部的 ft / feat 不算标记
        assert_eq!(normalize_artist("Daft Punk"), "daftpunk");
        assert_eq!(normalize_artist("Feather"), "feather");
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("稻香", "稻草"), 1);
    }

    #[test]
    fn test_similarity_symmetric() {
        let pairs = [
            ("kitten", "sitting"),
            ("稻香", "稻草香"),
            ("", "x"),
            ("abc", "abd"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a));
        }
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }
}
