use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// 幻灯片编号标记，如 "#12"
static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#\d+").unwrap());
static DISALLOWED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9가-힣\s]").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// OCR 输出的固定后处理
///
/// NFC 合成 -> 去掉 `#数字` 标记 -> 只保留英文字母、数字、韩文音节和空白 -> 合并空白
pub fn normalize_text(raw: &str) -> String {
    let composed: String = raw.nfc().collect();
    let without_markers = MARKER_RE.replace_all(&composed, "");
    let cleaned = DISALLOWED_RE.replace_all(&without_markers, "");
    WHITESPACE_RE.replace_all(&cleaned, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_markers_and_punctuation() {
        assert_eq!(normalize_text("#12 시작 화면, 안내!"), "시작 화면 안내");
        assert_eq!(normalize_text("Chapter #3: Intro"), "Chapter Intro");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize_text("  목차 \n\t 입니다  "), "목차 입니다");
    }

    #[test]
    fn test_composes_decomposed_hangul() {
        // ᄀ + ᅡ (조합형 자모)
        let decomposed = "\u{1100}\u{1161}";
        assert_eq!(normalize_text(decomposed), "가");
    }

    #[test]
    fn test_empty_and_symbol_only() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("※ ··· ★"), "");
    }
}
