use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_MIN_CHARS: usize = 50;

/// 文档类型：数字版 / 扫描版 / 混合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Digital,
    Scanned,
    Mixed,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Classification::Digital => "DIGITAL",
            Classification::Scanned => "SCANNED",
            Classification::Mixed => "MIXED",
        };
        f.write_str(label)
    }
}

/// A page counts as text-bearing when its trimmed text exceeds `min_chars`.
pub fn classify<S: AsRef<str>>(page_texts: &[S], min_chars: usize) -> Classification {
    let text_pages = page_texts
        .iter()
        .filter(|text| text.as_ref().trim().chars().count() > min_chars)
        .count();

    if text_pages == 0 {
        Classification::Scanned
    } else if text_pages == page_texts.len() {
        Classification::Digital
    } else {
        Classification::Mixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_text() -> String {
        "x".repeat(DEFAULT_MIN_CHARS + 1)
    }

    #[test]
    fn no_text_pages_is_scanned() {
        let pages = vec![String::new(), "  short  ".to_string(), "y".repeat(DEFAULT_MIN_CHARS)];
        assert_eq!(classify(&pages, DEFAULT_MIN_CHARS), Classification::Scanned);
    }

    #[test]
    fn all_text_pages_is_digital() {
        let pages = vec![long_text(), long_text(), long_text()];
        assert_eq!(classify(&pages, DEFAULT_MIN_CHARS), Classification::Digital);
    }

    #[test]
    fn some_text_pages_is_mixed() {
        let pages = vec![long_text(), String::new(), "tiny".to_string()];
        assert_eq!(classify(&pages, DEFAULT_MIN_CHARS), Classification::Mixed);
    }

    #[test]
    fn whitespace_padding_does_not_count() {
        let padded = format!("   {}   ", "z".repeat(DEFAULT_MIN_CHARS));
        assert_eq!(classify(&[padded], DEFAULT_MIN_CHARS), Classification::Scanned);
    }

    #[test]
    fn empty_document_is_scanned() {
        let pages: Vec<String> = Vec::new();
        assert_eq!(classify(&pages, DEFAULT_MIN_CHARS), Classification::Scanned);
    }
}
