use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::parser::{BBox, UnitKind};

/// chunks 表中的一行
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub heading: String,
    pub content: String,
    pub full_content: Option<String>,
    pub page: i64,
    pub bbox: Option<String>,
    pub kind: String,
    pub source: String,
    pub created_at: String,
}

impl StoredChunk {
    pub fn bbox(&self) -> Option<BBox> {
        self.bbox.as_deref().and_then(|b| b.parse().ok())
    }

    pub fn kind(&self) -> Option<UnitKind> {
        self.kind.parse().ok()
    }

    /// Full content when it carries real data, otherwise the search text.
    pub fn display_text(&self) -> &str {
        match self.full_content.as_deref() {
            Some(full) if full.chars().count() > 10 => full,
            _ => &self.content,
        }
    }
}

/// 一条检索结果
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub heading: String,
    /// Full content when present, otherwise the indexed text
    pub text: String,
    pub page: u32,
    pub bbox: Option<BBox>,
    pub kind: Option<UnitKind>,
    pub source: String,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(full: Option<&str>) -> StoredChunk {
        StoredChunk {
            chunk_id: "c1".into(),
            doc_id: "d".into(),
            heading: "h".into(),
            content: "summary".into(),
            full_content: full.map(str::to_string),
            page: 1,
            bbox: Some("1,2,3,4".into()),
            kind: "table".into(),
            source: "layout".into(),
            created_at: String::new(),
        }
    }

    #[test]
    fn short_full_content_is_not_substituted() {
        assert_eq!(row(None).display_text(), "summary");
        assert_eq!(row(Some("| a |")).display_text(), "summary");
        assert_eq!(row(Some("| a | b |\n| 1 | 2 |")).display_text(), "| a | b |\n| 1 | 2 |");
    }

    #[test]
    fn columns_parse_back_into_types() {
        let r = row(None);
        assert_eq!(r.bbox(), Some(BBox::new(1.0, 2.0, 3.0, 4.0)));
        assert_eq!(r.kind(), Some(UnitKind::Table));
    }
}
