pub mod classifier;
pub mod fallback;
pub mod image_analyzer;
pub mod layout;
pub mod rasterizer;
pub mod structural;
pub mod table_parser;

pub use fallback::{FallbackTextExtractor, LopdfTextExtractor, PageTextSource};
pub use image_analyzer::{FigureExtractor, ImageAnalyzer};
pub use layout::{PdfiumLayoutParser, StructuralParser};
pub use rasterizer::{PageRasterizer, PdfiumRasterizer};
pub use structural::StructuralParserAdapter;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Rectangle in page coordinates (PDF points, top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

#[derive(Error, Debug, PartialEq)]
pub enum BBoxParseError {
    #[error("expected 4 comma-separated numbers, got {0}")]
    WrongArity(usize),

    #[error("not a number: '{0}'")]
    NotANumber(String),

    #[error("corners are inverted: {0}")]
    Inverted(String),
}

impl BBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn padded(&self, padding: f32) -> BBox {
        BBox {
            x0: self.x0 - padding,
            y0: self.y0 - padding,
            x1: self.x1 + padding,
            y1: self.y1 + padding,
        }
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x0, self.y0, self.x1, self.y1)
    }
}

impl FromStr for BBox {
    type Err = BBoxParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BBoxParseError::WrongArity(parts.len()));
        }

        let mut coords = [0f32; 4];
        for (slot, part) in coords.iter_mut().zip(&parts) {
            *slot = part
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| BBoxParseError::NotANumber(part.to_string()))?;
        }

        let bbox = BBox::new(coords[0], coords[1], coords[2], coords[3]);
        if bbox.x0 > bbox.x1 || bbox.y0 > bbox.y1 {
            return Err(BBoxParseError::Inverted(s.trim().to_string()));
        }
        Ok(bbox)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Heading,
    Content,
    Table,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Text,
    Table,
    Heading,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Text => "text",
            UnitKind::Table => "table",
            UnitKind::Heading => "heading",
        }
    }
}

impl FromStr for UnitKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(UnitKind::Text),
            "table" => Ok(UnitKind::Table),
            "heading" => Ok(UnitKind::Heading),
            other => Err(anyhow::anyhow!("unknown unit kind: {}", other)),
        }
    }
}

/// 一个原子提取单元（段落、标题或表格）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralUnit {
    /// Search-optimized text; a summary for tables
    pub text: String,
    /// Lossless representation, tables only; never embedded
    pub full_content: Option<String>,
    pub role: Role,
    pub page: u32,
    pub bbox: Option<BBox>,
    pub kind: UnitKind,
    pub source: String,
    pub confidence: Option<f32>,
}

impl StructuralUnit {
    pub fn content(text: impl Into<String>, page: u32, source: &str) -> Self {
        Self {
            text: text.into(),
            full_content: None,
            role: Role::Content,
            page,
            bbox: None,
            kind: UnitKind::Text,
            source: source.to_string(),
            confidence: None,
        }
    }

    pub fn error(text: impl Into<String>, page: u32, source: &str) -> Self {
        Self {
            role: Role::Error,
            ..Self::content(text, page, source)
        }
    }

    pub fn is_table(&self) -> bool {
        self.kind == UnitKind::Table
    }
}

/// 表格元数据（独立于检索索引）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub page: u32,
    pub caption: Option<String>,
    pub bbox: Option<BBox>,
    pub headers: Vec<String>,
    pub data: Vec<Vec<String>>,
    pub rows: usize,
    pub cols: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Figure,
    ScannedPage,
}

/// 图片元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: String,
    pub path: Option<String>,
    pub page: u32,
    pub caption: String,
    pub kind: ImageKind,
    pub width: Option<u32>,
    pub height: Option<u32>,
}
