use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ChunkingConfig;
use crate::parser::{BBox, Role, StructuralUnit, UnitKind};

pub const DEFAULT_PLAIN_HEADING: &str = "Introduction";
pub const DEFAULT_LAYOUT_HEADING: &str = "Page Content";
pub const HEADING_CHUNK_LABEL: &str = "Section Hdr";

/// 检索单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub heading: String,
    pub content: String,
    pub full_content: Option<String>,
    pub page: u32,
    pub bbox: Option<BBox>,
    pub kind: UnitKind,
    pub source: String,
}

pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Layout-aware when the first unit carries a bbox, plain-flow otherwise.
    pub fn chunk(&self, units: &[StructuralUnit]) -> Vec<Chunk> {
        let chunks = match units.first() {
            None => Vec::new(),
            Some(first) if first.bbox.is_some() => self.chunk_layout(units),
            Some(_) => self.chunk_plain(units),
        };
        debug!("{} units -> {} chunks", units.len(), chunks.len());
        chunks
    }

    /// 1:1; headings become their own chunk and label what follows.
    fn chunk_layout(&self, units: &[StructuralUnit]) -> Vec<Chunk> {
        let mut heading = DEFAULT_LAYOUT_HEADING.to_string();
        let mut chunks = Vec::with_capacity(units.len());

        for unit in units {
            if unit.role == Role::Heading {
                heading = unit.text.clone();
                chunks.push(Chunk {
                    heading: HEADING_CHUNK_LABEL.to_string(),
                    content: unit.text.clone(),
                    full_content: None,
                    page: unit.page,
                    bbox: unit.bbox,
                    kind: UnitKind::Heading,
                    source: unit.source.clone(),
                });
                continue;
            }

            chunks.push(Chunk {
                heading: heading.clone(),
                content: unit.text.clone(),
                full_content: unit.full_content.clone(),
                page: unit.page,
                bbox: unit.bbox,
                kind: unit.kind,
                source: unit.source.clone(),
            });
        }

        chunks
    }

    fn chunk_plain(&self, units: &[StructuralUnit]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut heading = DEFAULT_PLAIN_HEADING.to_string();
        let mut page = units.first().map(|u| u.page).unwrap_or(1);
        let mut buffer: Vec<&str> = Vec::new();
        let mut source = units.first().map(|u| u.source.as_str()).unwrap_or("");

        for unit in units {
            if unit.role == Role::Heading {
                self.flush(&mut buffer, &heading, page, source, &mut chunks);
                heading = unit.text.clone();
                page = unit.page;
                source = unit.source.as_str();
                continue;
            }
            if buffer.is_empty() {
                source = unit.source.as_str();
            }
            buffer.push(unit.text.as_str());
        }
        self.flush(&mut buffer, &heading, page, source, &mut chunks);

        chunks
    }

    fn flush(&self, buffer: &mut Vec<&str>, heading: &str, page: u32, source: &str, chunks: &mut Vec<Chunk>) {
        let text = buffer.join(" ");
        buffer.clear();

        let words: Vec<&str> = text.split_whitespace().collect();
        for window in self.windows(words.len()) {
            chunks.push(Chunk {
                heading: heading.to_string(),
                content: words[window].join(" "),
                full_content: None,
                page,
                bbox: None,
                kind: UnitKind::Text,
                source: source.to_string(),
            });
        }
    }

    /// Word ranges of `chunk_size` advancing by `chunk_size - overlap`,
    /// ending with the first window that reaches `len`.
    pub fn windows(&self, len: usize) -> Vec<std::ops::Range<usize>> {
        let step = self.config.chunk_size - self.config.overlap;
        let mut ranges = Vec::new();
        let mut start = 0;

        while start < len {
            let end = (start + self.config.chunk_size).min(len);
            ranges.push(start..end);
            if end == len {
                break;
            }
            start += step;
        }
        ranges
    }
}
