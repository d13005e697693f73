use anyhow::{Context, Result};
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

use super::rasterizer::create_pdfium;
use super::table_parser::{TableGrid, TableParser};
use super::BBox;

pub const LABEL_TEXT: &str = "text";
pub const LABEL_SECTION_HEADER: &str = "section_header";
pub const LABEL_TITLE: &str = "title";
pub const LABEL_TABLE: &str = "table";

/// Raw layout element as reported by a layout-aware parser.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutElement {
    pub page: u32,
    pub label: String,
    pub text: String,
    pub bbox: BBox,
    pub table: Option<TableGrid>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutDocument {
    pub elements: Vec<LayoutElement>,
}

/// 版面解析能力（外部黑盒）
pub trait StructuralParser: Send + Sync {
    fn parse(&self, pdf_path: &Path) -> Result<LayoutDocument>;
}

/// Lines of text reconstructed from pdfium segments, top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedLine {
    pub text: String,
    pub bbox: BBox,
}

pub struct PdfiumLayoutParser {
    lib_dir: Option<String>,
    table_parser: TableParser,
    heading_ratio: f32,
}

impl PdfiumLayoutParser {
    pub fn new(lib_dir: &str) -> Self {
        let lib_dir = if lib_dir.trim().is_empty() {
            None
        } else {
            Some(lib_dir.to_string())
        };
        Self {
            lib_dir,
            table_parser: TableParser::new(),
            heading_ratio: 1.3,
        }
    }

    fn page_lines(page: &PdfPage) -> Result<Vec<PositionedLine>> {
        let page_height = page.height().value;
        let text_page = page.text()?;

        let mut segments: Vec<(String, BBox)> = Vec::new();
        for segment in text_page.segments().iter() {
            let text = segment.text();
            if text.trim().is_empty() {
                continue;
            }
            let b = segment.bounds();
            segments.push((
                text,
                BBox::new(
                    b.left().value,
                    page_height - b.top().value,
                    b.right().value,
                    page_height - b.bottom().value,
                ),
            ));
        }

        Ok(join_segments(segments))
    }

    /// 把一页的行划分为表格、标题和正文块
    pub fn elements_for_page(&self, page: u32, lines: &[PositionedLine]) -> Vec<LayoutElement> {
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        let spans = self.table_parser.detect(&texts);
        let body_height = median_height(lines);

        let mut elements = Vec::new();
        let mut block: Vec<&PositionedLine> = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            if let Some(span) = spans.iter().find(|s| s.start == i) {
                flush_block(&mut block, page, &mut elements);
                let covered = &lines[span.start..span.end];
                let bbox = covered
                    .iter()
                    .skip(1)
                    .fold(covered[0].bbox, |acc, l| acc.union(&l.bbox));
                elements.push(LayoutElement {
                    page,
                    label: LABEL_TABLE.to_string(),
                    text: texts[span.start..span.end].join("\n"),
                    bbox,
                    table: Some(span.grid.clone()),
                });
                i = span.end;
                continue;
            }

            let line = &lines[i];
            if self.is_heading(line, body_height) {
                flush_block(&mut block, page, &mut elements);
                let label = if page == 1 && elements.is_empty() {
                    LABEL_TITLE
                } else {
                    LABEL_SECTION_HEADER
                };
                elements.push(LayoutElement {
                    page,
                    label: label.to_string(),
                    text: line.text.trim().to_string(),
                    bbox: line.bbox,
                    table: None,
                });
                i += 1;
                continue;
            }

            // A vertical gap larger than one line height starts a new paragraph
            if let Some(prev) = block.last() {
                let gap = line.bbox.y0 - prev.bbox.y1;
                if gap > prev.bbox.height().max(1.0) {
                    flush_block(&mut block, page, &mut elements);
                }
            }
            block.push(line);
            i += 1;
        }
        flush_block(&mut block, page, &mut elements);

        elements
    }

    fn is_heading(&self, line: &PositionedLine, body_height: f32) -> bool {
        let text = line.text.trim();
        body_height > 0.0
            && line.bbox.height() >= body_height * self.heading_ratio
            && !text.is_empty()
            && text.chars().count() <= 120
            && !text.ends_with('.')
    }
}

impl StructuralParser for PdfiumLayoutParser {
    fn parse(&self, pdf_path: &Path) -> Result<LayoutDocument> {
        info!("Layout parsing {}", pdf_path.display());
        let pdfium = create_pdfium(self.lib_dir.as_deref())?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .with_context(|| format!("failed to open {}", pdf_path.display()))?;

        let mut elements = Vec::new();
        for (index, page) in document.pages().iter().enumerate() {
            let lines = Self::page_lines(&page)?;
            let page_elements = self.elements_for_page(index as u32 + 1, &lines);
            debug!("page {}: {} lines, {} elements", index + 1, lines.len(), page_elements.len());
            elements.extend(page_elements);
        }

        Ok(LayoutDocument { elements })
    }
}

/// Groups segments sharing a baseline into lines. Wide horizontal gaps are
/// kept as double spaces so column structure survives for table detection.
pub fn join_segments(mut segments: Vec<(String, BBox)>) -> Vec<PositionedLine> {
    segments.sort_by(|a, b| {
        a.1.y0
            .partial_cmp(&b.1.y0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.x0.partial_cmp(&b.1.x0).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut lines: Vec<(Vec<(String, BBox)>, BBox)> = Vec::new();
    for (text, bbox) in segments {
        let center = (bbox.y0 + bbox.y1) / 2.0;
        let same_line = lines.last().map(|(_, line_box)| {
            let tolerance = line_box.height().max(bbox.height()) / 2.0;
            (center - (line_box.y0 + line_box.y1) / 2.0).abs() <= tolerance
        });

        match (same_line, lines.last_mut()) {
            (Some(true), Some((parts, line_box))) => {
                *line_box = line_box.union(&bbox);
                parts.push((text, bbox));
            }
            _ => lines.push((vec![(text, bbox)], bbox)),
        }
    }

    lines
        .into_iter()
        .map(|(mut parts, bbox)| {
            parts.sort_by(|a, b| a.1.x0.partial_cmp(&b.1.x0).unwrap_or(std::cmp::Ordering::Equal));
            let mut text = String::new();
            let mut prev_end: Option<f32> = None;
            for (part, part_box) in &parts {
                if let Some(end) = prev_end {
                    let gap = part_box.x0 - end;
                    text.push_str(if gap > part_box.height().max(1.0) { "  " } else { " " });
                }
                text.push_str(part.trim());
                prev_end = Some(part_box.x1);
            }
            PositionedLine { text, bbox }
        })
        .collect()
}

fn median_height(lines: &[PositionedLine]) -> f32 {
    let mut heights: Vec<f32> = lines.iter().map(|l| l.bbox.height()).filter(|h| *h > 0.0).collect();
    if heights.is_empty() {
        return 0.0;
    }
    heights.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    heights[heights.len() / 2]
}

fn flush_block(block: &mut Vec<&PositionedLine>, page: u32, elements: &mut Vec<LayoutElement>) {
    if block.is_empty() {
        return;
    }
    let bbox = block.iter().skip(1).fold(block[0].bbox, |acc, l| acc.union(&l.bbox));
    let text = block
        .iter()
        .map(|l| l.text.trim())
        .collect::<Vec<_>>()
        .join(" ");
    elements.push(LayoutElement {
        page,
        label: LABEL_TEXT.to_string(),
        text,
        bbox,
        table: None,
    });
    block.clear();
}
