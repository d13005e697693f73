use regex::Regex;
use std::path::Path;
use tracing::{info, warn};

use super::layout::{LayoutDocument, LayoutElement, StructuralParser};
use super::table_parser::TableGrid;
use super::{Role, StructuralUnit, TableRecord, UnitKind};
use crate::utils::{AdapterResult, FailureKind};

pub const SOURCE_LAYOUT: &str = "layout";
const PREVIEW_ROWS: usize = 3;

/// 结构化解析结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutput {
    pub units: Vec<StructuralUnit>,
    pub tables: Vec<TableRecord>,
}

impl ParseOutput {
    /// Nothing usable: no units, or a lone error unit.
    pub fn is_unusable(&self) -> bool {
        match self.units.as_slice() {
            [] => true,
            [only] => only.role == Role::Error,
            _ => false,
        }
    }
}

/// Wraps an optional layout parser; every failure becomes an empty output.
pub struct StructuralParserAdapter {
    parser: Option<Box<dyn StructuralParser>>,
    heading_label_re: Regex,
}

impl StructuralParserAdapter {
    pub fn new(parser: Option<Box<dyn StructuralParser>>) -> Self {
        if parser.is_none() {
            warn!("Structural parser not initialized; structured mode will use text fallback");
        }
        Self {
            parser,
            heading_label_re: Regex::new(r"(?i)title|header").expect("static regex"),
        }
    }

    pub fn parse(&self, pdf_path: &Path) -> AdapterResult<ParseOutput> {
        let Some(parser) = &self.parser else {
            return AdapterResult::degraded(
                ParseOutput::default(),
                FailureKind::NotInitialized,
                "structural parser not initialized",
            );
        };

        match parser.parse(pdf_path) {
            Ok(document) => {
                let output = self.normalize(&document);
                info!(
                    "Structural parse: {} units, {} tables",
                    output.units.len(),
                    output.tables.len()
                );
                AdapterResult::ok(output)
            }
            Err(e) => {
                warn!("Structural parse failed for {}: {:#}", pdf_path.display(), e);
                AdapterResult::degraded(ParseOutput::default(), FailureKind::CallFailed, format!("{:#}", e))
            }
        }
    }

    pub fn normalize(&self, document: &LayoutDocument) -> ParseOutput {
        let mut output = ParseOutput::default();

        for element in &document.elements {
            match &element.table {
                Some(grid) => {
                    output.units.push(table_unit(element, grid));
                    output.tables.push(table_record(element, grid));
                }
                None => {
                    if element.text.trim().is_empty() {
                        continue;
                    }
                    let heading = self.heading_label_re.is_match(&element.label);
                    output.units.push(StructuralUnit {
                        text: element.text.clone(),
                        full_content: None,
                        role: if heading { Role::Heading } else { Role::Content },
                        page: element.page,
                        bbox: Some(element.bbox),
                        kind: if heading { UnitKind::Heading } else { UnitKind::Text },
                        source: SOURCE_LAYOUT.to_string(),
                        confidence: None,
                    });
                }
            }
        }

        output
    }
}

/// Headers plus the first rows, prefixed so search hits read as a table.
pub fn table_search_summary(grid: &TableGrid) -> String {
    format!(
        "Table regarding: {}.\nPreview:\n{}",
        grid.headers.join(", "),
        grid.preview(PREVIEW_ROWS)
    )
}

fn table_unit(element: &LayoutElement, grid: &TableGrid) -> StructuralUnit {
    StructuralUnit {
        text: table_search_summary(grid),
        full_content: Some(grid.to_markdown()),
        role: Role::Table,
        page: element.page,
        bbox: Some(element.bbox),
        kind: UnitKind::Table,
        source: SOURCE_LAYOUT.to_string(),
        confidence: None,
    }
}

fn table_record(element: &LayoutElement, grid: &TableGrid) -> TableRecord {
    TableRecord {
        page: element.page,
        caption: grid.caption.clone(),
        bbox: Some(element.bbox),
        headers: grid.headers.clone(),
        data: grid.rows.clone(),
        rows: grid.rows.len(),
        cols: grid.column_count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::BBox;

    struct FixedParser(LayoutDocument);

    impl StructuralParser for FixedParser {
        fn parse(&self, _pdf_path: &Path) -> anyhow::Result<LayoutDocument> {
            Ok(self.0.clone())
        }
    }

    struct BrokenParser;

    impl StructuralParser for BrokenParser {
        fn parse(&self, _pdf_path: &Path) -> anyhow::Result<LayoutDocument> {
            anyhow::bail!("converter crashed")
        }
    }

    fn element(label: &str, text: &str, page: u32) -> LayoutElement {
        LayoutElement {
            page,
            label: label.to_string(),
            text: text.to_string(),
            bbox: BBox::new(10.0, 20.0, 300.0, 40.0),
            table: None,
        }
    }

    fn revenue_grid() -> TableGrid {
        TableGrid {
            caption: None,
            headers: vec!["Region".into(), "Q1".into()],
            rows: vec![
                vec!["North".into(), "10".into()],
                vec!["South".into(), "7".into()],
                vec!["East".into(), "4".into()],
                vec!["West".into(), "3".into()],
            ],
        }
    }

    #[test]
    fn labels_drive_heading_role() {
        let adapter = StructuralParserAdapter::new(None);
        let document = LayoutDocument {
            elements: vec![
                element("title", "Annual Report", 1),
                element("SECTION_HEADER", "Results", 1),
                element("text", "Revenue grew.", 1),
                element("text", "   ", 1),
            ],
        };

        let output = adapter.normalize(&document);
        let roles: Vec<Role> = output.units.iter().map(|u| u.role).collect();
        assert_eq!(roles, vec![Role::Heading, Role::Heading, Role::Content]);
        assert!(output.units.iter().all(|u| u.bbox.is_some() && u.full_content.is_none()));
    }

    #[test]
    fn table_produces_summary_markdown_and_record() {
        let adapter = StructuralParserAdapter::new(None);
        let mut table = element("table", "raw", 2);
        table.table = Some(revenue_grid());

        let output = adapter.normalize(&LayoutDocument { elements: vec![table] });
        let unit = &output.units[0];
        assert_eq!(unit.role, Role::Table);
        assert_eq!(unit.kind, UnitKind::Table);
        assert!(unit.text.starts_with("Table regarding: Region, Q1.\nPreview:\n"));
        assert!(unit.text.contains("East"));
        assert!(!unit.text.contains("West"));
        assert_eq!(unit.full_content.as_deref().map(|md| md.contains("| West | 3 |")), Some(true));

        let record = &output.tables[0];
        assert_eq!((record.page, record.rows, record.cols), (2, 4, 2));
        assert_eq!(record.data[3], vec!["West", "3"]);
    }

    #[test]
    fn parser_failure_becomes_empty_output() {
        let adapter = StructuralParserAdapter::new(Some(Box::new(BrokenParser)));
        let result = adapter.parse(Path::new("missing.pdf"));
        assert!(!result.is_ok());
        assert_eq!(result.kind(), Some(FailureKind::CallFailed));
        assert!(result.value.units.is_empty() && result.value.tables.is_empty());
    }

    #[test]
    fn missing_parser_reports_not_initialized() {
        let adapter = StructuralParserAdapter::new(None);
        let result = adapter.parse(Path::new("any.pdf"));
        assert_eq!(result.kind(), Some(FailureKind::NotInitialized));
        assert!(result.value.is_unusable());
    }

    #[test]
    fn successful_parse_is_ok() {
        let document = LayoutDocument {
            elements: vec![element("text", "Body", 1)],
        };
        let adapter = StructuralParserAdapter::new(Some(Box::new(FixedParser(document))));
        let result = adapter.parse(Path::new("doc.pdf"));
        assert!(result.is_ok());
        assert!(!result.value.is_unusable());
    }

    #[test]
    fn single_error_unit_is_unusable() {
        let output = ParseOutput {
            units: vec![StructuralUnit::error("Extraction Failed", 1, SOURCE_LAYOUT)],
            tables: vec![],
        };
        assert!(output.is_unusable());
    }
}
