use regex::Regex;
use tracing::debug;

/// 解析出的表格：表头 + 数据行
#[derive(Debug, Clone, PartialEq)]
pub struct TableGrid {
    pub caption: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A detected table and the half-open range of input lines it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpan {
    pub start: usize,
    pub end: usize,
    pub grid: TableGrid,
}

pub struct TableParser {
    caption_re: Regex,
    column_gap_re: Regex,
}

impl TableParser {
    pub fn new() -> Self {
        Self {
            caption_re: Regex::new(r"(?i)^Table\s+(\d+)[.:]?\s*(.*)$").expect("static regex"),
            column_gap_re: Regex::new(r"\t|\s{2,}").expect("static regex"),
        }
    }

    /// 在按阅读顺序排列的行中检测表格区域
    pub fn detect<S: AsRef<str>>(&self, lines: &[S]) -> Vec<TableSpan> {
        let mut spans = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let trimmed = lines[i].as_ref().trim();

            // "Table N" caption followed by at least two column-aligned rows
            if self.caption_re.is_match(trimmed) {
                let start = i;
                let rows_start = i + 1;
                let rows_end = self.column_run_end(lines, rows_start);
                if rows_end - rows_start >= 2 {
                    if let Some(grid) = self.parse_rows(&lines[rows_start..rows_end], Some(trimmed.to_string())) {
                        debug!("table with caption '{}' spans lines {}..{}", trimmed, start, rows_end);
                        spans.push(TableSpan { start, end: rows_end, grid });
                        i = rows_end;
                        continue;
                    }
                }
                i += 1;
                continue;
            }

            // Uncaptioned blocks need three aligned rows to count
            if self.looks_like_row(trimmed) {
                let end = self.column_run_end(lines, i);
                if end - i >= 3 {
                    if let Some(grid) = self.parse_rows(&lines[i..end], None) {
                        debug!("uncaptioned table: {} columns, lines {}..{}", grid.headers.len(), i, end);
                        spans.push(TableSpan { start: i, end, grid });
                        i = end;
                        continue;
                    }
                }
                i = end.max(i + 1);
                continue;
            }

            i += 1;
        }

        spans
    }

    pub fn split_cells(&self, line: &str) -> Vec<String> {
        self.column_gap_re
            .split(line.trim())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .collect()
    }

    fn looks_like_row(&self, line: &str) -> bool {
        line.len() >= 5 && self.split_cells(line).len() >= 2
    }

    fn column_run_end<S: AsRef<str>>(&self, lines: &[S], start: usize) -> usize {
        let mut end = start;
        while end < lines.len() {
            let row = lines[end].as_ref().trim();
            if self.caption_re.is_match(row) || !self.looks_like_row(row) {
                break;
            }
            end += 1;
        }
        end
    }

    fn parse_rows<S: AsRef<str>>(&self, raw_rows: &[S], caption: Option<String>) -> Option<TableGrid> {
        let (first, rest) = raw_rows.split_first()?;
        let headers = self.split_cells(first.as_ref());
        if headers.len() < 2 {
            return None;
        }

        let rows: Vec<Vec<String>> = rest.iter().map(|row| self.split_cells(row.as_ref())).collect();
        if rows.is_empty() {
            return None;
        }

        Some(TableGrid { caption, headers, rows })
    }
}

impl TableGrid {
    pub fn column_count(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0)
    }

    /// Lossless markdown rendering used as full content.
    pub fn to_markdown(&self) -> String {
        let cols = self.column_count();
        let mut out = String::new();

        out.push_str(&markdown_row(&self.headers, cols));
        out.push('|');
        for _ in 0..cols {
            out.push_str(" --- |");
        }
        out.push('\n');
        for row in &self.rows {
            out.push_str(&markdown_row(row, cols));
        }
        out
    }

    /// Headers plus up to `limit` rows, column-aligned plain text.
    pub fn preview(&self, limit: usize) -> String {
        let cols = self.column_count();
        let shown: Vec<&Vec<String>> = std::iter::once(&self.headers)
            .chain(self.rows.iter().take(limit))
            .collect();

        let widths: Vec<usize> = (0..cols)
            .map(|c| {
                shown
                    .iter()
                    .map(|row| row.get(c).map(|cell| cell.chars().count()).unwrap_or(0))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        shown
            .iter()
            .map(|row| {
                (0..cols)
                    .map(|c| {
                        let cell = row.get(c).map(String::as_str).unwrap_or("");
                        format!("{:>width$}", cell, width = widths[c])
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn markdown_row(cells: &[String], cols: usize) -> String {
    let mut line = String::from("|");
    for c in 0..cols {
        let cell = cells.get(c).map(String::as_str).unwrap_or("");
        line.push(' ');
        line.push_str(&cell.replace('|', "\\|"));
        line.push_str(" |");
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_captioned_table() {
        let lines = vec![
            "Quarterly results were strong.",
            "Table 1: Revenue by region",
            "Region    Q1    Q2",
            "North     10    12",
            "South     7     9",
            "The text continues here.",
        ];
        let spans = TableParser::new().detect(&lines);
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!((span.start, span.end), (1, 5));
        assert_eq!(span.grid.caption.as_deref(), Some("Table 1: Revenue by region"));
        assert_eq!(span.grid.headers, vec!["Region", "Q1", "Q2"]);
        assert_eq!(span.grid.rows[1], vec!["South", "7", "9"]);
    }

    #[test]
    fn uncaptioned_block_needs_three_rows() {
        let parser = TableParser::new();
        let two = vec!["Name    Score", "Alice   90"];
        assert!(parser.detect(&two).is_empty());

        let three = vec!["Name    Score", "Alice   90", "Bob     85"];
        let spans = parser.detect(&three);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].grid.caption, None);
        assert_eq!(spans[0].grid.rows.len(), 2);
    }

    #[test]
    fn prose_is_not_a_table() {
        let lines = vec!["A normal sentence with single spaces.", "Another line of prose."];
        assert!(TableParser::new().detect(&lines).is_empty());
    }

    #[test]
    fn markdown_pads_ragged_rows_and_escapes_pipes() {
        let grid = TableGrid {
            caption: None,
            headers: vec!["a".into(), "b".into()],
            rows: vec![vec!["1".into()], vec!["x|y".into(), "2".into()]],
        };
        assert_eq!(
            grid.to_markdown(),
            "| a | b |\n| --- | --- |\n| 1 |  |\n| x\\|y | 2 |\n"
        );
    }

    #[test]
    fn preview_limits_rows() {
        let grid = TableGrid {
            caption: None,
            headers: vec!["k".into(), "v".into()],
            rows: (0..5).map(|i| vec![format!("r{}", i), i.to_string()]).collect(),
        };
        let preview = grid.preview(3);
        assert_eq!(preview.lines().count(), 4);
        assert!(preview.contains("r2"));
        assert!(!preview.contains("r3"));
    }
}
