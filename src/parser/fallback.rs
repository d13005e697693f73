use anyhow::Result;
use lopdf::Document;
use std::path::Path;
use tracing::{debug, info, warn};

use super::StructuralUnit;

pub const SOURCE_FALLBACK: &str = "fallback";
pub const EXTRACTION_FAILED: &str = "Extraction Failed Completely";

/// 逐页原始文本来源
pub trait PageTextSource: Send + Sync {
    /// Raw text of each page in page order; blank pages are empty strings.
    fn page_texts(&self, pdf_path: &Path) -> Result<Vec<String>>;
}

/// Per-page text from the PDF object model, with a whole-document dump as
/// second tier.
#[derive(Debug, Default)]
pub struct LopdfTextExtractor;

impl LopdfTextExtractor {
    fn with_lopdf(&self, pdf_path: &Path) -> Result<Vec<String>> {
        let doc = Document::load(pdf_path)?;
        let pages = doc.get_pages();

        let mut texts = Vec::with_capacity(pages.len());
        for page_num in pages.keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => texts.push(text),
                Err(e) => {
                    debug!("lopdf could not read page {}: {}", page_num, e);
                    texts.push(String::new());
                }
            }
        }
        Ok(texts)
    }

    fn with_pdf_extract(&self, pdf_path: &Path) -> Result<Vec<String>> {
        let text = pdf_extract::extract_text(pdf_path)?;
        // pdf-extract separates pages with form feeds
        Ok(text.split('\x0C').map(str::to_string).collect())
    }
}

impl PageTextSource for LopdfTextExtractor {
    fn page_texts(&self, pdf_path: &Path) -> Result<Vec<String>> {
        match self.with_lopdf(pdf_path) {
            Ok(texts) if texts.iter().any(|t| !t.trim().is_empty()) => Ok(texts),
            Ok(_) => {
                debug!("lopdf found no text, trying pdf-extract");
                self.with_pdf_extract(pdf_path)
            }
            Err(e) => {
                warn!("lopdf failed ({}), trying pdf-extract", e);
                self.with_pdf_extract(pdf_path)
            }
        }
    }
}

pub struct FallbackTextExtractor {
    source: Box<dyn PageTextSource>,
}

impl FallbackTextExtractor {
    pub fn new(source: Box<dyn PageTextSource>) -> Self {
        Self { source }
    }

    /// 每个非空页面产出一个 content 单元；彻底失败时产出单个 error 单元
    pub fn extract(&self, pdf_path: &Path) -> Vec<StructuralUnit> {
        info!("Falling back to plain text extraction: {}", pdf_path.display());

        match self.source.page_texts(pdf_path) {
            Ok(pages) => {
                let units: Vec<StructuralUnit> = pages
                    .iter()
                    .enumerate()
                    .filter_map(|(index, text)| {
                        let text = text.trim();
                        if text.is_empty() {
                            None
                        } else {
                            Some(StructuralUnit::content(text, index as u32 + 1, SOURCE_FALLBACK))
                        }
                    })
                    .collect();
                info!("Fallback extracted text from {} of {} pages", units.len(), pages.len());
                units
            }
            Err(e) => {
                warn!("Fallback extraction failed: {:#}", e);
                vec![StructuralUnit::error(EXTRACTION_FAILED, 1, SOURCE_FALLBACK)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Role;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    struct StaticPages(Vec<&'static str>);

    impl PageTextSource for StaticPages {
        fn page_texts(&self, _pdf_path: &Path) -> Result<Vec<String>> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    struct Unreadable;

    impl PageTextSource for Unreadable {
        fn page_texts(&self, _pdf_path: &Path) -> Result<Vec<String>> {
            anyhow::bail!("not a pdf")
        }
    }

    #[test]
    fn one_unit_per_non_empty_page() {
        let extractor = FallbackTextExtractor::new(Box::new(StaticPages(vec!["  intro  ", "", "\n", "end"])));
        let units = extractor.extract(Path::new("doc.pdf"));

        assert_eq!(units.len(), 2);
        assert_eq!((units[0].text.as_str(), units[0].page), ("intro", 1));
        assert_eq!((units[1].text.as_str(), units[1].page), ("end", 4));
        assert!(units.iter().all(|u| u.role == Role::Content && u.bbox.is_none()));
        assert!(units.iter().all(|u| u.source == SOURCE_FALLBACK));
    }

    #[test]
    fn total_failure_yields_error_unit() {
        let extractor = FallbackTextExtractor::new(Box::new(Unreadable));
        let units = extractor.extract(Path::new("doc.pdf"));
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].role, Role::Error);
        assert_eq!(units[0].text, EXTRACTION_FAILED);
    }

    fn write_pdf(path: &Path, page_texts: &[&str]) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in page_texts {
            let mut operations = Vec::new();
            if !text.is_empty() {
                operations = vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![100.into(), 600.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ];
            }
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let pages = dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn lopdf_reads_text_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two_pages.pdf");
        write_pdf(&path, &["Hello fallback", ""]);

        let texts = LopdfTextExtractor.page_texts(&path).unwrap();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("Hello fallback"));
        assert!(texts[1].trim().is_empty());
    }
}
