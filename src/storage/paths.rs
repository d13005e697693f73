use std::path::{Path, PathBuf};

/// 数据目录布局，所有产物都以 doc_id 为键
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub pdf_dir: PathBuf,
    pub pages_dir: PathBuf,
    pub images_dir: PathBuf,
    pub processed_dir: PathBuf,
    /// Advisory lock serializing writers across processes
    pub lock_file: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let static_dir = root.join("static");
        Self {
            pdf_dir: static_dir.join("pdfs"),
            pages_dir: static_dir.join("pages"),
            images_dir: static_dir.join("images"),
            processed_dir: root.join("processed"),
            lock_file: root.join(".ingest.lock"),
        }
    }

    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.pdf_dir, &self.pages_dir, &self.images_dir, &self.processed_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn pdf_path(&self, doc_id: &str) -> PathBuf {
        self.pdf_dir.join(format!("{}.pdf", doc_id))
    }

    pub fn pages_for(&self, doc_id: &str) -> PathBuf {
        self.pages_dir.join(doc_id)
    }

    pub fn figures_for(&self, doc_id: &str) -> PathBuf {
        self.images_dir.join(doc_id)
    }

    pub fn tables_file(&self, doc_id: &str) -> PathBuf {
        self.processed_dir.join(format!("{}_tables.json", doc_id))
    }

    pub fn images_file(&self, doc_id: &str) -> PathBuf {
        self.processed_dir.join(format!("{}_images.json", doc_id))
    }
}

/// Stable identifier from an uploaded file name: drops a trailing `.pdf`,
/// turns spaces into `_` and keeps only ASCII alphanumerics, `_` and `-`.
pub fn derive_doc_id(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    let cut = name.len().saturating_sub(4);
    let stem = match (name.get(..cut), name.get(cut..)) {
        (Some(stem), Some(ext)) if ext.eq_ignore_ascii_case(".pdf") => stem,
        _ => name,
    };

    stem.trim()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_strips_extension_and_punctuation() {
        assert_eq!(derive_doc_id("My Report (final).pdf"), "My_Report_final");
        assert_eq!(derive_doc_id("SCAN-01.PDF"), "SCAN-01");
        assert_eq!(derive_doc_id("  notes v2 .pdf"), "notes_v2");
        assert_eq!(derive_doc_id("/tmp/uploads/a b.pdf"), "a_b");
    }

    #[test]
    fn doc_id_is_deterministic_and_may_be_empty() {
        assert_eq!(derive_doc_id("Q3 plan.pdf"), derive_doc_id("Q3 plan.pdf"));
        assert_eq!(derive_doc_id("(((.pdf"), "");
    }

    #[test]
    fn artifact_paths_share_the_doc_id() {
        let paths = DataPaths::new("data");
        assert_eq!(paths.pdf_path("r1"), PathBuf::from("data/static/pdfs/r1.pdf"));
        assert_eq!(paths.pages_for("r1"), PathBuf::from("data/static/pages/r1"));
        assert_eq!(paths.tables_file("r1"), PathBuf::from("data/processed/r1_tables.json"));
    }
}
