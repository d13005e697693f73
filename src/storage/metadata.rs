use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use super::paths::DataPaths;
use crate::parser::{ImageRecord, TableRecord};

/// 表格与图片元数据（JSON 文件，按 doc_id 分文件）
pub struct MetadataStore {
    paths: DataPaths,
}

impl MetadataStore {
    pub fn new(paths: DataPaths) -> Result<Self> {
        paths.ensure().context("failed to create data directories")?;
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn save_tables(&self, tables: &[TableRecord], doc_id: &str) -> Result<()> {
        write_json(&self.paths.tables_file(doc_id), tables)
    }

    pub fn save_images(&self, images: &[ImageRecord], doc_id: &str) -> Result<()> {
        write_json(&self.paths.images_file(doc_id), images)
    }

    pub fn load_tables(&self, doc_id: &str) -> Result<Vec<TableRecord>> {
        read_json(&self.paths.tables_file(doc_id))
    }

    pub fn load_images(&self, doc_id: &str) -> Result<Vec<ImageRecord>> {
        read_json(&self.paths.images_file(doc_id))
    }

    /// Removes metadata files, page renders, extracted figures and the stored PDF.
    /// Drops rendered pages and extracted figures left by an earlier ingestion.
    pub fn clear_renders(&self, doc_id: &str) -> Result<()> {
        remove_dir(&self.paths.pages_for(doc_id))?;
        remove_dir(&self.paths.figures_for(doc_id))?;
        Ok(())
    }

    pub fn delete_document(&self, doc_id: &str) -> Result<()> {
        remove_file(&self.paths.tables_file(doc_id))?;
        remove_file(&self.paths.images_file(doc_id))?;
        self.clear_renders(doc_id)?;
        remove_file(&self.paths.pdf_path(doc_id))?;
        info!("Deleted artifacts for {}", doc_id);
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        for dir in [
            &self.paths.processed_dir,
            &self.paths.pages_dir,
            &self.paths.pdf_dir,
            &self.paths.images_dir,
        ] {
            remove_dir(dir)?;
        }
        self.paths.ensure()?;
        info!("Metadata and static files cleared");
        Ok(())
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    debug!("wrote {}", path.display());
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let items = serde_json::from_str(&content).with_context(|| format!("malformed metadata in {}", path.display()))?;
    Ok(items)
}

fn remove_file(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}

fn remove_dir(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}
