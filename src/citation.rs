use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::RenderConfig;
use crate::parser::rasterizer::ClipOutsidePage;
use crate::parser::{BBox, BBoxParseError, PageRasterizer};
use crate::storage::DataPaths;

#[derive(Error, Debug)]
pub enum CitationError {
    #[error("invalid bbox: {0}")]
    InvalidBBox(#[from] BBoxParseError),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error(transparent)]
    OutsidePage(#[from] ClipOutsidePage),

    #[error("failed to render citation: {0:#}")]
    Render(anyhow::Error),
}

impl CitationError {
    /// HTTP-style status used by the CLI output.
    pub fn status(&self) -> u16 {
        match self {
            CitationError::InvalidBBox(_) | CitationError::OutsidePage(_) => 400,
            CitationError::DocumentNotFound(_) | CitationError::PageOutOfRange { .. } => 404,
            CitationError::Render(_) => 500,
        }
    }
}

/// 根据 (doc_id, page, bbox) 渲染引用截图
pub struct CitationService {
    rasterizer: Arc<dyn PageRasterizer>,
    paths: DataPaths,
    dpi: f32,
    padding: f32,
}

impl CitationService {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>, paths: DataPaths, render: &RenderConfig) -> Self {
        Self {
            rasterizer,
            paths,
            dpi: render.citation_dpi,
            padding: render.citation_padding,
        }
    }

    /// PNG of the padded region, clipped to the page.
    pub fn crop(&self, doc_id: &str, page: u32, bbox_str: &str) -> Result<Vec<u8>, CitationError> {
        let bbox: BBox = bbox_str.parse()?;

        let pdf_path = self.paths.pdf_path(doc_id);
        if doc_id.is_empty() || !pdf_path.exists() {
            return Err(CitationError::DocumentNotFound(doc_id.to_string()));
        }

        let page_count = self.rasterizer.page_count(&pdf_path).map_err(CitationError::Render)?;
        if page == 0 || page > page_count {
            return Err(CitationError::PageOutOfRange { page, page_count });
        }

        let clip = bbox.padded(self.padding);
        debug!("citation {} p{} clip {}", doc_id, page, clip);
        let png = self
            .rasterizer
            .render_clip(&pdf_path, page, clip, self.dpi)
            .map_err(|e| match e.downcast::<ClipOutsidePage>() {
                Ok(outside) => CitationError::OutsidePage(outside),
                Err(e) => CitationError::Render(e),
            })?;

        info!("Rendered citation for {} page {} ({} bytes)", doc_id, page, png.len());
        Ok(png)
    }
}
