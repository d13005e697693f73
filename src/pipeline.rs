use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chunker::Chunker;
use crate::config::{AppConfig, ExtractionConfig, PageImageFallback};
use crate::llm::{TextModel, VisionModel};
use crate::parser::classifier::{classify, Classification};
use crate::parser::{
    FallbackTextExtractor, FigureExtractor, ImageKind, ImageRecord, PageRasterizer, PageTextSource,
    StructuralParser, StructuralParserAdapter, StructuralUnit, TableRecord,
};
use crate::storage::{derive_doc_id, MetadataStore, SemanticStore, WriteLock};
use crate::summarizer::ContentSummarizer;

/// 提取模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExtractionMode {
    /// Layout parse with text fallback (`OCR`)
    Structured,
    /// Vision-model transcription of every page (`GEMINI`)
    Vision,
}

impl FromStr for ExtractionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "structured" | "ocr" => Ok(ExtractionMode::Structured),
            "vision" | "gemini" => Ok(ExtractionMode::Vision),
            other => Err(anyhow::anyhow!("unknown extraction mode: {} (expected structured or vision)", other)),
        }
    }
}

/// External capabilities the pipeline drives.
pub struct Capabilities {
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub structural_parser: Option<Box<dyn StructuralParser>>,
    pub text_source: Box<dyn PageTextSource>,
    pub figures: Box<dyn FigureExtractor>,
    pub text_model: Arc<dyn TextModel>,
    pub vision_model: Arc<dyn VisionModel>,
}

#[derive(Clone)]
pub struct Stores {
    pub semantic: Arc<dyn SemanticStore>,
    pub metadata: Arc<MetadataStore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub doc_id: String,
    pub chunks: usize,
    pub tables: usize,
    pub images: usize,
    pub classification: Classification,
    pub mode: ExtractionMode,
    pub fallback_used: bool,
    /// Adapter calls that returned a degraded placeholder
    pub degraded_calls: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestReport {
    Success(IngestSummary),
    Error { message: String },
}

/// Units, tables and images produced by one extraction arm.
#[derive(Default)]
struct Extraction {
    units: Vec<StructuralUnit>,
    tables: Vec<TableRecord>,
    images: Vec<ImageRecord>,
    fallback_used: bool,
    degraded_calls: usize,
}

pub struct Pipeline {
    rasterizer: Arc<dyn PageRasterizer>,
    structural: StructuralParserAdapter,
    fallback: FallbackTextExtractor,
    figures: Box<dyn FigureExtractor>,
    vision_model: Arc<dyn VisionModel>,
    summarizer: ContentSummarizer,
    chunker: Chunker,
    stores: Stores,
    extraction: ExtractionConfig,
    page_dpi: f32,
    lock: WriteLock,
}

impl Pipeline {
    pub fn new(capabilities: Capabilities, stores: Stores, config: &AppConfig) -> Result<Self> {
        let summarizer = ContentSummarizer::new(
            capabilities.text_model,
            capabilities.vision_model.clone(),
            config.extraction.table_summary_min_chars,
        );

        let lock = WriteLock::new(&stores.metadata.paths().lock_file);

        Ok(Self {
            rasterizer: capabilities.rasterizer,
            structural: StructuralParserAdapter::new(capabilities.structural_parser),
            fallback: FallbackTextExtractor::new(capabilities.text_source),
            figures: capabilities.figures,
            vision_model: capabilities.vision_model,
            summarizer,
            chunker: Chunker::new(config.chunking)?,
            stores,
            extraction: config.extraction.clone(),
            page_dpi: config.render.page_dpi,
            lock,
        })
    }

    /// Runs one ingestion to completion. Never fails: errors become an
    /// error report, and side effects already made are kept.
    pub async fn ingest(&self, file: &Path, mode: ExtractionMode) -> IngestReport {
        let result = match self.lock.acquire().await {
            Ok(_guard) => self.run(file, mode).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(summary) => IngestReport::Success(summary),
            Err(e) => {
                warn!("Ingestion of {} failed: {:#}", file.display(), e);
                IngestReport::Error {
                    message: format!("{:#}", e),
                }
            }
        }
    }

    async fn run(&self, file: &Path, mode: ExtractionMode) -> Result<IngestSummary> {
        let filename = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("invalid file name: {}", file.display()))?;
        let doc_id = derive_doc_id(filename);
        if doc_id.is_empty() {
            anyhow::bail!("cannot derive a document id from '{}'", filename);
        }
        info!("--- Processing {} as {} ({:?}) ---", filename, doc_id, mode);

        let paths = self.stores.metadata.paths();
        let pdf_path = paths.pdf_path(&doc_id);
        persist_upload(file, &pdf_path)?;
        self.stores.metadata.clear_renders(&doc_id)?;

        let pages = self
            .rasterizer
            .rasterize(&pdf_path, &paths.pages_for(&doc_id), self.page_dpi)
            .context("rasterization failed")?;

        let page_texts = self.rasterizer.page_texts(&pdf_path).context("failed to read page text")?;
        let classification = classify(&page_texts, self.extraction.classify_min_chars);
        info!("[{}] classification: {}", doc_id, classification);

        let extraction = match mode {
            ExtractionMode::Vision => self.extract_vision(&doc_id, &pages).await,
            ExtractionMode::Structured => {
                self.extract_structured(&doc_id, &pdf_path, &pages, classification)
                    .await
            }
        };

        let chunks = self.chunker.chunk(&extraction.units);
        info!(
            "[{}] storing {} chunks, {} tables, {} images",
            doc_id,
            chunks.len(),
            extraction.tables.len(),
            extraction.images.len()
        );
        self.stores.semantic.add(&chunks, &doc_id).await?;
        self.stores.metadata.save_tables(&extraction.tables, &doc_id)?;
        self.stores.metadata.save_images(&extraction.images, &doc_id)?;

        Ok(IngestSummary {
            doc_id,
            chunks: chunks.len(),
            tables: extraction.tables.len(),
            images: extraction.images.len(),
            classification,
            mode,
            fallback_used: extraction.fallback_used,
            degraded_calls: extraction.degraded_calls,
        })
    }

    async fn extract_vision(&self, doc_id: &str, pages: &[PathBuf]) -> Extraction {
        let mut extraction = Extraction::default();

        for (index, page_image) in pages.iter().enumerate() {
            let page = index as u32 + 1;
            info!("[{}] vision transcription page {}/{}", doc_id, page, pages.len());

            let result = self.vision_model.transcribe(page_image).await;
            if let Some(failure) = &result.failure {
                warn!("[{}] page {} transcription degraded: {}", doc_id, page, failure.message);
                extraction.degraded_calls += 1;
            }
            let transcription = result.value;
            extraction.units.push(StructuralUnit {
                confidence: Some(transcription.confidence),
                ..StructuralUnit::content(transcription.text, page, &transcription.source)
            });
            extraction.images.push(page_image_record(page_image, page, format!("Page {} (vision source)", page)));
        }

        extraction
    }

    async fn extract_structured(
        &self,
        doc_id: &str,
        pdf_path: &Path,
        pages: &[PathBuf],
        classification: Classification,
    ) -> Extraction {
        let mut extraction = Extraction::default();

        let parsed = self.structural.parse(pdf_path);
        let parser_ok = parsed.is_ok();
        if !parser_ok {
            extraction.degraded_calls += 1;
        }
        let output = parsed.value;

        if !parser_ok || output.is_unusable() {
            info!("[{}] structural parse unusable, using text fallback", doc_id);
            extraction.units = self.fallback.extract(pdf_path);
            extraction.fallback_used = true;
        } else {
            extraction.units = output.units;
            let counts = self.summarizer.summarize_tables(&mut extraction.units).await;
            extraction.degraded_calls += counts.failed;
        }
        extraction.tables = output.tables;

        let figures_dir = self.stores.metadata.paths().figures_for(doc_id);
        let figures = match self.figures.extract(pdf_path, doc_id, &figures_dir) {
            Ok(figures) => figures,
            Err(e) => {
                warn!("[{}] figure extraction failed: {:#}", doc_id, e);
                Vec::new()
            }
        };

        for figure in &figures {
            debug!(
                "[{}] figure {} on page {} ({}, {}x{})",
                doc_id,
                figure.path.display(),
                figure.page,
                figure.format,
                figure.width,
                figure.height
            );
            let caption = self.summarizer.caption_figure(&figure.path, figure.page).await;
            extraction.images.push(ImageRecord {
                image_id: file_name(&figure.path),
                path: Some(figure.path.display().to_string()),
                page: figure.page,
                caption,
                kind: ImageKind::Figure,
                width: Some(figure.width),
                height: Some(figure.height),
            });
        }

        if extraction.images.is_empty() && self.synthesize_page_images(classification) {
            for (index, page_image) in pages.iter().enumerate() {
                let page = index as u32 + 1;
                extraction
                    .images
                    .push(page_image_record(page_image, page, format!("Scanned Page {}", page)));
            }
        }

        extraction
    }

    fn synthesize_page_images(&self, classification: Classification) -> bool {
        match self.extraction.page_images_when_no_figures {
            PageImageFallback::Always => true,
            PageImageFallback::ScannedOnly => classification == Classification::Scanned,
            PageImageFallback::Never => false,
        }
    }

    /// Removes the document's chunks and every file artifact.
    pub async fn delete(&self, doc_id: &str) -> Result<u64> {
        let _guard = self.lock.acquire().await?;
        let removed = self.stores.semantic.delete(doc_id).await?;
        self.stores.metadata.delete_document(doc_id)?;
        Ok(removed)
    }

    pub async fn reset(&self) -> Result<()> {
        let _guard = self.lock.acquire().await?;
        self.stores.semantic.reset().await?;
        self.stores.metadata.reset()?;
        Ok(())
    }
}

fn persist_upload(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let same_file = match (source.canonicalize(), target.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if !same_file {
        std::fs::copy(source, target)
            .with_context(|| format!("failed to store {} as {}", source.display(), target.display()))?;
    }
    Ok(())
}

fn page_image_record(path: &Path, page: u32, caption: String) -> ImageRecord {
    ImageRecord {
        image_id: file_name(path),
        path: Some(path.display().to_string()),
        page,
        caption,
        kind: ImageKind::ScannedPage,
        width: None,
        height: None,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}
