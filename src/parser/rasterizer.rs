use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, RgbaImage};
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::BBox;

const POINTS_PER_INCH: f32 = 72.0;

/// The requested region has no pixels on the rendered page.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("region {clip} lies outside page {page}")]
pub struct ClipOutsidePage {
    pub page: u32,
    pub clip: BBox,
}

/// 页面栅格化能力
pub trait PageRasterizer: Send + Sync {
    fn page_count(&self, pdf_path: &Path) -> Result<u32>;

    /// Extractable text of every page, in page order.
    fn page_texts(&self, pdf_path: &Path) -> Result<Vec<String>>;

    /// Renders every page to `out_dir/page_NNN.png` and returns the paths in page order.
    fn rasterize(&self, pdf_path: &Path, out_dir: &Path, dpi: f32) -> Result<Vec<PathBuf>>;

    /// PNG bytes of `clip` (page coordinates) on the 1-based `page`.
    fn render_clip(&self, pdf_path: &Path, page: u32, clip: BBox, dpi: f32) -> Result<Vec<u8>>;
}

pub struct PdfiumRasterizer {
    lib_dir: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(lib_dir: &str) -> Self {
        let lib_dir = if lib_dir.trim().is_empty() {
            None
        } else {
            Some(lib_dir.to_string())
        };
        Self { lib_dir }
    }

    pub fn bind(&self) -> Result<Pdfium> {
        create_pdfium(self.lib_dir.as_deref())
    }
}

/// Binds pdfium from `lib_dir` when given, otherwise from the system library.
pub fn create_pdfium(lib_dir: Option<&str>) -> Result<Pdfium> {
    if let Some(dir) = lib_dir {
        match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(e) => warn!("Failed to bind pdfium in {}: {:?}", dir, e),
        }
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| anyhow::anyhow!("pdfium library not available: {:?}", e))?;
    Ok(Pdfium::new(bindings))
}

impl PageRasterizer for PdfiumRasterizer {
    fn page_count(&self, pdf_path: &Path) -> Result<u32> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .with_context(|| format!("failed to open {}", pdf_path.display()))?;
        Ok(document.pages().len() as u32)
    }

    fn page_texts(&self, pdf_path: &Path) -> Result<Vec<String>> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .with_context(|| format!("failed to open {}", pdf_path.display()))?;

        let mut texts = Vec::new();
        for page in document.pages().iter() {
            texts.push(page.text()?.all());
        }
        Ok(texts)
    }

    fn rasterize(&self, pdf_path: &Path, out_dir: &Path, dpi: f32) -> Result<Vec<PathBuf>> {
        info!("Rasterizing {} at {} dpi", pdf_path.display(), dpi);
        std::fs::create_dir_all(out_dir)?;

        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .with_context(|| format!("failed to open {}", pdf_path.display()))?;

        let mut paths = Vec::new();
        for (index, page) in document.pages().iter().enumerate() {
            let image = render_page(&page, dpi)?;
            let path = out_dir.join(page_image_name(index as u32 + 1));
            image.save_with_format(&path, ImageFormat::Png)?;
            debug!("page {} -> {}", index + 1, path.display());
            paths.push(path);
        }

        info!("Rasterized {} pages", paths.len());
        Ok(paths)
    }

    fn render_clip(&self, pdf_path: &Path, page: u32, clip: BBox, dpi: f32) -> Result<Vec<u8>> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .with_context(|| format!("failed to open {}", pdf_path.display()))?;

        let index = page
            .checked_sub(1)
            .ok_or_else(|| anyhow::anyhow!("pages are 1-based"))?;
        let pdf_page = document.pages().get(index as u16)?;
        let image = render_page(&pdf_page, dpi)?;

        let scale = dpi / POINTS_PER_INCH;
        let (x, y, w, h) = clip_to_pixels(&clip, scale, image.width(), image.height())
            .ok_or(ClipOutsidePage { page, clip })?;
        let cropped = image.crop_imm(x, y, w, h);

        let mut png = Vec::new();
        cropped.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }
}

pub fn page_image_name(page: u32) -> String {
    format!("page_{:03}.png", page)
}

fn render_page(page: &PdfPage, dpi: f32) -> Result<DynamicImage> {
    let scale = dpi / POINTS_PER_INCH;
    let width = (page.width().value * scale).round().max(1.0) as i32;
    let height = (page.height().value * scale).round().max(1.0) as i32;

    let bitmap = page.render_with_config(
        &PdfRenderConfig::new()
            .set_target_width(width)
            .set_maximum_height(height)
            .rotate_if_landscape(PdfPageRenderRotation::None, false),
    )?;

    let (w, h) = (bitmap.width() as u32, bitmap.height() as u32);
    let rgba = RgbaImage::from_raw(w, h, bitmap.as_rgba_bytes())
        .ok_or_else(|| anyhow::anyhow!("pdfium returned a short bitmap ({}x{})", w, h))?;
    Ok(DynamicImage::ImageRgba8(rgba))
}

/// Maps a page-space rectangle to a pixel window clipped to the image.
///
/// Returns `(x, y, width, height)`, or `None` when nothing of the rectangle
/// is on the image.
pub fn clip_to_pixels(clip: &BBox, scale: f32, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = (clip.x0 * scale).floor().clamp(0.0, img_w as f32) as u32;
    let y0 = (clip.y0 * scale).floor().clamp(0.0, img_h as f32) as u32;
    let x1 = (clip.x1 * scale).ceil().clamp(0.0, img_w as f32) as u32;
    let y1 = (clip.y1 * scale).ceil().clamp(0.0, img_h as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0, y0, x1 - x0, y1 - y0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_scales_to_pixels() {
        let clip = BBox::new(0.0, 0.0, 72.0, 36.0);
        assert_eq!(clip_to_pixels(&clip, 200.0 / 72.0, 2000, 2000), Some((0, 0, 200, 100)));
    }

    #[test]
    fn clip_is_clamped_to_image() {
        let clip = BBox::new(-10.0, -10.0, 1000.0, 50.0);
        assert_eq!(clip_to_pixels(&clip, 1.0, 600, 800), Some((0, 0, 600, 50)));
    }

    #[test]
    fn clip_outside_image_is_none() {
        let clip = BBox::new(700.0, 10.0, 800.0, 20.0);
        assert_eq!(clip_to_pixels(&clip, 1.0, 600, 800), None);
    }

    #[test]
    fn page_images_are_zero_padded() {
        assert_eq!(page_image_name(7), "page_007.png");
        assert_eq!(page_image_name(123), "page_123.png");
    }
}
