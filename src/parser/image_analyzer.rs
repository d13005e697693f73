use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use std::io::Read as IoRead;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 从PDF中提取出的一张嵌入图片
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFigure {
    pub path: PathBuf,
    pub page: u32,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// 嵌入图片提取能力
pub trait FigureExtractor: Send + Sync {
    /// Writes every embedded figure of `pdf_path` under `out_dir` as
    /// `<doc_id>_fig_<n>.<ext>`.
    fn extract(&self, pdf_path: &Path, doc_id: &str, out_dir: &Path) -> Result<Vec<ExtractedFigure>>;
}

enum Decoded {
    /// Already a complete image file (JPEG, JPEG 2000)
    Encoded(Vec<u8>, &'static str),
    Raster(DynamicImage),
}

/// Figure extraction straight from the PDF object graph.
pub struct ImageAnalyzer {
    min_px: u32,
}

impl ImageAnalyzer {
    pub fn new(min_px: u32) -> Self {
        Self { min_px }
    }

    /// 遍历所有 Subtype=Image 的 Stream，按页码排序；找不到所属页时记为第 1 页
    fn collect_images(&self, doc: &Document) -> Vec<(ObjectId, u32)> {
        let owners = page_owners(doc);

        let mut found: Vec<(ObjectId, u32)> = doc
            .objects
            .iter()
            .filter_map(|(&id, object)| {
                let stream = object.as_stream().ok()?;
                if name_of(&stream.dict, b"Subtype") != Some("Image") {
                    return None;
                }
                Some((id, owners.get(&id).copied().unwrap_or(1)))
            })
            .collect();

        found.sort_by_key(|(id, page)| (*page, *id));
        found
    }

    fn decode(&self, doc: &Document, stream: &Stream, width: u32, height: u32) -> Result<Option<Decoded>> {
        let bits = int_of(&stream.dict, b"BitsPerComponent").unwrap_or(8) as u32;

        match filter_name(&stream.dict).as_deref() {
            Some("DCTDecode") => {
                let data = stream.decompressed_content().unwrap_or_else(|_| stream.content.clone());
                Ok((!data.is_empty()).then_some(Decoded::Encoded(data, "jpg")))
            }
            Some("JPXDecode") => {
                let data = stream.decompressed_content().unwrap_or_else(|_| stream.content.clone());
                Ok((!data.is_empty()).then_some(Decoded::Encoded(data, "jp2")))
            }
            Some("FlateDecode") => {
                let data = match stream.decompressed_content() {
                    Ok(d) => d,
                    Err(_) => manual_inflate(&stream.content)?,
                };
                if let Some(rgb) = decode_indexed(&stream.dict, doc, &data, width, height, bits) {
                    return Ok(RgbImage::from_raw(width, height, rgb).map(|img| Decoded::Raster(DynamicImage::ImageRgb8(img))));
                }
                Ok(raw_raster(&data, width, height, color_channels(&stream.dict, doc), bits).map(Decoded::Raster))
            }
            None => Ok(raw_raster(&stream.content, width, height, color_channels(&stream.dict, doc), bits).map(Decoded::Raster)),
            Some(other) => {
                debug!("unsupported image filter {}", other);
                Ok(None)
            }
        }
    }
}

impl FigureExtractor for ImageAnalyzer {
    fn extract(&self, pdf_path: &Path, doc_id: &str, out_dir: &Path) -> Result<Vec<ExtractedFigure>> {
        info!("Extracting figures from {}", pdf_path.display());

        let doc = Document::load(pdf_path).with_context(|| format!("failed to load {}", pdf_path.display()))?;
        std::fs::create_dir_all(out_dir)?;

        let mut figures = Vec::new();
        for (id, page) in self.collect_images(&doc) {
            let Ok(stream) = doc.get_object(id).and_then(Object::as_stream) else {
                continue;
            };

            let width = int_of(&stream.dict, b"Width").unwrap_or(0) as u32;
            let height = int_of(&stream.dict, b"Height").unwrap_or(0) as u32;
            if width < self.min_px || height < self.min_px {
                debug!("skipping {}x{} image {:?}", width, height, id);
                continue;
            }

            let decoded = match self.decode(&doc, stream, width, height) {
                Ok(Some(d)) => d,
                Ok(None) => continue,
                Err(e) => {
                    warn!("could not decode image {:?}: {}", id, e);
                    continue;
                }
            };

            let index = figures.len();
            let written = match decoded {
                Decoded::Encoded(bytes, ext) => {
                    let path = out_dir.join(format!("{}_fig_{}.{}", doc_id, index, ext));
                    std::fs::write(&path, &bytes).map(|_| (path, ext)).map_err(anyhow::Error::from)
                }
                Decoded::Raster(img) => {
                    let path = out_dir.join(format!("{}_fig_{}.png", doc_id, index));
                    img.save(&path).map(|_| (path, "png")).map_err(anyhow::Error::from)
                }
            };

            match written {
                Ok((path, ext)) => figures.push(ExtractedFigure {
                    path,
                    page,
                    width,
                    height,
                    format: ext.to_string(),
                }),
                Err(e) => warn!("failed to write figure {:?}: {}", id, e),
            }
        }

        info!("Extracted {} figures", figures.len());
        Ok(figures)
    }
}

/// Maps each image object to the first page whose resources reach it,
/// directly or through nested Form XObjects.
fn page_owners(doc: &Document) -> HashMap<ObjectId, u32> {
    let mut owners = HashMap::new();
    for (page_num, page_id) in doc.get_pages() {
        let mut reached = Vec::new();
        collect_xobjects(doc, page_id, 0, &mut reached);
        for id in reached {
            owners.entry(id).or_insert(page_num);
        }
    }
    owners
}

fn collect_xobjects(doc: &Document, owner: ObjectId, depth: u32, out: &mut Vec<ObjectId>) {
    if depth > 3 {
        return;
    }
    let Ok(object) = doc.get_object(owner) else {
        return;
    };
    let Ok(dict) = object.as_dict().or_else(|_| object.as_stream().map(|s| &s.dict)) else {
        return;
    };
    let Some(xobjects) = xobject_dict(doc, dict) else {
        return;
    };

    for (_, value) in xobjects.iter() {
        let Ok(id) = value.as_reference() else {
            continue;
        };
        out.push(id);
        let is_form = doc
            .get_object(id)
            .and_then(Object::as_stream)
            .map(|s| name_of(&s.dict, b"Subtype") == Some("Form"))
            .unwrap_or(false);
        if is_form {
            collect_xobjects(doc, id, depth + 1, out);
        }
    }
}

fn xobject_dict<'a>(doc: &'a Document, dict: &'a Dictionary) -> Option<&'a Dictionary> {
    let (_, resources) = doc.dereference(dict.get(b"Resources").ok()?).ok()?;
    let (_, xobjects) = doc.dereference(resources.as_dict().ok()?.get(b"XObject").ok()?).ok()?;
    xobjects.as_dict().ok()
}

fn name_of<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a str> {
    dict.get(key)
        .ok()
        .and_then(|o| o.as_name().ok())
        .and_then(|n| std::str::from_utf8(n).ok())
}

fn int_of(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).ok().and_then(|o| o.as_i64().ok())
}

/// Last image codec in a filter chain wins; otherwise the first filter.
fn filter_name(dict: &Dictionary) -> Option<String> {
    let filter = dict.get(b"Filter").ok()?;
    if let Ok(name) = filter.as_name() {
        return std::str::from_utf8(name).ok().map(str::to_string);
    }

    let chain: Vec<&str> = filter
        .as_array()
        .ok()?
        .iter()
        .filter_map(|o| o.as_name().ok())
        .filter_map(|n| std::str::from_utf8(n).ok())
        .collect();
    chain
        .iter()
        .rev()
        .find(|n| matches!(**n, "DCTDecode" | "JPXDecode" | "CCITTFaxDecode"))
        .or_else(|| chain.first())
        .map(|n| n.to_string())
}

/// zlib first, raw deflate second
fn manual_inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if flate2::read::ZlibDecoder::new(compressed).read_to_end(&mut out).is_ok() {
        return Ok(out);
    }
    out.clear();
    flate2::read::DeflateDecoder::new(compressed).read_to_end(&mut out)?;
    Ok(out)
}

fn raw_raster(data: &[u8], width: u32, height: u32, channels: u32, bits: u32) -> Option<DynamicImage> {
    let expected = (width as usize) * (height as usize) * (channels as usize) * (bits as usize) / 8;
    if bits != 8 || data.len() < expected {
        debug!(
            "raster size mismatch: {} bytes for {}x{}x{} at {} bits",
            data.len(),
            width,
            height,
            channels,
            bits
        );
        return None;
    }
    let pixels = data[..expected].to_vec();
    match channels {
        1 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8),
        _ => None,
    }
}

/// Expands `[/Indexed base hival lookup]` palette data to RGB.
fn decode_indexed(dict: &Dictionary, doc: &Document, data: &[u8], width: u32, height: u32, bits: u32) -> Option<Vec<u8>> {
    let space = dict.get(b"ColorSpace").ok()?.as_array().ok()?;
    if std::str::from_utf8(space.first()?.as_name().ok()?).ok()? != "Indexed" {
        return None;
    }

    let base_channels = space
        .get(1)
        .and_then(|o| o.as_name().ok())
        .and_then(|n| std::str::from_utf8(n).ok())
        .map(channels_from_name)
        .unwrap_or(3) as usize;
    if base_channels != 3 || bits != 8 {
        return None;
    }
    let hival = space.get(2)?.as_i64().ok()? as usize;

    let lookup: Vec<u8> = match space.get(3)? {
        Object::String(bytes, _) => bytes.clone(),
        Object::Stream(s) => s.decompressed_content().unwrap_or_else(|_| s.content.clone()),
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::String(bytes, _) => bytes.clone(),
            Object::Stream(s) => s.decompressed_content().unwrap_or_else(|_| s.content.clone()),
            _ => return None,
        },
        _ => return None,
    };
    if lookup.len() < (hival + 1) * base_channels {
        return None;
    }

    let pixel_count = (width as usize) * (height as usize);
    if data.len() < pixel_count {
        return None;
    }

    let mut rgb = Vec::with_capacity(pixel_count * base_channels);
    for &index in &data[..pixel_count] {
        let offset = (index as usize).min(hival) * base_channels;
        rgb.extend_from_slice(&lookup[offset..offset + base_channels]);
    }
    Some(rgb)
}

fn color_channels(dict: &Dictionary, doc: &Document) -> u32 {
    let Ok(space) = dict.get(b"ColorSpace") else {
        return 3;
    };

    if let Ok(name) = space.as_name() {
        return channels_from_name(std::str::from_utf8(name).unwrap_or(""));
    }

    if let Ok(parts) = space.as_array() {
        let family = parts
            .first()
            .and_then(|o| o.as_name().ok())
            .and_then(|n| std::str::from_utf8(n).ok())
            .unwrap_or("");
        return match family {
            "ICCBased" => parts
                .get(1)
                .and_then(|o| o.as_reference().ok())
                .and_then(|id| doc.get_object(id).ok())
                .and_then(|o| o.as_stream().ok())
                .and_then(|s| int_of(&s.dict, b"N"))
                .map(|n| n as u32)
                .unwrap_or(3),
            "DeviceN" => parts
                .get(1)
                .and_then(|o| o.as_array().ok())
                .map(|names| names.len() as u32)
                .unwrap_or(3),
            "Indexed" | "CalRGB" | "Lab" => 3,
            other => channels_from_name(other),
        };
    }

    space
        .as_reference()
        .ok()
        .and_then(|id| doc.get_object(id).ok())
        .and_then(|o| o.as_name().ok())
        .and_then(|n| std::str::from_utf8(n).ok())
        .map(channels_from_name)
        .unwrap_or(3)
}

fn channels_from_name(name: &str) -> u32 {
    match name {
        "DeviceGray" | "CalGray" | "G" => 1,
        "DeviceCMYK" | "CMYK" => 4,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn gray_image(doc: &mut Document, side: i64) -> ObjectId {
        let pixels = vec![128u8; (side * side) as usize];
        doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => side,
                "Height" => side,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            pixels,
        ))
    }

    /// Two pages; page 2 shows a 20px figure and a 4px icon.
    fn write_pdf(path: &Path) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let figure = gray_image(&mut doc, 20);
        let icon = gray_image(&mut doc, 4);

        let empty = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page1 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => empty,
        });
        let resources = doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im1" => figure, "Im2" => icon },
        });
        let draw = doc.add_object(Stream::new(dictionary! {}, b"q 20 0 0 20 0 0 cm /Im1 Do Q".to_vec()));
        let page2 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => draw,
            "Resources" => resources,
        });

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => 2,
                "Kids" => vec![page1.into(), page2.into()],
                "MediaBox" => vec![0.into(), 0.into(), 200.into(), 200.into()],
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        doc.save(path).unwrap();
    }

    #[test]
    fn extracts_figures_with_page_and_skips_icons() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("figs.pdf");
        write_pdf(&pdf);
        let out = dir.path().join("images");

        let figures = ImageAnalyzer::new(10).extract(&pdf, "figs", &out).unwrap();
        assert_eq!(figures.len(), 1);
        let fig = &figures[0];
        assert_eq!((fig.page, fig.width, fig.height), (2, 20, 20));
        assert_eq!(fig.format, "png");
        assert!(fig.path.exists());
        assert_eq!(fig.path.file_name().unwrap(), "figs_fig_0.png");
    }

    #[test]
    fn raw_raster_checks_length() {
        assert!(raw_raster(&[0u8; 12], 2, 2, 3, 8).is_some());
        assert!(raw_raster(&[0u8; 11], 2, 2, 3, 8).is_none());
        assert!(raw_raster(&[0u8; 16], 2, 2, 4, 8).is_some());
    }

    #[test]
    fn inflate_accepts_zlib_stream() {
        use flate2::write::ZlibEncoder;
        use std::io::Write;
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"pixels").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(manual_inflate(&compressed).unwrap(), b"pixels");
    }

    #[test]
    fn filter_chain_prefers_image_codec() {
        let dict = dictionary! {
            "Filter" => vec![Object::Name(b"ASCII85Decode".to_vec()), Object::Name(b"DCTDecode".to_vec())],
        };
        assert_eq!(filter_name(&dict).as_deref(), Some("DCTDecode"));
    }
}
