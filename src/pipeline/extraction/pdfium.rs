//! Report PDF access via Google PDFium.
//!
//! Text extraction, literal search with highlight annotation, and page
//! rasterization. `Pdfium` is `!Send`, so every operation binds the library
//! afresh; the OS caches the `dlopen`, so repeat binds are cheap.

use image::RgbImage;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::types::ReportDocument;
use super::ExtractionError;

/// Maximum dimension (width or height) for rendered page images.
const MAX_DIMENSION_PX: u32 = 4096;

/// PDF points per inch (standard PDF unit).
const POINTS_PER_INCH: f32 = 72.0;

/// A report PDF held in memory, with page texts extracted once at load.
pub struct PdfiumReport {
    bytes: Vec<u8>,
    page_texts: Vec<String>,
}

impl PdfiumReport {
    /// Parse the document and cache the text of every page.
    pub fn load(bytes: Vec<u8>) -> Result<Self, ExtractionError> {
        let page_texts = {
            let pdfium = load_pdfium()?;
            let document = pdfium
                .load_pdf_from_byte_slice(&bytes, None)
                .map_err(map_load_error)?;

            let mut texts = Vec::with_capacity(document.pages().len() as usize);
            for (index, page) in document.pages().iter().enumerate() {
                let text = page
                    .text()
                    .map_err(|e| ExtractionError::PdfParsing(format!("page {index}: {e}")))?
                    .all();
                texts.push(text);
            }
            texts
        };

        debug!(pages = page_texts.len(), size = bytes.len(), "Loaded report PDF");
        Ok(Self { bytes, page_texts })
    }
}

/// Load the PDFium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path)
/// 2. Alongside the running executable
/// 3. System library search paths
fn load_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| ExtractionError::PdfRendering {
            page: 0,
            reason: format!("Failed to load PDFium from {path}: {e}"),
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let lib_path =
                Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                debug!(dir = %exe_dir.display(), "Loaded PDFium next to executable");
                return Ok(Pdfium::new(bindings));
            }
        }
    }

    let bindings =
        Pdfium::bind_to_system_library().map_err(|e| ExtractionError::PdfRendering {
            page: 0,
            reason: format!(
                "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
            ),
        })?;
    Ok(Pdfium::new(bindings))
}

fn map_load_error(e: PdfiumError) -> ExtractionError {
    ExtractionError::PdfParsing(format!("Failed to load PDF: {e}"))
}

/// Re-opening an annotated copy is part of one page's stage, not a document failure.
fn map_reload_error(page: usize) -> impl Fn(PdfiumError) -> ExtractionError {
    move |e| ExtractionError::PdfRendering {
        page,
        reason: format!("Failed to reopen annotated PDF: {e}"),
    }
}

fn page_index(page: usize) -> Result<u16, ExtractionError> {
    u16::try_from(page).map_err(|_| ExtractionError::PdfRendering {
        page,
        reason: format!("Page index {page} exceeds u16 maximum"),
    })
}

/// Compute pixel dimensions for rendering, applying the dimension guard.
///
/// Returns (width_px, height_px), both clamped to [1, MAX_DIMENSION_PX].
/// Preserves aspect ratio when capping.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

fn rgba_to_pdf_color(rgba: [u8; 4]) -> PdfColor {
    PdfColor::new(rgba[0], rgba[1], rgba[2], rgba[3])
}

impl ReportDocument for PdfiumReport {
    fn page_count(&self) -> usize {
        self.page_texts.len()
    }

    fn page_text(&self, page: usize) -> Result<String, ExtractionError> {
        self.page_texts.get(page).cloned().ok_or_else(|| {
            ExtractionError::PdfParsing(format!(
                "Page {page} out of range (document has {} pages)",
                self.page_texts.len()
            ))
        })
    }

    fn highlight_spans(
        &self,
        pdf_bytes: &[u8],
        page: usize,
        literals: &[String],
        rgba: [u8; 4],
    ) -> Result<Vec<u8>, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_reload_error(page))?;
        let index = page_index(page)?;
        let annotate_err = |e: PdfiumError| ExtractionError::PdfRendering {
            page,
            reason: format!("Highlight annotation failed: {e}"),
        };

        let mut pdf_page = document.pages().get(index).map_err(|_| {
            ExtractionError::PdfRendering {
                page,
                reason: format!(
                    "Page {page} out of range (document has {} pages)",
                    document.pages().len()
                ),
            }
        })?;

        let rects: Vec<PdfRect> = {
            let text = pdf_page.text().map_err(annotate_err)?;
            let options = PdfSearchOptions::new();
            let mut rects = Vec::new();
            for literal in literals {
                let search = text.search(literal, &options).map_err(annotate_err)?;
                for segments in search.iter(PdfSearchDirection::SearchForward) {
                    rects.extend(segments.iter().map(|segment| segment.bounds()));
                }
            }
            rects
        };

        if rects.is_empty() {
            warn!(page, ?literals, "Anchor text not found by positional search");
        }

        for rect in &rects {
            let mut annotation = pdf_page
                .annotations_mut()
                .create_highlight_annotation()
                .map_err(annotate_err)?;
            annotation.set_bounds(*rect).map_err(annotate_err)?;
            annotation
                .attachment_points_mut()
                .create_attachment_point_at_end(PdfQuadPoints::from_rect(rect))
                .map_err(annotate_err)?;
            annotation
                .set_stroke_color(rgba_to_pdf_color(rgba))
                .map_err(annotate_err)?;
        }

        debug!(page, highlights = rects.len(), "Applied highlight annotations");
        drop(pdf_page);

        document.save_to_bytes().map_err(annotate_err)
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page: usize,
        dpi: u32,
    ) -> Result<RgbImage, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_reload_error(page))?;

        let pages = document.pages();
        let pdf_page = pages
            .get(page_index(page)?)
            .map_err(|_| ExtractionError::PdfRendering {
                page,
                reason: format!(
                    "Page {page} out of range (document has {} pages)",
                    pages.len()
                ),
            })?;

        let (target_w, target_h) =
            compute_render_dimensions(pdf_page.width().value, pdf_page.height().value, dpi);

        let config = PdfRenderConfig::new()
            .set_target_width(target_w as i32)
            .set_maximum_height(target_h as i32)
            .render_annotations(true);

        let bitmap = pdf_page
            .render_with_config(&config)
            .map_err(|e| ExtractionError::PdfRendering {
                page,
                reason: format!("Rendering failed: {e}"),
            })?;

        let image = bitmap.as_image().to_rgb8();
        debug!(page, width = image.width(), height = image.height(), "Rendered PDF page");
        Ok(image)
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

// ── Mock for testing ──────────────────────────────────────

/// One synthetic page: its text, its raster, and where its anchor sits.
#[derive(Clone)]
pub struct MockPage {
    pub text: String,
    pub image: RgbImage,
    /// Pixel rectangle painted when the page is highlighted.
    pub anchor_rect: Option<super::types::BoundingBox>,
}

/// In-memory report used by pipeline tests without the PDFium binary.
///
/// Highlighting is recorded in the returned bytes as
/// `MOCK-HIGHLIGHT:<page>:<r>,<g>,<b>;` entries; rendering paints
/// `anchor_rect` with that colour.
pub struct MockReportDocument {
    pages: Vec<MockPage>,
    bytes: Vec<u8>,
}

impl MockReportDocument {
    pub fn new(pages: Vec<MockPage>) -> Self {
        Self {
            pages,
            bytes: b"%PDF-mock".to_vec(),
        }
    }

    /// Text-only pages rendered as blank white rasters.
    pub fn from_texts(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|t| MockPage {
                    text: t.to_string(),
                    image: RgbImage::from_pixel(64, 64, image::Rgb([255, 255, 255])),
                    anchor_rect: None,
                })
                .collect(),
        )
    }
}

impl ReportDocument for MockReportDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, page: usize) -> Result<String, ExtractionError> {
        self.pages
            .get(page)
            .map(|p| p.text.clone())
            .ok_or_else(|| ExtractionError::PdfParsing(format!("Page {page} out of range")))
    }

    fn highlight_spans(
        &self,
        pdf_bytes: &[u8],
        page: usize,
        literals: &[String],
        rgba: [u8; 4],
    ) -> Result<Vec<u8>, ExtractionError> {
        let text = self.page_text(page)?.to_lowercase();
        let mut out = pdf_bytes.to_vec();
        if literals.iter().any(|l| text.contains(&l.to_lowercase())) {
            out.extend_from_slice(
                format!("MOCK-HIGHLIGHT:{page}:{},{},{};", rgba[0], rgba[1], rgba[2]).as_bytes(),
            );
        }
        Ok(out)
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page: usize,
        _dpi: u32,
    ) -> Result<RgbImage, ExtractionError> {
        let mock = self.pages.get(page).ok_or_else(|| ExtractionError::PdfRendering {
            page,
            reason: format!("Page {page} out of range (mock has {} pages)", self.pages.len()),
        })?;
        let mut image = mock.image.clone();

        let marker = format!("MOCK-HIGHLIGHT:{page}:");
        let recorded = String::from_utf8_lossy(pdf_bytes);
        if let (Some(rect), Some(start)) = (mock.anchor_rect, recorded.find(&marker)) {
            let rest = &recorded[start + marker.len()..];
            let rgb: Vec<u8> = rest
                .split(';')
                .next()
                .unwrap_or_default()
                .split(',')
                .filter_map(|c| c.parse().ok())
                .collect();
            if rgb.len() == 3 {
                for y in rect.y..rect.bottom().min(image.height()) {
                    for x in rect.x..rect.right().min(image.width()) {
                        image.put_pixel(x, y, image::Rgb([rgb[0], rgb[1], rgb[2]]));
                    }
                }
            }
        }
        Ok(image)
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
