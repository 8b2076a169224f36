use image::{ImageBuffer, Pixel, PixelWithColorType, RgbImage};
use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Encode an 8-bit image as PNG bytes.
pub fn encode_png<P>(image: &ImageBuffer<P, Vec<u8>>) -> Result<Vec<u8>, ExtractionError>
where
    P: Pixel<Subpixel = u8> + PixelWithColorType,
{
    let mut buf = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(buf.into_inner())
}

/// Bounding box in image pixels (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// One recognized token from the OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWordResult {
    pub text: String,
    /// 0.0-1.0
    pub confidence: f32,
    pub bounding_box: Option<BoundingBox>,
}

/// Raw OCR result, tokens in the order the engine produced them.
#[derive(Debug, Clone, Default)]
pub struct OcrPageResult {
    pub words: Vec<OcrWordResult>,
}

impl OcrPageResult {
    /// Token texts joined with single spaces, engine order preserved.
    pub fn joined_text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// OCR engine abstraction (allows mocking for tests)
pub trait OcrEngine {
    /// Recognize text in a PNG-encoded image.
    fn recognize(&self, png_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError>;
}

/// A loaded report PDF: text per page, highlight annotation and rasterization.
///
/// Pages are zero-indexed. Implementations must not mutate themselves;
/// annotated copies are handed back as new PDF bytes.
pub trait ReportDocument {
    fn page_count(&self) -> usize;

    fn page_text(&self, page: usize) -> Result<String, ExtractionError>;

    /// Add a highlight of `rgba` over every occurrence of each literal on `page`
    /// of `pdf_bytes` (this document or an annotated copy of it) and return the
    /// saved, annotated document.
    fn highlight_spans(
        &self,
        pdf_bytes: &[u8],
        page: usize,
        literals: &[String],
        rgba: [u8; 4],
    ) -> Result<Vec<u8>, ExtractionError>;

    /// Rasterize one page of `pdf_bytes` (an annotated copy of this document).
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page: usize,
        dpi: u32,
    ) -> Result<RgbImage, ExtractionError>;

    /// Original document bytes.
    fn bytes(&self) -> &[u8];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_edges_are_exclusive() {
        let b = BoundingBox { x: 10, y: 20, width: 5, height: 3 };
        assert_eq!(b.right(), 15);
        assert_eq!(b.bottom(), 23);
        assert_eq!(b.area(), 15);
    }

    #[test]
    fn joined_text_keeps_engine_order() {
        let result = OcrPageResult {
            words: ["2", "7", "mm"]
                .iter()
                .map(|t| OcrWordResult {
                    text: t.to_string(),
                    confidence: 0.9,
                    bounding_box: None,
                })
                .collect(),
        };
        assert_eq!(result.joined_text(), "2 7 mm");
    }

    #[test]
    fn encode_png_writes_signature() {
        let png = encode_png(&RgbImage::new(4, 3)).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }
}
