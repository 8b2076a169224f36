pub mod types;
pub mod fetch;
pub mod pdfium;
pub mod anchor;
pub mod highlight;
pub mod segment;
pub mod crop;
pub mod ocr;
pub mod normalize;
pub mod fields;
pub mod scratch;
pub mod visual;
pub mod orchestrator;

pub use types::*;
pub use fetch::*;
pub use anchor::*;
pub use crop::*;
pub use fields::*;
pub use orchestrator::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to fetch document from {source_ref}: {reason}")]
    Fetch { source_ref: String, reason: String },

    #[error("No page from index {start} matches any of {patterns:?}")]
    AnchorNotFound { patterns: Vec<String>, start: usize },

    #[error("No highlighted region found on rendered page {page}")]
    NoHighlightRegion { page: usize },

    #[error("No contour found in cropped region")]
    NoContour,

    #[error("OCR produced no numeric content")]
    NoDigitsFound,

    #[error("Invalid anchor pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Tesseract OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },
}

impl ExtractionError {
    /// Whether a failure inside a visual run degrades only that field.
    ///
    /// An unreachable document or a pattern that cannot compile affects every
    /// request alike and aborts. Parsing the original document happens before
    /// any run and is propagated directly.
    pub fn is_field_local(&self) -> bool {
        !matches!(self, Self::Fetch { .. } | Self::InvalidPattern { .. })
    }
}
