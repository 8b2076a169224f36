//! One configurable visual pipeline for every image-borne field:
//! anchor → highlight → rasterize → segment → crop → (refine) → readout.

use std::time::Instant;

use image::RgbImage;
use serde::Serialize;

use super::anchor::locate_anchor;
use super::crop::{compute_crop_window, CropWindow};
use super::highlight::highlight_anchor;
use super::normalize::{read_calcium_total, read_indicator_value, CalciumReading, NormalizedReading};
use super::scratch::ScratchContext;
use super::segment::{crop_to, locate_region, refine_region};
use super::types::{encode_png, BoundingBox, OcrEngine, ReportDocument};
use super::ExtractionError;
use crate::pipeline_config::{ReadoutMode, VisualPipelineOptions, VisualTarget, HIGHLIGHT_HSV};

/// Value read from a crop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum VisualReading {
    Indicator(NormalizedReading),
    Calcium(CalciumReading),
}

impl VisualReading {
    /// Value as stored in the measurement set.
    pub fn raw_value(&self) -> String {
        match self {
            Self::Indicator(r) => r.to_string(),
            Self::Calcium(r) => r.value.clone(),
        }
    }
}

/// Geometry and outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct VisualResult {
    pub target: VisualTarget,
    pub page: usize,
    pub region: BoundingBox,
    pub window: CropWindow,
    /// Tightened box inside the crop, when the refiner ran and found one.
    pub refined: Option<BoundingBox>,
    pub reading: Option<VisualReading>,
}

/// Pipeline bound to one document and OCR engine.
///
/// Runs are strictly sequential; each is a full independent pass.
pub struct VisualPipeline<'a> {
    doc: &'a dyn ReportDocument,
    ocr: &'a dyn OcrEngine,
    render_dpi: u32,
    refine_enabled: bool,
}

impl<'a> VisualPipeline<'a> {
    pub fn new(
        doc: &'a dyn ReportDocument,
        ocr: &'a dyn OcrEngine,
        render_dpi: u32,
        refine_enabled: bool,
    ) -> Self {
        Self {
            doc,
            ocr,
            render_dpi,
            refine_enabled,
        }
    }

    /// Execute one run. Crop artifacts are stored in `scratch` before the
    /// readout, so they survive an OCR failure.
    pub fn run(
        &self,
        target: VisualTarget,
        options: &VisualPipelineOptions,
        scratch: &mut ScratchContext,
    ) -> Result<VisualResult, ExtractionError> {
        let started = Instant::now();
        let slug = target.slug();

        let anchor = locate_anchor(self.doc, &options.anchor_patterns, options.search_start)?;
        let annotated = highlight_anchor(self.doc, &anchor)?;
        let page_image = self.doc.render_page(&annotated, anchor.page, self.render_dpi)?;

        let region = locate_region(&page_image, HIGHLIGHT_HSV, anchor.page)?;
        let window = compute_crop_window(
            region,
            options.x_padding,
            options.crop_height,
            page_image.dimensions(),
        );
        let crop = window.apply(&page_image);

        if !window.is_empty() {
            scratch.store(format!("{slug}-crop.png"), encode_png(&crop)?);
        }

        let refined = if options.refine && self.refine_enabled && !window.is_empty() {
            self.refine(&crop, &slug, scratch)?
        } else {
            None
        };

        let reading = self.read(options.readout, &crop)?;

        tracing::info!(
            run = %slug,
            page = anchor.page,
            window_w = window.width(),
            window_h = window.height(),
            value = reading.as_ref().map(|r| r.raw_value()).unwrap_or_default(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Visual pipeline run complete"
        );

        Ok(VisualResult {
            target,
            page: anchor.page,
            region,
            window,
            refined,
            reading,
        })
    }

    /// A refiner miss keeps the untrimmed crop.
    fn refine(
        &self,
        crop: &RgbImage,
        slug: &str,
        scratch: &mut ScratchContext,
    ) -> Result<Option<BoundingBox>, ExtractionError> {
        match refine_region(crop) {
            Ok(rect) => {
                let tight = crop_to(crop, rect);
                scratch.store(format!("{slug}-refined.png"), encode_png(&tight)?);
                tracing::debug!(run = %slug, ?rect, "Crop refined");
                Ok(Some(rect))
            }
            Err(ExtractionError::NoContour) => {
                tracing::debug!(run = %slug, "Refiner found no contour, keeping crop");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn read(
        &self,
        mode: ReadoutMode,
        crop: &RgbImage,
    ) -> Result<Option<VisualReading>, ExtractionError> {
        Ok(match mode {
            ReadoutMode::None => None,
            ReadoutMode::IndicatorDigits => Some(VisualReading::Indicator(read_indicator_value(
                self.ocr, crop,
            )?)),
            ReadoutMode::CalciumTotal => {
                Some(VisualReading::Calcium(read_calcium_total(self.ocr, crop)?))
            }
        })
    }
}
