//! Calibration constants for the visual extraction pipeline.
//!
//! Every pixel quantity assumes pages rasterized at `DEFAULT_RENDER_DPI`.
//! The three visual targets share one pipeline; `derive_options` maps each
//! target to its padding, crop height and tail stages.

use serde::Serialize;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Page rasterization resolution. Paddings and crop heights below are tuned for it.
pub const DEFAULT_RENDER_DPI: u32 = 200;

/// OpenCV-convention HSV bounds (H in 0..180, S/V in 0..=255).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| hsv[i] >= self.lower[i] && hsv[i] <= self.upper[i])
    }
}

/// Band the anchor highlight renders into. Pure green (0,255,0) lands at H=60.
pub const HIGHLIGHT_HSV: HsvRange = HsvRange {
    lower: [35, 50, 50],
    upper: [85, 255, 255],
};

/// Band of the yellow measurement labels drawn on ICD cross-section images.
pub const INDICATOR_HSV: HsvRange = HsvRange {
    lower: [20, 50, 50],
    upper: [40, 255, 255],
};

/// Highlight annotation colour (RGBA). Machine marker, not for human readers.
pub const HIGHLIGHT_STROKE_RGBA: [u8; 4] = [0, 255, 0, 255];

/// Largest physically plausible millimetre reading; OCR digit runs above it are rescaled.
pub const MAX_PLAUSIBLE_MM: f64 = 99.0;

/// Structuring element used to close and open the indicator mask: OpenCV's
/// 5x5 `MORPH_ELLIPSE`, 17 pixels. A radius-2 `Norm::L2` disk is smaller (13).
pub const MASK_MORPHOLOGY_ELLIPSE: [[u8; 5]; 5] = [
    [0, 0, 1, 0, 0],
    [1, 1, 1, 1, 1],
    [1, 1, 1, 1, 1],
    [1, 1, 1, 1, 1],
    [0, 0, 1, 0, 0],
];

/// Sigma equivalent of a 5x5 Gaussian kernel with automatic sigma.
pub const MASK_BLUR_SIGMA: f32 = 1.1;

/// Canny thresholds for the refiner pass.
///
/// imageproc's `canny` applies a sigma 1.4 Gaussian before the Sobel step,
/// which OpenCV's does not, so faint edges can drop out at these thresholds.
pub const REFINE_CANNY_LOW: f32 = 50.0;
pub const REFINE_CANNY_HIGH: f32 = 150.0;

/// Contrast boost applied to calcium-score crops before OCR (PIL enhance factor).
pub const CALCIUM_CONTRAST_FACTOR: f32 = 2.5;

/// PIL's `ImageFilter.SHARPEN` (32 centre, -2 ring, scale 16), pre-divided.
/// imageproc's `sharpen3x3` is a weaker 5/-1 Laplacian cross.
#[rustfmt::skip]
pub const CALCIUM_SHARPEN_KERNEL: [f32; 9] = [
    -0.125, -0.125, -0.125,
    -0.125,  2.0,   -0.125,
    -0.125, -0.125, -0.125,
];

/// First page index that can hold ICD anchors (cover page never does).
pub const ICD_SEARCH_START: usize = 1;

/// First page index that can hold calcification/calcium anchors.
pub const CALCIFICATION_SEARCH_START: usize = 2;

/// Only these leading pages are read for plain-text fields.
pub const TEXT_FIELD_PAGES: usize = 2;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// What a visual pipeline run is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualTarget {
    /// Inter-commissural distance at 4, 6 or 8 mm above the annulus.
    Icd(IcdLevel),
    /// The aortic valve calcification image (crop only).
    Calcification,
    /// The calcium score printed under the calcification image.
    CalciumScore,
}

impl VisualTarget {
    /// File-safe name used for artifacts and log fields.
    pub fn slug(&self) -> String {
        match self {
            Self::Icd(level) => format!("icd{}mm", level.millimetres()),
            Self::Calcification => "calcification".into(),
            Self::CalciumScore => "calcium-score".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IcdLevel {
    Mm4,
    Mm6,
    Mm8,
}

impl IcdLevel {
    pub const ALL: [IcdLevel; 3] = [IcdLevel::Mm4, IcdLevel::Mm6, IcdLevel::Mm8];

    pub fn millimetres(&self) -> u8 {
        match self {
            Self::Mm4 => 4,
            Self::Mm6 => 6,
            Self::Mm8 => 8,
        }
    }
}

/// How the crop is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadoutMode {
    /// Crop only, no OCR.
    None,
    /// Isolate the yellow indicator band, concatenate digits, rescale into [0, 100).
    IndicatorDigits,
    /// Enhance, OCR, and read the number following "Total".
    CalciumTotal,
}

/// Options record selecting the behaviour of one visual pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualPipelineOptions {
    /// Case-insensitive anchor patterns, tried in order on each page.
    pub anchor_patterns: Vec<String>,
    /// First page index searched.
    pub search_start: usize,
    /// Horizontal padding on both sides of the highlight, in pixels.
    pub x_padding: u32,
    /// Height of the window below the highlight, in pixels.
    pub crop_height: u32,
    /// Run the edge-based refiner on the crop.
    pub refine: bool,
    pub readout: ReadoutMode,
}

// ═══════════════════════════════════════════════════════════
// Derivation
// ═══════════════════════════════════════════════════════════

/// Anchor spellings seen across report templates for one ICD level.
pub fn icd_anchor_patterns(level: IcdLevel) -> Vec<String> {
    let mm = level.millimetres();
    vec![
        format!("ICD @{mm}mm"),
        format!("Inter commisural distance @{mm}mm"),
        format!("ICD @ {mm}mm"),
    ]
}

pub const CALCIFICATION_ANCHOR: &str = r"(?i)aortic valve calcification";

/// Derive pipeline options for a target.
///
/// ICD crops are wider because the measurement overlay spans the whole
/// cross-section image; the calcification panel is narrower.
pub fn derive_options(target: VisualTarget) -> VisualPipelineOptions {
    match target {
        VisualTarget::Icd(level) => VisualPipelineOptions {
            anchor_patterns: icd_anchor_patterns(level),
            search_start: ICD_SEARCH_START,
            x_padding: 400,
            crop_height: 800,
            refine: true,
            readout: ReadoutMode::IndicatorDigits,
        },
        VisualTarget::Calcification => VisualPipelineOptions {
            anchor_patterns: vec![CALCIFICATION_ANCHOR.into()],
            search_start: CALCIFICATION_SEARCH_START,
            x_padding: 300,
            crop_height: 800,
            refine: true,
            readout: ReadoutMode::None,
        },
        VisualTarget::CalciumScore => VisualPipelineOptions {
            anchor_patterns: vec![CALCIFICATION_ANCHOR.into()],
            search_start: CALCIFICATION_SEARCH_START,
            x_padding: 300,
            crop_height: 800,
            refine: false,
            readout: ReadoutMode::CalciumTotal,
        },
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icd_options_use_wide_padding() {
        let options = derive_options(VisualTarget::Icd(IcdLevel::Mm6));
        assert_eq!(options.x_padding, 400);
        assert_eq!(options.crop_height, 800);
        assert_eq!(options.search_start, 1);
        assert_eq!(options.readout, ReadoutMode::IndicatorDigits);
        assert_eq!(
            options.anchor_patterns,
            vec!["ICD @6mm", "Inter commisural distance @6mm", "ICD @ 6mm"]
        );
    }

    #[test]
    fn calcification_options_are_crop_only() {
        let options = derive_options(VisualTarget::Calcification);
        assert_eq!(options.x_padding, 300);
        assert_eq!(options.search_start, 2);
        assert_eq!(options.readout, ReadoutMode::None);
    }

    #[test]
    fn calcium_options_read_total() {
        let options = derive_options(VisualTarget::CalciumScore);
        assert_eq!(options.readout, ReadoutMode::CalciumTotal);
        assert_eq!(options.anchor_patterns, vec![CALCIFICATION_ANCHOR]);
        assert!(!options.refine);
    }

    #[test]
    fn pure_green_is_inside_highlight_band() {
        assert!(HIGHLIGHT_HSV.contains([60, 255, 255]));
        assert!(!HIGHLIGHT_HSV.contains([30, 255, 255]));
        assert!(!HIGHLIGHT_HSV.contains([60, 20, 255]));
    }

    #[test]
    fn yellow_is_inside_indicator_band() {
        assert!(INDICATOR_HSV.contains([30, 255, 255]));
        assert!(!INDICATOR_HSV.contains([60, 255, 255]));
    }

    #[test]
    fn slugs_are_file_safe() {
        assert_eq!(VisualTarget::Icd(IcdLevel::Mm8).slug(), "icd8mm");
        assert_eq!(VisualTarget::CalciumScore.slug(), "calcium-score");
    }

    #[test]
    fn visual_target_serializes() {
        let json = serde_json::to_string(&VisualTarget::CalciumScore).unwrap();
        assert_eq!(json, "\"calcium_score\"");
    }
}
