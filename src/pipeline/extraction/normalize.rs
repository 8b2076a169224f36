//! Turning OCR output over a crop into a measurement value.
//!
//! Two readouts exist. ICD crops carry the measurement as yellow overlay text:
//! the yellow band is isolated, every digit the engine returns is concatenated
//! and the result is rescaled into `[0, 100)`. The calcium panel prints a
//! "Total" line that is read verbatim with no range cap.

use std::fmt;
use std::sync::LazyLock;

use image::{GrayImage, Luma, RgbImage};
use imageproc::filter::{filter3x3, gaussian_blur_f32, median_filter};
use imageproc::morphology::{grayscale_close, grayscale_open, Mask};
use regex::Regex;
use serde::Serialize;

use super::segment::colour_mask;
use super::types::{encode_png, OcrEngine};
use super::ExtractionError;
use crate::assessment::format_decimal;
use crate::pipeline_config::{
    CALCIUM_CONTRAST_FACTOR, CALCIUM_SHARPEN_KERNEL, INDICATOR_HSV, MASK_BLUR_SIGMA,
    MASK_MORPHOLOGY_ELLIPSE, MAX_PLAUSIBLE_MM,
};

static INDICATOR_KERNEL: LazyLock<Mask> = LazyLock::new(|| {
    let kernel = GrayImage::from_fn(5, 5, |x, y| {
        Luma([MASK_MORPHOLOGY_ELLIPSE[y as usize][x as usize] * 255])
    });
    Mask::from_image(&kernel, 2, 2)
});

static CALCIUM_TOTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Total\s*:\s*([\d.]+)|Total\s*([\d.]+)|Total\s+\w*\s*\s*([\d.]+)")
        .expect("Invalid calcium total pattern")
});

/// A digit run rescaled into the plausible millimetre range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedReading {
    /// Digits as concatenated from the OCR tokens.
    pub digits: String,
    pub value: f64,
    /// How many times the value was divided by ten.
    pub divisions: u32,
}

impl fmt::Display for NormalizedReading {
    /// Integer form when untouched (`"27"`), decimal form once rescaled (`"12.5"`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.divisions == 0 {
            write!(f, "{}", self.value as u64)
        } else {
            f.write_str(&format_decimal(self.value))
        }
    }
}

/// Calcium score as printed after "Total", plus the OCR text it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalciumReading {
    pub value: String,
    pub ocr_text: String,
}

/// Every ASCII digit of `text`, in order.
pub fn concatenate_digits(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Parse the digit run and divide by ten until its integer part is at most 99.
///
/// The fraction is dropped before every division, so only the last one can
/// leave a decimal: `2745` -> `274.5` -> `27.4`.
pub fn rescale_measurement(digits: &str) -> Result<NormalizedReading, ExtractionError> {
    if digits.is_empty() {
        return Err(ExtractionError::NoDigitsFound);
    }
    let mut value = match digits.parse::<u64>() {
        Ok(n) => n as f64,
        Err(_) => digits
            .parse::<f64>()
            .map_err(|_| ExtractionError::NoDigitsFound)?,
    };

    let mut divisions = 0;
    while value.trunc() > MAX_PLAUSIBLE_MM {
        value = value.trunc() / 10.0;
        divisions += 1;
    }

    Ok(NormalizedReading {
        digits: digits.to_string(),
        value,
        divisions,
    })
}

/// Keep only the yellow indicator shades, with a smoothed mask; everything else goes black.
pub fn isolate_indicator_band(image: &RgbImage) -> RgbImage {
    let mask = colour_mask(image, INDICATOR_HSV);
    let mask = grayscale_close(&mask, &INDICATOR_KERNEL);
    let mask = grayscale_open(&mask, &INDICATOR_KERNEL);
    let mask = gaussian_blur_f32(&mask, MASK_BLUR_SIGMA);

    let mut out = RgbImage::new(image.width(), image.height());
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask.get_pixel(x, y).0[0] > 0 {
            *pixel = *image.get_pixel(x, y);
        }
    }
    out
}

/// Read the yellow overlay measurement from an ICD crop.
pub fn read_indicator_value(
    engine: &dyn OcrEngine,
    crop: &RgbImage,
) -> Result<NormalizedReading, ExtractionError> {
    if crop.width() == 0 || crop.height() == 0 {
        return Err(ExtractionError::NoDigitsFound);
    }
    let isolated = isolate_indicator_band(crop);
    let result = engine.recognize(&encode_png(&isolated)?)?;
    let text = result.joined_text();

    let reading = rescale_measurement(&concatenate_digits(&text))?;
    tracing::debug!(ocr_text = %text, value = %reading, divisions = reading.divisions, "Indicator read");
    Ok(reading)
}

/// Contrast boost, grayscale, 3x3 median and sharpen ahead of OCR.
///
/// Contrast blends each channel away from the mean luminance, as photo
/// editors do: `mean + factor * (c - mean)`.
pub fn enhance_for_calcium(crop: &RgbImage) -> GrayImage {
    let gray = image::imageops::grayscale(crop);
    let pixels = (gray.width() as u64 * gray.height() as u64).max(1);
    let mean = (gray.pixels().map(|p| p.0[0] as u64).sum::<u64>() as f32 / pixels as f32).round();

    let mut contrasted = crop.clone();
    for pixel in contrasted.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            let c = mean + CALCIUM_CONTRAST_FACTOR * (*channel as f32 - mean);
            *channel = c.round().clamp(0.0, 255.0) as u8;
        }
    }

    let gray = image::imageops::grayscale(&contrasted);
    let gray = median_filter(&gray, 1, 1);
    sharpen(&gray)
}

fn sharpen(gray: &GrayImage) -> GrayImage {
    filter3x3::<_, f32, u8>(gray, &CALCIUM_SHARPEN_KERNEL)
}

/// First non-empty group of the first "Total" match.
pub fn parse_calcium_total(text: &str) -> Option<String> {
    let captures = CALCIUM_TOTAL.captures(text)?;
    (1..=3)
        .filter_map(|i| captures.get(i))
        .map(|m| m.as_str())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read the calcium score from the calcification panel crop.
pub fn read_calcium_total(
    engine: &dyn OcrEngine,
    crop: &RgbImage,
) -> Result<CalciumReading, ExtractionError> {
    if crop.width() == 0 || crop.height() == 0 {
        return Err(ExtractionError::NoDigitsFound);
    }
    let enhanced = enhance_for_calcium(crop);
    let result = engine.recognize(&encode_png(&enhanced)?)?;
    // Tokens are glued without separator so "Total:" and "1234" read as one line.
    let ocr_text: String = result.words.iter().map(|w| w.text.as_str()).collect();

    let value = parse_calcium_total(&ocr_text).ok_or(ExtractionError::NoDigitsFound)?;
    tracing::debug!(%ocr_text, %value, "Calcium total read");
    Ok(CalciumReading { value, ocr_text })
}
