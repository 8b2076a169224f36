//! Colour segmentation and contour selection on rendered pages and crops.
//!
//! HSV follows the 8-bit OpenCV convention (H = degrees / 2, S and V scaled
//! to 0..=255) so the calibrated bands in `pipeline_config` apply as-is.
//! Contours come from `imageproc::contours::find_contours` (Suzuki-Abe border
//! following, raster scan order); only outer borders without a parent are
//! considered, and ties on area keep the contour found first.

use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::edges::canny;

use super::types::BoundingBox;
use super::ExtractionError;
use crate::pipeline_config::{HsvRange, REFINE_CANNY_HIGH, REFINE_CANNY_LOW};

/// Convert one RGB pixel to OpenCV 8-bit HSV.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(f32::from);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };

    let mut h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        (h / 2.0).round().min(180.0) as u8,
        s.round().min(255.0) as u8,
        max as u8,
    ]
}

/// Binary mask (255 inside the band, 0 outside).
pub fn colour_mask(image: &RgbImage, range: HsvRange) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let hsv = rgb_to_hsv(image.get_pixel(x, y).0);
        Luma([if range.contains(hsv) { 255 } else { 0 }])
    })
}

/// Outermost borders of the foreground components.
fn external_contours(mask: &GrayImage) -> Vec<Contour<u32>> {
    find_contours::<u32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .collect()
}

/// Polygon area of a border (shoelace formula).
pub fn contour_area(contour: &Contour<u32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64)
        .sum();
    twice.abs() / 2.0
}

/// Axis-aligned rectangle enclosing every border point (inclusive pixels).
pub fn bounding_rect(contour: &Contour<u32>) -> Option<BoundingBox> {
    let first = contour.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &contour.points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(BoundingBox {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    })
}

/// First element with the strictly largest score.
fn first_max_by<T>(items: impl IntoIterator<Item = T>, score: impl Fn(&T) -> f64) -> Option<T> {
    let mut best: Option<(f64, T)> = None;
    for item in items {
        let s = score(&item);
        if best.as_ref().map_or(true, |(top, _)| s > *top) {
            best = Some((s, item));
        }
    }
    best.map(|(_, item)| item)
}

/// Bounding rectangle of the largest highlight-coloured component on a page raster.
pub fn locate_region(
    page_image: &RgbImage,
    range: HsvRange,
    page: usize,
) -> Result<BoundingBox, ExtractionError> {
    let mask = colour_mask(page_image, range);
    let contours = external_contours(&mask);

    let largest = first_max_by(contours, contour_area)
        .ok_or(ExtractionError::NoHighlightRegion { page })?;
    let region = bounding_rect(&largest).ok_or(ExtractionError::NoHighlightRegion { page })?;

    tracing::debug!(
        page,
        x = region.x,
        y = region.y,
        width = region.width,
        height = region.height,
        "Highlight region located"
    );
    Ok(region)
}

/// Tighten a crop to the edge contour with the largest bounding box.
///
/// Selection is by bounding-box area, not by distance to the crop centre.
pub fn refine_region(crop: &RgbImage) -> Result<BoundingBox, ExtractionError> {
    if crop.width() == 0 || crop.height() == 0 {
        return Err(ExtractionError::NoContour);
    }
    let gray = image::imageops::grayscale(crop);
    let edges = canny(&gray, REFINE_CANNY_LOW, REFINE_CANNY_HIGH);

    let boxes = external_contours(&edges)
        .iter()
        .filter_map(bounding_rect)
        .collect::<Vec<_>>();

    first_max_by(boxes, |b| b.area() as f64).ok_or(ExtractionError::NoContour)
}

/// Copy out a rectangle, clamped to the image.
pub fn crop_to(image: &RgbImage, rect: BoundingBox) -> RgbImage {
    let x = rect.x.min(image.width());
    let y = rect.y.min(image.height());
    let width = rect.width.min(image.width() - x);
    let height = rect.height.min(image.height() - y);
    image::imageops::crop_imm(image, x, y, width, height).to_image()
}
