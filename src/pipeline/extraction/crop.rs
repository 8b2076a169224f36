//! Crop window below a located highlight.

use image::RgbImage;
use serde::Serialize;

use super::types::BoundingBox;

/// Half-open pixel window `[x_start, x_end) x [y_start, y_end)`.
///
/// Always within the image; may be empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropWindow {
    pub x_start: u32,
    pub x_end: u32,
    pub y_start: u32,
    pub y_end: u32,
}

impl CropWindow {
    pub fn width(&self) -> u32 {
        self.x_end - self.x_start
    }

    pub fn height(&self) -> u32 {
        self.y_end - self.y_start
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Copy the window out of `image`.
    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        image::imageops::crop_imm(image, self.x_start, self.y_start, self.width(), self.height())
            .to_image()
    }
}

/// Pad the region horizontally on both sides and take `height` rows starting
/// right below it, clamped to an image of `image_size` (width, height).
pub fn compute_crop_window(
    region: BoundingBox,
    padding: u32,
    height: u32,
    image_size: (u32, u32),
) -> CropWindow {
    let (image_w, image_h) = image_size;

    let x_start = region.x.saturating_sub(padding).min(image_w);
    let x_end = region
        .x
        .saturating_add(region.width)
        .saturating_add(padding)
        .min(image_w)
        .max(x_start);

    let y_start = region.y.saturating_add(region.height).min(image_h);
    let y_end = y_start.saturating_add(height).min(image_h);

    CropWindow {
        x_start,
        x_end,
        y_start,
        y_end,
    }
}
