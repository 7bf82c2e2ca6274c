//! Test utilities for maskfusion-ai
//!
//! Synthetic scenes and a deterministic stand-in for the segmentation model.
//! Only compiled when running tests.

use image::{Luma, Rgb, RgbImage};

use crate::error::FusionError;
use crate::mask_fusion::oracle::BoundingBox;
use crate::mask_fusion::weak_mask::WeakMask;
use crate::Image;

/// Left half of the two-tone image
pub const LEFT_COLOR: [u8; 3] = [200, 40, 40];
/// Right half of the two-tone image
pub const RIGHT_COLOR: [u8; 3] = [30, 60, 210];

/// Creates an RGB image filled with a single color.
pub fn create_uniform_image(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
    Image::from_pixel(width, height, Rgb(color))
}

/// Creates an RGB image whose columns `< width / 2` are `LEFT_COLOR` and the
/// rest `RIGHT_COLOR`.
pub fn create_two_tone_image(width: u32, height: u32) -> RgbImage {
    Image::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb(LEFT_COLOR)
        } else {
            Rgb(RIGHT_COLOR)
        }
    })
}

/// Creates a 0/255 mask marking the columns `< split_column` as foreground.
pub fn create_split_scene(width: u32, height: u32, split_column: u32) -> WeakMask {
    Image::from_fn(width, height, |x, _| Luma([if x < split_column { 255 } else { 0 }]))
}

/// Oracle that returns the prompt box itself as the mask.
///
/// Coordinates are inclusive and clamped to the image.
pub fn box_oracle(image: &RgbImage, prompt: &BoundingBox) -> Result<WeakMask, FusionError> {
    let (width, height) = image.dimensions();
    let inside = |value: u32, low: i64, high: i64| {
        let value = i64::from(value);
        low <= value && value <= high
    };
    Ok(Image::from_fn(width, height, |x, y| {
        let hit = inside(x, prompt.x0, prompt.x1) && inside(y, prompt.y0, prompt.y1);
        Luma([if hit { 255 } else { 0 }])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_two_tone_image_splits_at_half_width() {
        let image = create_two_tone_image(5, 2);
        assert_eq!(image.get_pixel(1, 1), &Rgb(LEFT_COLOR));
        assert_eq!(image.get_pixel(2, 0), &Rgb(RIGHT_COLOR));
    }

    #[test]
    fn create_split_scene_marks_leading_columns() {
        let scene = create_split_scene(3, 1, 1);
        assert_eq!(scene.as_raw(), &vec![255, 0, 0]);
    }

    #[test]
    fn box_oracle_clamps_to_image() {
        let image = create_uniform_image(3, 2, [0, 0, 0]);
        let mask = box_oracle(&image, &BoundingBox::new(-5, 1, 1, 9)).unwrap();
        assert_eq!(mask.as_raw(), &vec![0, 0, 0, 255, 255, 0]);
    }

    #[test]
    fn box_oracle_ignores_inverted_boxes() {
        let image = create_uniform_image(3, 2, [0, 0, 0]);
        let mask = box_oracle(&image, &BoundingBox::new(2, 0, 1, 1)).unwrap();
        assert!(mask.pixels().all(|Luma([v])| *v == 0));
    }
}
