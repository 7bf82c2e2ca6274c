//! Internal utility functions for maskfusion-ai.
//!
//! This module contains validation and mask helpers shared by the fusion stages.

use image::{GenericImageView, Luma};

use crate::error::FusionError;
use crate::Image;

/// Validates that an image has non-zero dimensions.
///
/// # Arguments
///
/// * `width` - The width of the image
/// * `height` - The height of the image
/// * `context` - A description of the context for error messages
///
/// # Returns
///
/// `Ok(())` if the dimensions are valid, otherwise an error
pub fn validate_non_empty_image(width: u32, height: u32, context: &str) -> Result<(), FusionError> {
    if width == 0 || height == 0 {
        Err(FusionError::InvalidParameter(format!(
            "{context}: Image dimensions must be non-zero"
        )))
    } else {
        Ok(())
    }
}

/// Validates that two images have matching dimensions.
///
/// # Arguments
///
/// * `expected` - The reference image (usually the input photo)
/// * `actual` - The image that must share its extent
/// * `context` - A description of the context for error messages
///
/// # Returns
///
/// `Ok(())` if the dimensions match, otherwise `FusionError::DimensionMismatch`
pub fn validate_matching_dimensions<A, B>(
    expected: &A,
    actual: &B,
    context: &str,
) -> Result<(), FusionError>
where
    A: GenericImageView,
    B: GenericImageView,
{
    let expected = expected.dimensions();
    let actual = actual.dimensions();
    if expected != actual {
        Err(FusionError::DimensionMismatch {
            context: context.to_string(),
            expected,
            actual,
        })
    } else {
        Ok(())
    }
}

/// Returns whether a mask pixel counts as foreground.
#[inline]
pub fn is_foreground(Luma([value]): &Luma<u8>) -> bool {
    *value != 0
}

/// Thresholds a weak mask into a strict 0/1 label image.
pub fn binarize(mask: &Image<Luma<u8>>) -> Image<Luma<u8>> {
    imageproc::map::map_colors(mask, |pixel| Luma([u8::from(is_foreground(&pixel))]))
}
