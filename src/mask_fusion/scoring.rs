use image::Luma;

use crate::error::FusionError;
use crate::utils::{is_foreground, validate_matching_dimensions};
use crate::Image;

/// Dice overlap `2|A ∩ B| / (|A| + |B|)` of two masks.
///
/// Non-zero pixels count as members. Two empty masks give `NaN`: the overlap
/// is undefined rather than perfect or absent.
///
/// # Errors
///
/// * `FusionError::DimensionMismatch` - When the masks differ in extent
///
/// # Examples
///
/// ```no_run
/// use image::Luma;
/// use maskfusion_ai::{dice_coefficient, Image};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let truth: Image<Luma<u8>> = Image::from_pixel(4, 4, Luma([255]));
/// let prediction: Image<Luma<u8>> = Image::from_pixel(4, 4, Luma([1]));
/// assert_eq!(dice_coefficient(&truth, &prediction)?, 1.0);
/// # Ok(())
/// # }
/// ```
pub fn dice_coefficient(
    ground_truth: &Image<Luma<u8>>,
    prediction: &Image<Luma<u8>>,
) -> Result<f64, FusionError> {
    validate_matching_dimensions(ground_truth, prediction, "dice_coefficient")?;

    let (volume_sum, intersection) = ground_truth.pixels().zip(prediction.pixels()).fold(
        (0usize, 0usize),
        |(sum, both), (a, b)| {
            let (a, b) = (is_foreground(a), is_foreground(b));
            (
                sum + usize::from(a) + usize::from(b),
                both + usize::from(a && b),
            )
        },
    );

    if volume_sum == 0 {
        return Ok(f64::NAN);
    }
    Ok(2.0 * intersection as f64 / volume_sum as f64)
}

/// Arithmetic mean over the defined (non-NaN) scores.
///
/// Returns `NaN` when no score is defined, including for an empty input.
pub fn mean_score<I>(scores: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (total, count) = scores
        .into_iter()
        .filter(|s| !s.is_nan())
        .fold((0.0, 0usize), |(total, count), s| (total + s, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        total / count as f64
    }
}
