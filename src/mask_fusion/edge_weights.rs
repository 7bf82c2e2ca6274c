use image::{Luma, Pixel, Primitive, Rgb};

use crate::error::FusionError;
use crate::utils::validate_non_empty_image;
use crate::Image;

/// Color-similarity weights between 4-connected neighbors
///
/// `horizontal` is `(W - 1) × H`: the weight at `(x, y)` couples pixels
/// `(x, y)` and `(x + 1, y)`. `vertical` is `W × (H - 1)`: the weight at
/// `(x, y)` couples `(x, y)` and `(x, y + 1)`. Every weight lies in `(0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeWeights {
    pub horizontal: Image<Luma<f64>>,
    pub vertical: Image<Luma<f64>>,
}

impl EdgeWeights {
    /// Builds both weight grids with `weight = exp(-(‖Δcolor‖ / sigma)²)`.
    ///
    /// # Errors
    ///
    /// * `FusionError::InvalidParameter` - When `sigma` is not a positive
    ///   finite number or the image is empty
    pub fn from_image<S>(image: &Image<Rgb<S>>, sigma: f64) -> Result<Self, FusionError>
    where
        Rgb<S>: Pixel<Subpixel = S>,
        S: Primitive + Into<f64>,
    {
        let (width, height) = image.dimensions();
        validate_non_empty_image(width, height, "EdgeWeights")?;
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(FusionError::InvalidParameter(format!(
                "sigma must be a positive finite number, got {sigma}"
            )));
        }

        let horizontal = Image::from_fn(width - 1, height, |x, y| {
            Luma([edge_weight(image.get_pixel(x, y), image.get_pixel(x + 1, y), sigma)])
        });
        let vertical = Image::from_fn(width, height - 1, |x, y| {
            Luma([edge_weight(image.get_pixel(x, y), image.get_pixel(x, y + 1), sigma)])
        });

        Ok(Self {
            horizontal,
            vertical,
        })
    }

    /// Number of adjacent pixel pairs.
    pub fn pair_count(&self) -> usize {
        self.horizontal.as_raw().len() + self.vertical.as_raw().len()
    }
}

/// Euclidean distance between two colors.
#[inline]
pub fn color_distance<S>(p: &Rgb<S>, q: &Rgb<S>) -> f64
where
    Rgb<S>: Pixel<Subpixel = S>,
    S: Primitive + Into<f64>,
{
    p.channels()
        .iter()
        .zip(q.channels())
        .map(|(&a, &b)| {
            let d = a.into() - b.into();
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Gaussian similarity of two neighboring colors.
#[inline]
pub fn edge_weight<S>(p: &Rgb<S>, q: &Rgb<S>, sigma: f64) -> f64
where
    Rgb<S>: Pixel<Subpixel = S>,
    S: Primitive + Into<f64>,
{
    let scaled = color_distance(p, q) / sigma;
    (-(scaled * scaled)).exp()
}
