use image::RgbImage;
use log::debug;

use crate::error::FusionError;
use crate::mask_fusion::weak_mask::{accumulate_masks, WeakMask};

/// Box prompt in pixel coordinates, `x0,y0` top-left and `x1,y1` bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl BoundingBox {
    pub fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// The box as `[x0, y0, x1, y1]`.
    pub fn to_xyxy(&self) -> [i64; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }
}

/// A promptable segmentation model
///
/// Given an image and a box prompt it returns one mask over the whole image
/// extent; non-zero pixels are foreground. The model itself lives outside
/// this crate.
pub trait SegmentationOracle {
    fn segment(&self, image: &RgbImage, prompt: &BoundingBox) -> Result<WeakMask, FusionError>;
}

impl<F> SegmentationOracle for F
where
    F: Fn(&RgbImage, &BoundingBox) -> Result<WeakMask, FusionError>,
{
    fn segment(&self, image: &RgbImage, prompt: &BoundingBox) -> Result<WeakMask, FusionError> {
        self(image, prompt)
    }
}

/// Queries the oracle once per box and sums the masks.
///
/// # Errors
///
/// * `FusionError::DimensionMismatch` - When the oracle returns a mask whose
///   extent differs from the image
/// * Any error raised by the oracle
pub fn aggregate_box_masks<O>(
    oracle: &O,
    image: &RgbImage,
    prompts: &[BoundingBox],
) -> Result<WeakMask, FusionError>
where
    O: SegmentationOracle + ?Sized,
{
    let masks = prompts
        .iter()
        .map(|prompt| oracle.segment(image, prompt))
        .collect::<Result<Vec<_>, _>>()?;
    debug!("aggregating {} box-prompted masks", masks.len());
    accumulate_masks(image.dimensions(), masks)
}
