use image::Luma;

use crate::error::FusionError;
use crate::utils::{is_foreground, validate_matching_dimensions};
use crate::Image;

/// A weak segmentation hint; non-zero pixels are foreground.
///
/// The aggregate mask built from box prompts stores per-pixel counts, so any
/// value above zero is meaningful.
pub type WeakMask = Image<Luma<u8>>;

/// The fused output: one 0/1 label per pixel.
pub type LabelGrid = Image<Luma<u8>>;

/// How the two weak masks relate at a single pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agreement {
    /// Both masks mark the pixel as foreground
    Foreground,
    /// Both masks mark the pixel as background
    Background,
    /// The masks disagree; the label is left to the optimizer
    Disputed,
}

impl Agreement {
    /// The label both masks agree on, if any.
    #[inline]
    pub fn agreed_label(self) -> Option<u8> {
        match self {
            Self::Foreground => Some(1),
            Self::Background => Some(0),
            Self::Disputed => None,
        }
    }
}

/// The aggregate-box mask and the auxiliary mask of one image.
#[derive(Debug, Clone, Copy)]
pub struct MaskPair<'a> {
    aggregate: &'a WeakMask,
    auxiliary: &'a WeakMask,
}

impl<'a> MaskPair<'a> {
    /// Pairs the two weak masks after checking they share an extent.
    pub fn new(aggregate: &'a WeakMask, auxiliary: &'a WeakMask) -> Result<Self, FusionError> {
        validate_matching_dimensions(aggregate, auxiliary, "MaskPair")?;
        Ok(Self {
            aggregate,
            auxiliary,
        })
    }

    pub fn aggregate(&self) -> &'a WeakMask {
        self.aggregate
    }

    pub fn auxiliary(&self) -> &'a WeakMask {
        self.auxiliary
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.aggregate.dimensions()
    }

    #[inline]
    pub fn aggregate_at(&self, x: u32, y: u32) -> bool {
        is_foreground(self.aggregate.get_pixel(x, y))
    }

    #[inline]
    pub fn auxiliary_at(&self, x: u32, y: u32) -> bool {
        is_foreground(self.auxiliary.get_pixel(x, y))
    }

    #[inline]
    pub fn agreement_at(&self, x: u32, y: u32) -> Agreement {
        match (self.aggregate_at(x, y), self.auxiliary_at(x, y)) {
            (true, true) => Agreement::Foreground,
            (false, false) => Agreement::Background,
            _ => Agreement::Disputed,
        }
    }

    /// Number of pixels the optimizer is free to label.
    pub fn disputed_count(&self) -> usize {
        let (width, height) = self.dimensions();
        itertools::iproduct!(0..height, 0..width)
            .filter(|&(y, x)| self.agreement_at(x, y) == Agreement::Disputed)
            .count()
    }
}

/// Sums box-prompted masks into a single aggregate count mask.
///
/// Counts saturate at `u8::MAX`. Every mask must match `dimensions`.
pub fn accumulate_masks<I>(dimensions: (u32, u32), masks: I) -> Result<WeakMask, FusionError>
where
    I: IntoIterator<Item = WeakMask>,
{
    let (width, height) = dimensions;
    let mut aggregate: WeakMask = Image::new(width, height);

    for mask in masks {
        validate_matching_dimensions(&aggregate, &mask, "accumulate_masks")?;
        aggregate
            .pixels_mut()
            .zip(mask.pixels())
            .for_each(|(total, pixel)| {
                if is_foreground(pixel) {
                    total.0[0] = total.0[0].saturating_add(1);
                }
            });
    }

    Ok(aggregate)
}

/// Encodes a label grid as a 0/255 mask image ready to be written to disk.
pub fn to_mask_image(labels: &LabelGrid) -> Image<Luma<u8>> {
    imageproc::map::map_colors(labels, |pixel| {
        Luma([if is_foreground(&pixel) { u8::MAX } else { 0 }])
    })
}
