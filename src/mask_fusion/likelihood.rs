//! Tiled foreground likelihood estimation
//!
//! The image is cut into a `split × split` grid of tiles. Inside every tile a
//! foreground and a background Gaussian mixture are fitted to pixel colors
//! picked out by the weak masks, and each pixel is scored under both:
//!
//! ```text
//! p(x) = f(x) / (f(x) + b(x)),   f = exp(clip(ln fg(x))), b = exp(clip(ln bg(x)))
//! ```
//!
//! Log-densities are clipped to `[-LOG_DENSITY_LIMIT, LOG_DENSITY_LIMIT]` so
//! the ratio never degenerates to `0 / 0` or `inf / inf`.
//!
//! Which pixels feed each mixture is decided by a [`FallbackChain`]: an
//! ordered list of [`CandidateSource`]s tried until one yields more than the
//! minimum sample count.

use image::{Luma, Pixel, Primitive, Rgb};
use itertools::iproduct;
use log::debug;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::error::FusionError;
use crate::mask_fusion::gmm::{Color, GaussianMixture};
use crate::mask_fusion::weak_mask::{Agreement, MaskPair};
use crate::utils::{validate_matching_dimensions, validate_non_empty_image};
use crate::Image;

/// Per-pixel foreground probability in `[0, 1]`
pub type LikelihoodMap = Image<Luma<f64>>;

/// Log-densities are clipped to this magnitude before exponentiation.
pub const LOG_DENSITY_LIMIT: f64 = 100.0;

/// Axis-aligned rectangle of the tile grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    /// Pixel coordinates covered by the tile, row by row.
    pub fn coordinates(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        iproduct!(self.y..self.y + self.height, self.x..self.x + self.width).map(|(y, x)| (x, y))
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// `split × split` partition of an image
///
/// Tile boundaries along each axis sit at `i * len / split`, so the last row
/// and column absorb any remainder. Tiles that would be empty (when an axis
/// is shorter than `split`) are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    tiles: Vec<Tile>,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, split: u32) -> Result<Self, FusionError> {
        if split == 0 {
            return Err(FusionError::InvalidParameter(
                "split must be > 0".to_string(),
            ));
        }

        let columns = axis_bounds(width, split);
        let rows = axis_bounds(height, split);
        let tiles = iproduct!(rows.iter(), columns.iter())
            .filter_map(|(&(y0, y1), &(x0, x1))| {
                (y1 > y0 && x1 > x0).then_some(Tile {
                    x: x0,
                    y: y0,
                    width: x1 - x0,
                    height: y1 - y0,
                })
            })
            .collect();

        Ok(Self { tiles })
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }
}

fn axis_bounds(len: u32, split: u32) -> Vec<(u32, u32)> {
    let boundary = |i: u32| (u64::from(i) * u64::from(len) / u64::from(split)) as u32;
    (0..split)
        .map(|i| {
            let end = if i + 1 == split { len } else { boundary(i + 1) };
            (boundary(i), end)
        })
        .collect()
}

/// A set of pixels whose colors can feed a mixture fit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// Tile pixels both weak masks mark as foreground
    BothForeground,
    /// Tile pixels the auxiliary mask marks as foreground
    AuxiliaryForeground,
    /// Tile pixels the aggregate-box mask marks as foreground
    AggregateForeground,
    /// Tile pixels both weak masks mark as background
    BothBackground,
    /// Pixels anywhere in the image both weak masks mark as background
    ImageBackground,
}

impl CandidateSource {
    fn selects(self, masks: &MaskPair<'_>, x: u32, y: u32) -> bool {
        match self {
            Self::BothForeground => masks.agreement_at(x, y) == Agreement::Foreground,
            Self::AuxiliaryForeground => masks.auxiliary_at(x, y),
            Self::AggregateForeground => masks.aggregate_at(x, y),
            Self::BothBackground | Self::ImageBackground => {
                masks.agreement_at(x, y) == Agreement::Background
            }
        }
    }
}

/// Ordered candidate sources, tried until one has enough samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    sources: Vec<CandidateSource>,
}

impl FallbackChain {
    pub fn new(sources: Vec<CandidateSource>) -> Result<Self, FusionError> {
        if sources.is_empty() {
            return Err(FusionError::InvalidParameter(
                "fallback chain must name at least one candidate source".to_string(),
            ));
        }
        Ok(Self { sources })
    }

    /// both masks → auxiliary mask → aggregate mask
    pub fn foreground() -> Self {
        Self {
            sources: vec![
                CandidateSource::BothForeground,
                CandidateSource::AuxiliaryForeground,
                CandidateSource::AggregateForeground,
            ],
        }
    }

    /// tile background → image-wide background
    pub fn background() -> Self {
        Self {
            sources: vec![
                CandidateSource::BothBackground,
                CandidateSource::ImageBackground,
            ],
        }
    }

    pub fn sources(&self) -> &[CandidateSource] {
        &self.sources
    }

    /// Returns the first source with more than `threshold` samples.
    ///
    /// When every source falls short, the last source of the chain is used
    /// whatever its size. The returned set may be empty.
    pub fn resolve(
        &self,
        context: &SampleContext<'_>,
        tile: &Tile,
        threshold: usize,
    ) -> (CandidateSource, Vec<Color>) {
        let (&last, earlier) = match self.sources.split_last() {
            Some(split) => split,
            None => return (CandidateSource::BothForeground, Vec::new()),
        };

        earlier
            .iter()
            .map(|&source| (source, context.collect(source, tile)))
            .find(|(_, samples)| samples.len() > threshold)
            .unwrap_or_else(|| (last, context.collect(last, tile)))
    }
}

/// What to do when a fallback chain leaves a tile without samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustedFallback {
    /// Assign probability 0.5 to every pixel of the tile
    #[default]
    Neutral,
    /// Fail with `FusionError::DataInsufficiency`
    Fail,
}

/// Image colors and weak masks shared by all tiles of one estimation pass
#[derive(Debug)]
pub struct SampleContext<'a> {
    colors: Vec<Color>,
    width: u32,
    masks: MaskPair<'a>,
    image_background: Vec<Color>,
}

impl<'a> SampleContext<'a> {
    /// Gathers the colors of `image` and its image-wide background samples.
    ///
    /// # Errors
    ///
    /// * `FusionError::DimensionMismatch` - When `image` and `masks` differ in extent
    pub fn new<S>(image: &Image<Rgb<S>>, masks: MaskPair<'a>) -> Result<Self, FusionError>
    where
        Rgb<S>: Pixel<Subpixel = S>,
        S: Primitive + Into<f64>,
    {
        validate_matching_dimensions(image, masks.aggregate(), "SampleContext")?;
        let (width, height) = image.dimensions();
        let colors: Vec<Color> = image
            .pixels()
            .map(|Rgb([r, g, b])| Color::new((*r).into(), (*g).into(), (*b).into()))
            .collect();
        let image_background = iproduct!(0..height, 0..width)
            .filter(|&(y, x)| CandidateSource::ImageBackground.selects(&masks, x, y))
            .map(|(y, x)| colors[(y * width + x) as usize])
            .collect();

        Ok(Self {
            colors,
            width,
            masks,
            image_background,
        })
    }

    #[inline]
    fn color(&self, x: u32, y: u32) -> Color {
        self.colors[(y * self.width + x) as usize]
    }

    fn collect(&self, source: CandidateSource, tile: &Tile) -> Vec<Color> {
        match source {
            CandidateSource::ImageBackground => self.image_background.clone(),
            _ => tile
                .coordinates()
                .filter(|&(x, y)| source.selects(&self.masks, x, y))
                .map(|(x, y)| self.color(x, y))
                .collect(),
        }
    }
}

/// Fits per-tile foreground/background mixtures and produces a likelihood map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikelihoodEstimator {
    split: u32,
    n_components: usize,
    foreground: FallbackChain,
    background: FallbackChain,
    exhausted: ExhaustedFallback,
}

impl LikelihoodEstimator {
    /// Creates an estimator with the default fallback chains.
    ///
    /// `n_components` is both the mixture component count and the sample
    /// count a candidate source must exceed before it is accepted.
    pub fn new(split: u32, n_components: usize) -> Self {
        Self {
            split,
            n_components,
            foreground: FallbackChain::foreground(),
            background: FallbackChain::background(),
            exhausted: ExhaustedFallback::default(),
        }
    }

    pub fn with_foreground_chain(mut self, chain: FallbackChain) -> Self {
        self.foreground = chain;
        self
    }

    pub fn with_background_chain(mut self, chain: FallbackChain) -> Self {
        self.background = chain;
        self
    }

    pub fn with_exhausted_fallback(mut self, policy: ExhaustedFallback) -> Self {
        self.exhausted = policy;
        self
    }

    /// Estimates `P(foreground)` for every pixel.
    ///
    /// # Errors
    ///
    /// * `FusionError::DimensionMismatch` - When image and masks differ in extent
    /// * `FusionError::InvalidParameter` - When the image is empty, `split` or
    ///   `n_components` is zero
    /// * `FusionError::DataInsufficiency` - When a tile runs out of samples
    ///   under `ExhaustedFallback::Fail`
    pub fn estimate<S>(
        &self,
        image: &Image<Rgb<S>>,
        masks: MaskPair<'_>,
    ) -> Result<LikelihoodMap, FusionError>
    where
        Rgb<S>: Pixel<Subpixel = S>,
        S: Primitive + Into<f64>,
    {
        let (width, height) = image.dimensions();
        validate_non_empty_image(width, height, "LikelihoodEstimator")?;
        validate_matching_dimensions(image, masks.aggregate(), "LikelihoodEstimator")?;
        if self.n_components == 0 {
            return Err(FusionError::InvalidParameter(
                "n_components must be > 0".to_string(),
            ));
        }

        let grid = TileGrid::new(width, height, self.split)?;
        let context = SampleContext::new(image, masks)?;

        #[cfg(feature = "rayon")]
        let estimates = grid
            .tiles()
            .par_iter()
            .map(|tile| self.estimate_tile(&context, tile).map(|p| (*tile, p)))
            .collect::<Result<Vec<_>, _>>()?;
        #[cfg(not(feature = "rayon"))]
        let estimates = grid
            .tiles()
            .iter()
            .map(|tile| self.estimate_tile(&context, tile).map(|p| (*tile, p)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut map: LikelihoodMap = Image::new(width, height);
        for (tile, probabilities) in estimates {
            for ((x, y), p) in tile.coordinates().zip(probabilities) {
                map.put_pixel(x, y, Luma([p]));
            }
        }

        Ok(map)
    }

    fn estimate_tile(
        &self,
        context: &SampleContext<'_>,
        tile: &Tile,
    ) -> Result<Vec<f64>, FusionError> {
        let (fg_source, fg_samples) = self.foreground.resolve(context, tile, self.n_components);
        let (bg_source, bg_samples) = self.background.resolve(context, tile, self.n_components);
        debug!(
            "tile ({}, {}) {}x{}: foreground {:?} ({} samples), background {:?} ({} samples)",
            tile.x,
            tile.y,
            tile.width,
            tile.height,
            fg_source,
            fg_samples.len(),
            bg_source,
            bg_samples.len()
        );

        for (context_name, samples) in [("foreground", &fg_samples), ("background", &bg_samples)] {
            if samples.is_empty() {
                return match self.exhausted {
                    ExhaustedFallback::Neutral => Ok(vec![0.5; tile.area()]),
                    ExhaustedFallback::Fail => Err(FusionError::DataInsufficiency {
                        context: context_name.to_string(),
                        available: 0,
                        required: 1,
                    }),
                };
            }
        }

        let fg_model = GaussianMixture::fit(&fg_samples, self.n_components)?;
        let bg_model = GaussianMixture::fit(&bg_samples, self.n_components)?;

        Ok(tile
            .coordinates()
            .map(|(x, y)| {
                let color = context.color(x, y);
                foreground_probability(fg_model.score_sample(&color), bg_model.score_sample(&color))
            })
            .collect())
    }
}

/// Converts two log-densities into a foreground probability.
///
/// Equal log-densities give exactly 0.5.
#[inline]
pub fn foreground_probability(fg_log_density: f64, bg_log_density: f64) -> f64 {
    let clip = |v: f64| v.clamp(-LOG_DENSITY_LIMIT, LOG_DENSITY_LIMIT);
    let fg = clip(fg_log_density).exp();
    let bg = clip(bg_log_density).exp();
    fg / (fg + bg)
}
