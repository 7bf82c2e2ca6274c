use std::time::Duration;

use image::{Luma, RgbImage};
use log::debug;

use crate::error::FusionError;
use crate::mask_fusion::edge_weights::EdgeWeights;
use crate::mask_fusion::labeling::{LabelingOptimizer, SolveStatus};
use crate::mask_fusion::likelihood::{ExhaustedFallback, LikelihoodEstimator};
use crate::mask_fusion::oracle::{aggregate_box_masks, BoundingBox, SegmentationOracle};
use crate::mask_fusion::scoring::dice_coefficient;
use crate::mask_fusion::solver::{SolverSession, SolverSettings};
use crate::mask_fusion::weak_mask::{LabelGrid, MaskPair, WeakMask};
use crate::utils::{binarize, validate_matching_dimensions, validate_non_empty_image};
use crate::Image;

/// Which stages of the pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FusionMode {
    /// Output the thresholded aggregate of the box-prompted masks
    WeakAggregateOnly,
    /// Fuse both weak masks through the regularized labeling
    #[default]
    Fused,
}

/// Stages a single image passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionStage {
    ObtainWeakMasks,
    EstimateLikelihood,
    BuildEdgeWeights,
    Optimize,
    Score,
    Done,
}

/// Parameters of a fusion run
///
/// Every component receives these values explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// Regularization strength of the neighbor disagreement penalty
    pub mu: f64,
    /// Mixture component count, also the minimum candidate sample count
    pub n_components: usize,
    /// Color-distance bandwidth of the neighbor weights
    pub sigma: f64,
    /// Tile grid factor along each axis
    pub split: u32,
    /// Wall-clock limit of one labeling solve
    pub time_limit: Duration,
    /// Hand the aggregate mask to the backend as an initial solution hint
    pub warm_start: bool,
    pub mode: FusionMode,
    /// Policy for tiles whose candidate chains come up empty
    pub exhausted_fallback: ExhaustedFallback,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            mu: 2.0,
            n_components: 5,
            sigma: 20.0,
            split: 10,
            time_limit: Duration::from_secs(60),
            warm_start: true,
            mode: FusionMode::default(),
            exhausted_fallback: ExhaustedFallback::default(),
        }
    }
}

impl FusionConfig {
    pub fn with_mu(mut self, mu: f64) -> Self {
        self.mu = mu;
        self
    }

    pub fn with_n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn with_split(mut self, split: u32) -> Self {
        self.split = split;
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_warm_start(mut self, warm_start: bool) -> Self {
        self.warm_start = warm_start;
        self
    }

    pub fn with_mode(mut self, mode: FusionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_exhausted_fallback(mut self, policy: ExhaustedFallback) -> Self {
        self.exhausted_fallback = policy;
        self
    }

    /// Settings for the solver session this configuration runs against.
    pub fn solver_settings(&self) -> SolverSettings {
        SolverSettings {
            time_limit: self.time_limit,
            warm_start: self.warm_start,
        }
    }

    /// Checks every parameter range.
    ///
    /// # Errors
    ///
    /// * `FusionError::InvalidParameter` - Naming the first offending parameter
    pub fn validate(&self) -> Result<(), FusionError> {
        let invalid = |message: String| Err(FusionError::InvalidParameter(message));

        if !(self.mu.is_finite() && self.mu >= 0.0) {
            return invalid(format!("mu must be a non-negative finite number, got {}", self.mu));
        }
        if self.n_components == 0 {
            return invalid("n_components must be > 0".to_string());
        }
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return invalid(format!("sigma must be a positive finite number, got {}", self.sigma));
        }
        if self.split == 0 {
            return invalid("split must be > 0".to_string());
        }
        if self.time_limit.is_zero() {
            return invalid("time_limit must be > 0".to_string());
        }
        Ok(())
    }
}

/// Everything needed to process one image
#[derive(Debug, Clone, Copy)]
pub struct FusionInputs<'a> {
    /// Identity used in logs and reports
    pub id: &'a str,
    pub image: &'a RgbImage,
    /// Box prompts for the segmentation oracle
    pub prompts: &'a [BoundingBox],
    /// Auxiliary weak mask, required in `FusionMode::Fused`
    pub auxiliary: Option<&'a WeakMask>,
    pub ground_truth: Option<&'a Image<Luma<u8>>>,
}

/// Result of processing one image
#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutcome {
    /// 0/1 labels with the image extent
    pub labels: LabelGrid,
    /// Dice against the ground truth; `NaN` when there is none or both
    /// masks are empty
    pub dice: f64,
    /// Solver status, present in `FusionMode::Fused`
    pub status: Option<SolveStatus>,
    pub objective: Option<f64>,
}

/// Per-image mask fusion
///
/// Holds the oracle, a reference to the process-wide solver session and the
/// run configuration; it keeps no per-image state, so one pipeline can serve
/// many images concurrently.
pub struct MaskFusionPipeline<'s, O> {
    oracle: O,
    session: &'s SolverSession,
    config: FusionConfig,
}

impl<'s, O> MaskFusionPipeline<'s, O>
where
    O: SegmentationOracle,
{
    /// # Errors
    ///
    /// * `FusionError::InvalidParameter` - When `config` fails validation
    pub fn new(
        oracle: O,
        session: &'s SolverSession,
        config: FusionConfig,
    ) -> Result<Self, FusionError> {
        config.validate()?;
        Ok(Self {
            oracle,
            session,
            config,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn session(&self) -> &SolverSession {
        self.session
    }

    /// Runs every stage for one image.
    ///
    /// # Errors
    ///
    /// * `FusionError::MissingInput` - When `Fused` mode has no auxiliary mask
    /// * `FusionError::DimensionMismatch` - When masks or ground truth differ
    ///   in extent from the image
    /// * Any error raised by the oracle, the estimator or the solver
    pub fn run(&self, inputs: &FusionInputs<'_>) -> Result<FusionOutcome, FusionError> {
        let id = inputs.id;
        let (width, height) = inputs.image.dimensions();
        validate_non_empty_image(width, height, id)?;
        if let Some(ground_truth) = inputs.ground_truth {
            validate_matching_dimensions(inputs.image, ground_truth, "ground truth")?;
        }

        enter(id, FusionStage::ObtainWeakMasks);
        let aggregate = aggregate_box_masks(&self.oracle, inputs.image, inputs.prompts)?;

        let (labels, status, objective) = match self.config.mode {
            FusionMode::WeakAggregateOnly => (binarize(&aggregate), None, None),
            FusionMode::Fused => {
                let auxiliary = inputs.auxiliary.ok_or_else(|| {
                    FusionError::MissingInput(format!("auxiliary mask for {id}"))
                })?;
                validate_matching_dimensions(inputs.image, auxiliary, "auxiliary mask")?;
                let masks = MaskPair::new(&aggregate, auxiliary)?;

                enter(id, FusionStage::EstimateLikelihood);
                let likelihood = LikelihoodEstimator::new(self.config.split, self.config.n_components)
                    .with_exhausted_fallback(self.config.exhausted_fallback)
                    .estimate(inputs.image, masks)?;

                enter(id, FusionStage::BuildEdgeWeights);
                let weights = EdgeWeights::from_image(inputs.image, self.config.sigma)?;

                enter(id, FusionStage::Optimize);
                let solution = LabelingOptimizer::new(self.config.mu).solve(
                    self.session,
                    masks,
                    &likelihood,
                    &weights,
                )?;
                (solution.labels, Some(solution.status), Some(solution.objective))
            }
        };

        let dice = match inputs.ground_truth {
            Some(ground_truth) => {
                enter(id, FusionStage::Score);
                dice_coefficient(ground_truth, &labels)?
            }
            None => f64::NAN,
        };

        enter(id, FusionStage::Done);
        Ok(FusionOutcome {
            labels,
            dice,
            status,
            objective,
        })
    }
}

fn enter(id: &str, stage: FusionStage) {
    debug!("{id}: {stage:?}");
}
