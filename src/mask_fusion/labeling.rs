//! Regularized binary labeling
//!
//! Picks a label `z ∈ {0, 1}` for every pixel maximising
//!
//! ```text
//! (1 / HW) Σ_p [z_p ℓ_p + (1 - z_p)(1 - ℓ_p)]  -  (mu / N) Σ_(p,q) w_pq |z_p - z_q|
//! ```
//!
//! where `ℓ` is the likelihood map, `w` the neighbor weights and
//! `N = HW - H - W` (at least 1). `|z_p - z_q|` becomes an auxiliary binary
//! `d_pq` bounded by four linear rows, which turns the problem into a MILP.
//! Pixels on which both weak masks agree are pinned to the agreed label.

use image::Luma;
use itertools::iproduct;
use log::{debug, info};

use crate::error::FusionError;
use crate::mask_fusion::edge_weights::EdgeWeights;
use crate::mask_fusion::likelihood::LikelihoodMap;
use crate::mask_fusion::solver::SolverSession;
use crate::mask_fusion::weak_mask::{LabelGrid, MaskPair};
use crate::utils::{validate_matching_dimensions, validate_non_empty_image};
use crate::Image;

/// Receives the constraint rows of a [`LabelingProblem`]
///
/// Pixels are addressed by their row-major index, pairs by their position in
/// [`LabelingProblem::pairs`].
pub trait ConstraintBuilder {
    /// Fixes pixel `pixel` to `label` (lower bound = upper bound).
    fn add_agreement_constraint(&mut self, pixel: usize, label: u8);

    /// Ties disagreement variable `pair` to `|z_p - z_q|`.
    fn add_abs_diff_linearization(&mut self, pair: usize, p: usize, q: usize);
}

/// Two 4-connected pixels and the weight of their disagreement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborPair {
    pub p: usize,
    pub q: usize,
    pub weight: f64,
}

/// Backend-independent description of one labeling instance
#[derive(Debug, Clone, PartialEq)]
pub struct LabelingProblem {
    width: u32,
    height: u32,
    likelihood: Vec<f64>,
    agreed: Vec<Option<u8>>,
    warm_start: Vec<u8>,
    pairs: Vec<NeighborPair>,
    unary_scale: f64,
    pair_scale: f64,
    unary: Vec<f64>,
}

impl LabelingProblem {
    /// Assembles the problem, validating that all grids share one extent.
    pub fn new(
        masks: MaskPair<'_>,
        likelihood: &LikelihoodMap,
        weights: &EdgeWeights,
        mu: f64,
    ) -> Result<Self, FusionError> {
        let (width, height) = masks.dimensions();
        validate_non_empty_image(width, height, "LabelingProblem")?;
        validate_matching_dimensions(masks.aggregate(), likelihood, "LabelingProblem")?;
        validate_grid(&weights.horizontal, (width - 1, height), "horizontal weights")?;
        validate_grid(&weights.vertical, (width, height - 1), "vertical weights")?;
        if !(mu.is_finite() && mu >= 0.0) {
            return Err(FusionError::InvalidParameter(format!(
                "mu must be a non-negative finite number, got {mu}"
            )));
        }

        let index = |x: u32, y: u32| (y * width + x) as usize;
        let coordinates = || iproduct!(0..height, 0..width).map(|(y, x)| (x, y));

        let agreed = coordinates()
            .map(|(x, y)| masks.agreement_at(x, y).agreed_label())
            .collect();
        let warm_start = coordinates()
            .map(|(x, y)| u8::from(masks.aggregate_at(x, y)))
            .collect();

        let horizontal = iproduct!(0..height, 0..width - 1).map(|(y, x)| NeighborPair {
            p: index(x, y),
            q: index(x + 1, y),
            weight: weights.horizontal.get_pixel(x, y)[0],
        });
        let vertical = iproduct!(0..height - 1, 0..width).map(|(y, x)| NeighborPair {
            p: index(x, y),
            q: index(x, y + 1),
            weight: weights.vertical.get_pixel(x, y)[0],
        });
        let pairs = horizontal.chain(vertical).collect();

        let pixel_count = f64::from(width) * f64::from(height);
        let normalizer =
            (pixel_count - f64::from(width) - f64::from(height)).max(1.0);
        let unary_scale = 1.0 / pixel_count;
        let likelihood: Vec<f64> = likelihood.pixels().map(|Luma([l])| *l).collect();
        // z ℓ + (1 - z)(1 - ℓ) = z (2ℓ - 1) + (1 - ℓ)
        let unary = likelihood
            .iter()
            .map(|l| (2.0 * l - 1.0) * unary_scale)
            .collect();

        Ok(Self {
            width,
            height,
            likelihood,
            agreed,
            warm_start,
            pairs,
            unary_scale,
            pair_scale: mu / normalizer,
            unary,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.agreed.len()
    }

    pub fn pairs(&self) -> &[NeighborPair] {
        &self.pairs
    }

    /// Objective coefficient of each label variable.
    pub fn unary_coefficients(&self) -> &[f64] {
        &self.unary
    }

    /// Objective coefficient of the disagreement variable of `pair`.
    pub fn pair_coefficient(&self, pair: usize) -> f64 {
        -self.pair_scale * self.pairs[pair].weight
    }

    /// Aggregate-mask labels for every pixel, agreed labels included.
    pub fn warm_start(&self) -> &[u8] {
        &self.warm_start
    }

    pub fn free_count(&self) -> usize {
        self.agreed.iter().filter(|a| a.is_none()).count()
    }

    /// The labeling that follows the weak-mask agreement and leaves free
    /// pixels at their warm-start value.
    fn pinned_labels(&self) -> Vec<u8> {
        self.agreed
            .iter()
            .zip(&self.warm_start)
            .map(|(agreed, &start)| agreed.unwrap_or(start))
            .collect()
    }

    /// Feeds every agreement and linearization row to `builder`.
    pub fn emit_constraints<B: ConstraintBuilder>(&self, builder: &mut B) {
        for (pixel, label) in self
            .agreed
            .iter()
            .enumerate()
            .filter_map(|(pixel, agreed)| agreed.map(|label| (pixel, label)))
        {
            builder.add_agreement_constraint(pixel, label);
        }
        for (pair, &NeighborPair { p, q, .. }) in self.pairs.iter().enumerate() {
            builder.add_abs_diff_linearization(pair, p, q);
        }
    }

    /// Evaluates the objective for a complete labeling.
    pub fn objective(&self, labels: &[u8]) -> f64 {
        let unary: f64 = labels
            .iter()
            .zip(&self.likelihood)
            .map(|(&z, &l)| if z != 0 { l } else { 1.0 - l })
            .sum();
        let penalty: f64 = self
            .pairs
            .iter()
            .filter(|pair| labels[pair.p] != labels[pair.q])
            .map(|pair| pair.weight)
            .sum();
        unary * self.unary_scale - self.pair_scale * penalty
    }

    fn to_label_grid(&self, labels: &[u8]) -> LabelGrid {
        Image::from_fn(self.width, self.height, |x, y| {
            Luma([labels[(y * self.width + x) as usize]])
        })
    }
}

fn validate_grid(
    grid: &Image<Luma<f64>>,
    expected: (u32, u32),
    context: &str,
) -> Result<(), FusionError> {
    let actual = grid.dimensions();
    if actual != expected {
        return Err(FusionError::DimensionMismatch {
            context: context.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// How the returned labeling was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// The solver proved optimality, or no pixel was free
    Optimal,
    /// The time limit elapsed; the backend's best labeling so far was returned
    TimeLimitReached,
}

/// Result of a labeling solve
#[derive(Debug, Clone, PartialEq)]
pub struct LabelingSolution {
    pub labels: LabelGrid,
    pub status: SolveStatus,
    pub objective: f64,
}

/// Solves the regularized labeling problem for one image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelingOptimizer {
    mu: f64,
}

impl LabelingOptimizer {
    pub fn new(mu: f64) -> Self {
        Self { mu }
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    /// Computes the fused labeling.
    ///
    /// # Errors
    ///
    /// * `FusionError::DimensionMismatch` - When masks, likelihood map and
    ///   weight grids disagree in extent
    /// * `FusionError::InvalidParameter` - When `mu` is negative or not finite
    /// * `FusionError::Solver` - When the backend fails or times out without
    ///   an incumbent
    pub fn solve(
        &self,
        session: &SolverSession,
        masks: MaskPair<'_>,
        likelihood: &LikelihoodMap,
        weights: &EdgeWeights,
    ) -> Result<LabelingSolution, FusionError> {
        let problem = LabelingProblem::new(masks, likelihood, weights, self.mu)?;
        let free = problem.free_count();

        let (labels, status) = if free == 0 {
            debug!("every pixel is fixed by mask agreement, skipping the MILP");
            (problem.pinned_labels(), SolveStatus::Optimal)
        } else {
            let (labels, proven) = session.solve(&problem)?;
            let status = if proven {
                SolveStatus::Optimal
            } else {
                SolveStatus::TimeLimitReached
            };
            (labels, status)
        };

        let objective = problem.objective(&labels);
        info!(
            "labeling solved: {} free of {} pixels, status {:?}, objective {:.6}",
            free,
            problem.pixel_count(),
            status,
            objective
        );

        Ok(LabelingSolution {
            labels: problem.to_label_grid(&labels),
            status,
            objective,
        })
    }
}
