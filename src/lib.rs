mod error;
mod mask_fusion;
mod utils;

#[cfg(test)]
mod test_utils;

use image::{ImageBuffer, Pixel};

pub use error::{FusionError, FusionResult, SolverError};
pub use mask_fusion::dataset::{
    image_identity, list_directory, load_mask, load_rgb_image, load_weak_supervision,
    parse_weak_supervision, save_mask, DatasetLayout,
};
pub use mask_fusion::edge_weights::{color_distance, edge_weight, EdgeWeights};
pub use mask_fusion::gmm::{Color, GaussianMixture};
pub use mask_fusion::harness::{EvaluationHarness, EvaluationReport};
pub use mask_fusion::labeling::{
    ConstraintBuilder, LabelingOptimizer, LabelingProblem, LabelingSolution, NeighborPair,
    SolveStatus,
};
pub use mask_fusion::likelihood::{
    foreground_probability, CandidateSource, ExhaustedFallback, FallbackChain, LikelihoodEstimator,
    LikelihoodMap, SampleContext, Tile, TileGrid, LOG_DENSITY_LIMIT,
};
pub use mask_fusion::oracle::{aggregate_box_masks, BoundingBox, SegmentationOracle};
pub use mask_fusion::pipeline::{
    FusionConfig, FusionInputs, FusionMode, FusionOutcome, FusionStage, MaskFusionPipeline,
};
pub use mask_fusion::scoring::{dice_coefficient, mean_score};
pub use mask_fusion::solver::{SessionStats, SolverSession, SolverSettings};
pub use mask_fusion::weak_mask::{
    accumulate_masks, to_mask_image, Agreement, LabelGrid, MaskPair, WeakMask,
};
pub use utils::binarize;

pub type Image<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;
