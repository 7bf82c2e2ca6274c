use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{info, warn};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::error::FusionError;
use crate::mask_fusion::dataset::{
    image_identity, load_mask, load_rgb_image, load_weak_supervision, save_mask, DatasetLayout,
};
use crate::mask_fusion::oracle::SegmentationOracle;
use crate::mask_fusion::pipeline::{FusionInputs, FusionMode, FusionOutcome, MaskFusionPipeline};
use crate::mask_fusion::scoring::mean_score;

/// Scores and failures of one evaluation run
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    /// Dice per processed image; `NaN` where undefined
    pub scores: BTreeMap<String, f64>,
    /// Images that could not be processed
    pub failures: BTreeMap<String, FusionError>,
    /// Mean over the defined scores, `NaN` when there are none
    pub mean: f64,
}

impl EvaluationReport {
    /// Builds a report from per-image results, logging each failure.
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = (String, Result<f64, FusionError>)>,
    {
        let mut scores = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for (id, result) in results {
            match result {
                Ok(score) => {
                    scores.insert(id, score);
                }
                Err(error) => {
                    warn!("{id}: {error}");
                    failures.insert(id, error);
                }
            }
        }
        let mean = mean_score(scores.values().copied());
        Self {
            scores,
            failures,
            mean,
        }
    }

    /// Number of images attempted.
    pub fn len(&self) -> usize {
        self.scores.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs a pipeline over an image collection
///
/// Images are independent, so with the `rayon` feature they are processed
/// in parallel against the shared solver session. A failing image is
/// recorded in the report and the run continues.
pub struct EvaluationHarness<'p, 's, O> {
    pipeline: &'p MaskFusionPipeline<'s, O>,
    layout: DatasetLayout,
}

impl<'p, 's, O> EvaluationHarness<'p, 's, O>
where
    O: SegmentationOracle + Sync,
{
    pub fn new(pipeline: &'p MaskFusionPipeline<'s, O>, layout: DatasetLayout) -> Self {
        Self { pipeline, layout }
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    /// Evaluates `image_paths[i]` with the boxes in `supervision_paths[i]`.
    ///
    /// # Errors
    ///
    /// * `FusionError::InvalidParameter` - When the two lists differ in length
    pub fn run(
        &self,
        image_paths: &[PathBuf],
        supervision_paths: &[PathBuf],
    ) -> Result<EvaluationReport, FusionError> {
        if image_paths.len() != supervision_paths.len() {
            return Err(FusionError::InvalidParameter(format!(
                "{} images but {} supervision files",
                image_paths.len(),
                supervision_paths.len()
            )));
        }
        info!("evaluating {} images", image_paths.len());

        let cases: Vec<_> = image_paths.iter().zip(supervision_paths).collect();
        let evaluate = |(image, supervision): &(&PathBuf, &PathBuf)| {
            let result = self
                .evaluate_image(image, supervision)
                .map(|outcome| outcome.dice);
            (image_identity(image), result)
        };

        #[cfg(feature = "rayon")]
        let results: Vec<_> = cases.par_iter().map(evaluate).collect();
        #[cfg(not(feature = "rayon"))]
        let results: Vec<_> = cases.iter().map(evaluate).collect();

        let report = EvaluationReport::from_results(results);
        info!(
            "mean dice {:.4} over {} scored images, {} failures",
            report.mean,
            report.scores.values().filter(|s| !s.is_nan()).count(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Loads one case from disk, runs the pipeline and saves the mask.
    ///
    /// # Errors
    ///
    /// * `FusionError::MissingInput` - When the image, the supervision file or
    ///   a configured companion mask is absent
    /// * Any error raised by the pipeline or while writing the output
    pub fn evaluate_image(
        &self,
        image_path: &Path,
        supervision_path: &Path,
    ) -> Result<FusionOutcome, FusionError> {
        let id = image_identity(image_path);
        let image = load_rgb_image(image_path)?;
        let prompts = load_weak_supervision(supervision_path)?;

        let auxiliary = match (self.pipeline.config().mode, self.layout.auxiliary_path(image_path)) {
            (FusionMode::Fused, Some(path)) => Some(load_mask(&path)?),
            _ => None,
        };
        let ground_truth = self
            .layout
            .ground_truth_path(image_path)
            .map(|path| load_mask(&path))
            .transpose()?;

        let outcome = self.pipeline.run(&FusionInputs {
            id: &id,
            image: &image,
            prompts: &prompts,
            auxiliary: auxiliary.as_ref(),
            ground_truth: ground_truth.as_ref(),
        })?;

        if let Some(output) = self.layout.output_path(image_path) {
            save_mask(&output, &outcome.labels)?;
        }
        info!("{id}: dice {:.4}", outcome.dice);
        Ok(outcome)
    }

    /// Evaluates in-memory inputs without touching the file system.
    pub fn evaluate(&self, inputs: &[FusionInputs<'_>]) -> EvaluationReport {
        let evaluate = |inputs: &FusionInputs<'_>| {
            let result = self.pipeline.run(inputs).map(|outcome| outcome.dice);
            (inputs.id.to_string(), result)
        };

        #[cfg(feature = "rayon")]
        let results: Vec<_> = inputs.par_iter().map(evaluate).collect();
        #[cfg(not(feature = "rayon"))]
        let results: Vec<_> = inputs.iter().map(evaluate).collect();

        EvaluationReport::from_results(results)
    }
}
