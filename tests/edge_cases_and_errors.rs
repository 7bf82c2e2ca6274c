//! Edge case and error condition tests
//!
//! Boundary inputs, undefined metrics and failure propagation.

use std::path::Path;
use std::time::Duration;

use image::{Luma, Rgb, RgbImage};
use maskfusion_ai::{
    dice_coefficient, load_rgb_image, mean_score, parse_weak_supervision, BoundingBox,
    CandidateSource, EdgeWeights, EvaluationReport, ExhaustedFallback, FallbackChain,
    FusionConfig, FusionError, GaussianMixture, Image, LabelingOptimizer, LikelihoodEstimator,
    LikelihoodMap, MaskFusionPipeline, MaskPair, SampleContext, SolveStatus, SolverError,
    SolverSession, SolverSettings, TileGrid, WeakMask,
};

/// Every pixel disputed: aggregate says foreground, auxiliary says background
fn disputed_problem(size: u32) -> (RgbImage, WeakMask, WeakMask, LikelihoodMap) {
    let image = Image::from_fn(size, size, |x, y| {
        Rgb([(x * 13 % 256) as u8, (y * 29 % 256) as u8, ((x + y) * 7 % 256) as u8])
    });
    let aggregate = Image::from_pixel(size, size, Luma([1]));
    let auxiliary = Image::new(size, size);
    let likelihood = Image::from_fn(size, size, |x, y| {
        Luma([if (x + y) % 2 == 0 { 0.8 } else { 0.3 }])
    });
    (image, aggregate, auxiliary, likelihood)
}

#[test]
fn mean_of_empty_collection_is_nan() {
    assert!(mean_score(Vec::<f64>::new()).is_nan());
    assert!(EvaluationReport::from_results(Vec::new()).mean.is_nan());
}

#[test]
fn dice_of_two_empty_masks_is_nan() {
    let empty: WeakMask = Image::new(5, 3);
    assert!(dice_coefficient(&empty, &empty).unwrap().is_nan());
}

#[test]
fn dice_against_empty_prediction_is_zero() {
    let truth: WeakMask = Image::from_pixel(2, 2, Luma([255]));
    let empty: WeakMask = Image::new(2, 2);
    assert_eq!(dice_coefficient(&truth, &empty).unwrap(), 0.0);
}

#[test]
fn mask_pair_rejects_shape_mismatch() {
    let a: WeakMask = Image::new(4, 4);
    let b: WeakMask = Image::new(4, 5);
    assert!(matches!(
        MaskPair::new(&a, &b),
        Err(FusionError::DimensionMismatch {
            expected: (4, 4),
            actual: (4, 5),
            ..
        })
    ));
}

#[test]
fn missing_image_file_is_reported() {
    let result = load_rgb_image(Path::new("no/such/image.png"));
    assert!(matches!(result, Err(FusionError::MissingInput(_))));
}

#[test]
fn malformed_supervision_is_rejected() {
    assert!(matches!(
        parse_weak_supervision("1,2,3\n"),
        Err(FusionError::InvalidParameter(_))
    ));
}

#[test]
fn invalid_configuration_is_rejected() {
    let session = SolverSession::new(SolverSettings::default());
    let oracle = |_: &RgbImage, _: &BoundingBox| -> Result<WeakMask, FusionError> {
        Ok(Image::new(1, 1))
    };
    let result = MaskFusionPipeline::new(oracle, &session, FusionConfig::default().with_sigma(-1.0));
    assert!(matches!(result, Err(FusionError::InvalidParameter(_))));
}

#[test]
fn empty_image_is_rejected() {
    let image: RgbImage = Image::new(0, 0);
    assert!(matches!(
        EdgeWeights::from_image(&image, 20.0),
        Err(FusionError::InvalidParameter(_))
    ));
}

#[test]
fn single_pixel_image_has_no_neighbor_pairs() {
    let image: RgbImage = Image::from_pixel(1, 1, Rgb([5, 5, 5]));
    let weights = EdgeWeights::from_image(&image, 20.0).unwrap();
    assert_eq!(weights.pair_count(), 0);

    let mask: WeakMask = Image::from_pixel(1, 1, Luma([1]));
    let masks = MaskPair::new(&mask, &mask).unwrap();
    let likelihood: LikelihoodMap = Image::from_pixel(1, 1, Luma([0.5]));
    let session = SolverSession::new(SolverSettings::default());

    let solution = LabelingOptimizer::new(2.0)
        .solve(&session, masks, &likelihood, &weights)
        .unwrap();
    assert_eq!(solution.labels.as_raw(), &vec![1]);
    assert_eq!(solution.status, SolveStatus::Optimal);
}

#[test]
fn exhausted_tile_fails_under_strict_policy() {
    let image: RgbImage = Image::from_pixel(3, 3, Rgb([9, 9, 9]));
    let full: WeakMask = Image::from_pixel(3, 3, Luma([1]));
    let masks = MaskPair::new(&full, &full).unwrap();

    // Nothing is background anywhere, so the background chain runs dry.
    let result = LikelihoodEstimator::new(1, 2)
        .with_exhausted_fallback(ExhaustedFallback::Fail)
        .estimate(&image, masks);
    assert!(matches!(
        result,
        Err(FusionError::DataInsufficiency { ref context, .. }) if context == "background"
    ));
}

#[test]
fn mixture_fit_on_nothing_is_insufficient() {
    assert!(matches!(
        GaussianMixture::fit(&[], 3),
        Err(FusionError::DataInsufficiency { .. })
    ));
}

#[test]
fn timeout_without_warm_start_is_an_error() {
    let (image, aggregate, auxiliary, likelihood) = disputed_problem(12);
    let masks = MaskPair::new(&aggregate, &auxiliary).unwrap();
    let weights = EdgeWeights::from_image(&image, 20.0).unwrap();
    let limit = Duration::from_nanos(1);
    let session = SolverSession::new(SolverSettings {
        time_limit: limit,
        warm_start: false,
    });

    let result = LabelingOptimizer::new(2.0).solve(&session, masks, &likelihood, &weights);
    assert_eq!(
        result,
        Err(FusionError::Solver(SolverError::TimeoutWithoutIncumbent(limit)))
    );
    assert_eq!(session.stats().failures, 1);
    assert_eq!(session.stats().time_limit_hits, 1);
}

#[test]
fn warm_start_hint_is_not_an_incumbent_before_the_backend_runs() {
    let (image, aggregate, auxiliary, likelihood) = disputed_problem(12);
    let masks = MaskPair::new(&aggregate, &auxiliary).unwrap();
    let weights = EdgeWeights::from_image(&image, 20.0).unwrap();
    let limit = Duration::from_nanos(1);
    let session = SolverSession::new(SolverSettings {
        time_limit: limit,
        warm_start: true,
    });

    // The limit is gone before the backend reaches any feasible point.
    let result = LabelingOptimizer::new(2.0).solve(&session, masks, &likelihood, &weights);
    assert_eq!(
        result,
        Err(FusionError::Solver(SolverError::TimeoutWithoutIncumbent(limit)))
    );
    assert_eq!(session.stats().time_limit_hits, 1);
}

#[test]
fn warm_started_solve_returns_the_backend_optimum() {
    let (image, aggregate, auxiliary, likelihood) = disputed_problem(6);
    let masks = MaskPair::new(&aggregate, &auxiliary).unwrap();
    let weights = EdgeWeights::from_image(&image, 20.0).unwrap();
    let session = SolverSession::new(SolverSettings::default());

    // Without smoothness every free pixel follows its likelihood, so the
    // optimum is a checkerboard rather than the all-foreground hint.
    let solution = LabelingOptimizer::new(0.0)
        .solve(&session, masks, &likelihood, &weights)
        .unwrap();
    assert_eq!(solution.status, SolveStatus::Optimal);
    for (x, y, Luma([label])) in solution.labels.enumerate_pixels() {
        assert_eq!(*label, u8::from((x + y) % 2 == 0), "pixel ({x}, {y})");
    }
    assert_eq!(session.stats().time_limit_hits, 0);
}

#[test]
fn background_chain_falls_back_to_image_wide_samples() {
    let image: RgbImage = Image::from_fn(4, 4, |x, _| {
        if x < 2 {
            Rgb([200, 40, 40])
        } else {
            Rgb([30, 60, 210])
        }
    });
    let mask: WeakMask = Image::from_fn(4, 4, |x, _| Luma([u8::from(x < 2)]));
    let masks = MaskPair::new(&mask, &mask).unwrap();
    let context = SampleContext::new(&image, masks).unwrap();
    let grid = TileGrid::new(4, 4, 2).unwrap();

    // The top-left tile holds no background pixel of its own.
    let (source, samples) = FallbackChain::background().resolve(&context, &grid.tiles()[0], 1);
    assert_eq!(source, CandidateSource::ImageBackground);
    assert_eq!(samples.len(), 8);
}
