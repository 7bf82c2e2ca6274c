//! Integration tests for maskfusion-ai workflows
//!
//! These tests run the complete per-image pipeline and the evaluation
//! harness on small synthetic scenes.

use std::fs;
use std::path::Path;
use std::time::Duration;

use image::{Luma, Rgb, RgbImage};
use maskfusion_ai::{
    list_directory, load_mask, BoundingBox, DatasetLayout, EdgeWeights, EvaluationHarness,
    FusionConfig, FusionError, FusionInputs, FusionMode, Image, LabelingOptimizer, LikelihoodMap,
    MaskFusionPipeline, MaskPair, SolveStatus, SolverSession, SolverSettings, WeakMask,
};

/// Oracle returning the inclusive prompt box, clamped to the image
fn box_oracle(image: &RgbImage, prompt: &BoundingBox) -> Result<WeakMask, FusionError> {
    let (width, height) = image.dimensions();
    Ok(Image::from_fn(width, height, |x, y| {
        let (x, y) = (i64::from(x), i64::from(y));
        let hit = (prompt.x0..=prompt.x1).contains(&x) && (prompt.y0..=prompt.y1).contains(&y);
        Luma([if hit { 255 } else { 0 }])
    }))
}

fn uniform_image(width: u32, height: u32) -> RgbImage {
    Image::from_pixel(width, height, Rgb([120, 90, 60]))
}

/// 4x4 scene with a bright 2x2 block at (1, 1)
fn block_scene() -> (RgbImage, WeakMask) {
    let inside = |x: u32, y: u32| (1..=2).contains(&x) && (1..=2).contains(&y);
    let image = Image::from_fn(4, 4, |x, y| {
        if inside(x, y) {
            Rgb([230, 220, 40])
        } else {
            Rgb([20, 30, 90])
        }
    });
    let mask = Image::from_fn(4, 4, |x, y| Luma([if inside(x, y) { 255 } else { 0 }]));
    (image, mask)
}

fn binary(mask: &WeakMask) -> Vec<u8> {
    mask.pixels().map(|Luma([v])| u8::from(*v > 0)).collect()
}

#[test]
fn agreed_block_without_regularization_reproduces_agreed_mask() {
    let (image, agreed) = block_scene();
    let session = SolverSession::new(SolverSettings::default());
    let config = FusionConfig::default()
        .with_mu(0.0)
        .with_split(1)
        .with_n_components(2);
    let pipeline = MaskFusionPipeline::new(box_oracle, &session, config).unwrap();

    let outcome = pipeline
        .run(&FusionInputs {
            id: "block",
            image: &image,
            prompts: &[BoundingBox::new(1, 1, 2, 2)],
            auxiliary: Some(&agreed),
            ground_truth: Some(&agreed),
        })
        .unwrap();

    assert_eq!(outcome.labels.as_raw(), &binary(&agreed));
    assert_eq!(outcome.dice, 1.0);
    assert_eq!(outcome.status, Some(SolveStatus::Optimal));
}

#[test]
fn smoothness_pulls_disputed_interior_pixel_to_foreground() {
    let image = uniform_image(3, 3);
    // Everything but the center is foreground in the aggregate mask.
    let prompts = [
        BoundingBox::new(0, 0, 2, 0),
        BoundingBox::new(0, 2, 2, 2),
        BoundingBox::new(0, 1, 0, 1),
        BoundingBox::new(2, 1, 2, 1),
    ];
    let auxiliary: WeakMask = Image::from_pixel(3, 3, Luma([255]));
    let session = SolverSession::new(SolverSettings::default());
    let config = FusionConfig::default()
        .with_mu(10.0)
        .with_split(1)
        .with_n_components(2);
    let pipeline = MaskFusionPipeline::new(box_oracle, &session, config).unwrap();

    let outcome = pipeline
        .run(&FusionInputs {
            id: "disputed",
            image: &image,
            prompts: &prompts,
            auxiliary: Some(&auxiliary),
            ground_truth: None,
        })
        .unwrap();

    assert_eq!(outcome.labels.get_pixel(1, 1), &Luma([1]));
    assert!(outcome.labels.pixels().all(|Luma([v])| *v == 1));
    assert!(outcome.dice.is_nan());
}

#[test]
fn smoothness_outweighs_a_weak_likelihood_preference() {
    let image = uniform_image(3, 3);
    let mut aggregate: WeakMask = Image::from_pixel(3, 3, Luma([1]));
    aggregate.put_pixel(1, 1, Luma([0]));
    let auxiliary: WeakMask = Image::from_pixel(3, 3, Luma([1]));
    let masks = MaskPair::new(&aggregate, &auxiliary).unwrap();

    // The center leans slightly towards background on its own.
    let mut likelihood: LikelihoodMap = Image::from_pixel(3, 3, Luma([0.5]));
    likelihood.put_pixel(1, 1, Luma([0.4]));
    let weights = EdgeWeights::from_image(&image, 20.0).unwrap();
    let session = SolverSession::new(SolverSettings::default());

    let weak = LabelingOptimizer::new(0.0)
        .solve(&session, masks, &likelihood, &weights)
        .unwrap();
    assert_eq!(weak.labels.get_pixel(1, 1), &Luma([0]));

    let strong = LabelingOptimizer::new(10.0)
        .solve(&session, masks, &likelihood, &weights)
        .unwrap();
    assert_eq!(strong.labels.get_pixel(1, 1), &Luma([1]));
    // No disagreeing pairs remain, so only the unary term counts.
    assert!((strong.objective - 4.4 / 9.0).abs() < 1e-9);
    assert_eq!(session.stats().solves, 2);
}

#[test]
fn weak_aggregate_mode_skips_optimization() {
    let (image, agreed) = block_scene();
    let session = SolverSession::new(SolverSettings::default());
    let config = FusionConfig::default().with_mode(FusionMode::WeakAggregateOnly);
    let pipeline = MaskFusionPipeline::new(box_oracle, &session, config).unwrap();

    let outcome = pipeline
        .run(&FusionInputs {
            id: "block",
            image: &image,
            prompts: &[BoundingBox::new(1, 1, 2, 2), BoundingBox::new(2, 2, 2, 2)],
            auxiliary: None,
            ground_truth: Some(&agreed),
        })
        .unwrap();

    assert_eq!(outcome.labels.as_raw(), &binary(&agreed));
    assert_eq!(outcome.status, None);
    assert_eq!(session.stats().solves, 0);
}

fn write_case(root: &Path, name: &str, image: &RgbImage, mask: &WeakMask, boxes: Option<&str>) {
    image.save(root.join("images").join(format!("{name}.png"))).unwrap();
    mask.save(root.join("auxiliary").join(format!("{name}.png"))).unwrap();
    mask.save(root.join("truth").join(format!("{name}.png"))).unwrap();
    if let Some(boxes) = boxes {
        fs::write(root.join("boxes").join(format!("{name}.csv")), boxes).unwrap();
    }
}

#[test]
fn harness_evaluates_directory_and_records_failures() {
    let root = tempfile::tempdir().unwrap();
    for dir in ["images", "auxiliary", "truth", "boxes"] {
        fs::create_dir(root.path().join(dir)).unwrap();
    }
    let (image, agreed) = block_scene();
    write_case(root.path(), "a", &image, &agreed, Some("0,1,1,2,2\n"));
    write_case(root.path(), "b", &image, &agreed, None);

    let session = SolverSession::new(SolverSettings {
        time_limit: Duration::from_secs(30),
        warm_start: true,
    });
    let config = FusionConfig::default().with_split(1).with_n_components(2);
    let pipeline = MaskFusionPipeline::new(box_oracle, &session, config).unwrap();
    let layout = DatasetLayout::default()
        .with_auxiliary_dir(root.path().join("auxiliary"))
        .with_ground_truth_dir(root.path().join("truth"))
        .with_save_dir(root.path().join("out"));
    let harness = EvaluationHarness::new(&pipeline, layout);

    let images = list_directory(&root.path().join("images")).unwrap();
    let boxes = vec![
        root.path().join("boxes").join("a.csv"),
        root.path().join("boxes").join("b.csv"),
    ];
    let report = harness.run(&images, &boxes).unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(report.scores.get("a.png"), Some(&1.0));
    assert!(matches!(
        report.failures.get("b.png"),
        Some(FusionError::MissingInput(_))
    ));
    assert_eq!(report.mean, 1.0);

    let saved = load_mask(&root.path().join("out").join("a.png")).unwrap();
    assert!(saved.pixels().all(|Luma([v])| *v == 0 || *v == 255));
    assert_eq!(binary(&saved), binary(&agreed));
    assert!(!root.path().join("out").join("b.png").exists());
}
