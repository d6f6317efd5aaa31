//! Integration test: full workflows on synthetic in-memory images.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::f64::consts::PI;
use std::sync::Arc;

use geo::{Area, BoundingRect, Polygon};
use image::{DynamicImage, GrayImage, Luma};
use sldc::{
    BorderTiles, ExecutorOptions, FieldValue, Image, IntensitySegmenter, KeepAll, Label,
    LabelMask, PolygonClassifier, SemanticWorkflow, Segmenter, SldcWorkflow, ThresholdSegmenter,
    View, Workflow, WorkflowChain, WorkflowError, WorkflowInformation,
};

/// Predicts the label 1 with full confidence for every polygon.
struct CatchAll;

impl PolygonClassifier for CatchAll {
    fn predict_batch(
        &self,
        _image: &View,
        polygons: &[&Polygon<f64>],
    ) -> Result<(Vec<Label>, Vec<f64>), WorkflowError> {
        Ok((vec![1; polygons.len()], vec![1.0; polygons.len()]))
    }
}

fn disc(size: u32, cx: i64, cy: i64, r: i64) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(size, size, |x, y| {
        let dx = i64::from(x) - cx;
        let dy = i64::from(y) - cy;
        Luma([if dx * dx + dy * dy <= r * r { 255 } else { 0 }])
    }))
}

/// Grey image with filled squares `(x, y, side, class)`.
fn squares(width: u32, height: u32, squares: &[(u32, u32, u32, u8)]) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
        let class = squares
            .iter()
            .find(|&&(sx, sy, side, _)| x >= sx && x < sx + side && y >= sy && y < sy + side)
            .map_or(0, |s| s.3);
        Luma([class])
    }))
}

fn sldc(tile: u32, n_jobs: usize) -> SldcWorkflow {
    SldcWorkflow::builder()
        .segmenter(ThresholdSegmenter::default())
        .add_catchall_classifier(CatchAll)
        .tile_size(tile, tile)
        .n_jobs(n_jobs)
        .build()
        .unwrap()
}

#[test]
fn large_disc_is_one_object_for_any_worker_count() {
    let image = View::from(disc(2000, 1000, 1000, 750));
    let expected = PI * 750.0 * 750.0;

    for n_jobs in [1, 2, 4] {
        let info = sldc(512, n_jobs).process(&image).unwrap();
        assert_eq!(info.len(), 1, "n_jobs = {n_jobs}");

        let area = info.polygons()[0].unsigned_area();
        let relative = (area - expected).abs() / expected;
        assert!(relative < 0.005, "n_jobs = {n_jobs}: area {area} vs {expected}");

        let row = info.get(0).unwrap();
        assert_eq!(row.label(), Some(1));
        assert_eq!(row.field("dispatch"), Some(&FieldValue::Text("0".to_owned())));
        assert_eq!(row.field("proba"), Some(&FieldValue::Float(1.0)));

        let timing = info.timing();
        assert_eq!(timing.get("workflow.sldc.merge").len(), 1);
        assert!(!timing.get("workflow.sldc.fetch").is_empty());
    }
}

#[test]
fn semantic_squares_keep_their_class_and_area() {
    // Sides 11..51 give pixel-centre areas of 100..2500. Several squares
    // cross the tile borders at x = 93 and y = 83, 166.
    let image = View::from(squares(
        300,
        200,
        &[
            (5, 5, 11, 10),
            (85, 10, 16, 20),
            (150, 75, 21, 30),
            (180, 150, 31, 40),
            (20, 100, 51, 50),
        ],
    ));
    let workflow = SemanticWorkflow::builder()
        .segmenter(IntensitySegmenter)
        .background(0)
        .tile_size(100, 90)
        .build()
        .unwrap();
    let info = workflow.process(&image).unwrap();

    let mut found: Vec<(Label, f64)> = info
        .iter()
        .map(|row| (row.label().unwrap(), row.polygon().unsigned_area()))
        .collect();
    found.sort_by_key(|&(label, _)| label);
    let expected = [(10, 100.0), (20, 225.0), (30, 400.0), (40, 900.0), (50, 2500.0)];
    assert_eq!(found.len(), expected.len(), "{found:?}");
    for ((label, area), (expected_label, expected_area)) in found.iter().zip(expected) {
        assert_eq!(*label, expected_label);
        assert!((area - expected_area).abs() < 0.5, "class {label}: {area}");
    }
    assert!(!info.timing().get("workflow.ssl.segment").is_empty());
}

/// In-memory image whose right half cannot be read.
struct HalfBroken(DynamicImage);

impl Image for HalfBroken {
    fn width(&self) -> u32 {
        self.0.width()
    }

    fn height(&self) -> u32 {
        self.0.height()
    }

    fn channels(&self) -> u8 {
        1
    }

    fn fetch_pixels(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, WorkflowError> {
        if x >= self.0.width() / 2 {
            return Err(WorkflowError::PixelFetch {
                x,
                y,
                width,
                height,
                reason: "storage unavailable".to_owned(),
            });
        }
        self.0.fetch_pixels(x, y, width, height)
    }
}

#[test]
fn unreadable_tiles_are_skipped() {
    let pixels = squares(200, 100, &[(10, 10, 30, 255), (150, 40, 30, 255)]);
    let image = View::new(Arc::new(HalfBroken(pixels)));
    let workflow = SldcWorkflow::builder()
        .segmenter(ThresholdSegmenter::default())
        .add_catchall_classifier(CatchAll)
        .tile_size(100, 100)
        .overlap(0)
        .build()
        .unwrap();

    let info = workflow.process(&image).unwrap();
    assert_eq!(info.len(), 1);
    let bounds = info.polygons()[0].bounding_rect().unwrap();
    assert!((bounds.min().x - 10.0).abs() < 1e-6);
}

/// Segmenter failing on every tile.
struct Failing;

impl Segmenter for Failing {
    fn segment(&self, _image: &DynamicImage) -> Result<LabelMask, WorkflowError> {
        Err(WorkflowError::Collaborator {
            component: "segmenter",
            reason: "model not loaded".to_owned(),
        })
    }
}

#[test]
fn segmenter_failures_abort_the_run() {
    let workflow = SldcWorkflow::builder()
        .segmenter(Failing)
        .add_catchall_classifier(CatchAll)
        .tile_size(64, 64)
        .n_jobs(2)
        .build()
        .unwrap();
    let err = workflow
        .process(&View::from(disc(200, 100, 100, 50)))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Collaborator { component: "segmenter", .. }));
}

#[test]
fn border_policies() {
    // 250 px wide: the third column of 100 px tiles is only 60 px wide.
    let pixels = squares(250, 100, &[(10, 10, 30, 255), (210, 40, 30, 255)]);
    let run = |border_tiles: BorderTiles| {
        SldcWorkflow::builder()
            .segmenter(ThresholdSegmenter::default())
            .add_catchall_classifier(CatchAll)
            .tile_size(100, 100)
            .overlap(5)
            .border_tiles(border_tiles)
            .seg_batch_size(if border_tiles == BorderTiles::Keep { 1 } else { 2 })
            .build()
            .unwrap()
            .process(&View::from(pixels.clone()))
            .unwrap()
    };

    assert_eq!(run(BorderTiles::Keep).len(), 2);
    // The undersized column holding the second square is dropped.
    assert_eq!(run(BorderTiles::Skip).len(), 1);
    let extended = run(BorderTiles::Extend);
    assert_eq!(extended.len(), 2);
    for polygon in extended.polygons() {
        assert!((polygon.unsigned_area() - 841.0).abs() < 0.5);
    }
}

#[test]
fn chain_reprocesses_windows() {
    let image = View::from(squares(
        120,
        120,
        &[(10, 10, 20, 255), (60, 70, 25, 255)],
    ));
    let chain = WorkflowChain::builder()
        .first_workflow(sldc(50, 1))
        .add_executor_with(
            SemanticWorkflow::builder()
                .segmenter(IntensitySegmenter)
                .background(0)
                .tile_size(64, 64)
                .build()
                .unwrap(),
            KeepAll,
            ExecutorOptions {
                label: Some("refined".to_owned()),
                clip: true,
                n_jobs: 2,
            },
        )
        .build()
        .unwrap();

    let results = chain.process(&image).unwrap();
    let first = results.get("0").unwrap();
    let refined = results.get("refined").unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(refined.len(), 2);
    for (a, b) in first.polygons().iter().zip(refined.polygons()) {
        let (ra, rb) = (a.bounding_rect().unwrap(), b.bounding_rect().unwrap());
        assert!((ra.min().x - rb.min().x).abs() < 1e-6);
        assert!((ra.min().y - rb.min().y).abs() < 1e-6);
        assert!((a.unsigned_area() - b.unsigned_area()).abs() < 0.5);
    }
    assert_eq!(refined.labels(), &[Some(255), Some(255)]);
}

#[test]
fn results_serialize_to_json() {
    let info = sldc(64, 1)
        .process(&View::from(disc(128, 64, 64, 30)))
        .unwrap();
    let json = serde_json::to_string(&info).unwrap();
    assert!(json.contains("\"proba\""));
    assert!(json.contains("workflow.sldc.dispatch_classify.classify"));

    let back: WorkflowInformation = serde_json::from_str(&json).unwrap();
    assert_eq!(back.len(), info.len());
    assert_eq!(back.labels(), info.labels());
    assert_eq!(back.field("dispatch"), info.field("dispatch"));
}
