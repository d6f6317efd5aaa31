//! Tiled workflows.
//!
//! Both workflows share the same shape:
//!
//! 1. Build the [`TileTopology`] of the processed view.
//! 2. Segment-locate: split tile identifiers into `n_jobs` batches and,
//!    on each worker, fetch, segment and locate every tile of its batch.
//! 3. Merge the per-tile polygons across tile borders.
//! 4. SLDC only: dispatch and classify the merged polygons, optionally on
//!    the workers as well.
//!
//! A tile whose pixels cannot be fetched is logged and contributes no
//! polygon. Every other error aborts the run.

use std::collections::BTreeMap;

use geo::Polygon;
use image::DynamicImage;

use crate::config::WorkflowConfig;
use crate::dispatch::{
    CatchAllRule, Classification, DispatchingRule, Dispatcher, DispatcherClassifier,
    PolygonClassifier,
};
use crate::image::{Tile, View};
use crate::information::{FieldValue, WorkflowInformation};
use crate::locate::{BinaryLocator, Locator, SemanticLocator};
use crate::merge::{PolygonMerger, TilePolygons};
use crate::pool::WorkerPool;
use crate::segment::Segmenter;
use crate::timing::WorkflowTiming;
use crate::topology::{BorderTiles, TileTopology, batch_split};
use crate::types::{Label, TileId, WorkflowError};

/// Timing root of [`SldcWorkflow`].
pub const SLDC_TIMING_ROOT: &str = "workflow.sldc";
/// Timing root of [`SemanticWorkflow`].
pub const SEMANTIC_TIMING_ROOT: &str = "workflow.ssl";

/// Name of the dispatch label field of SLDC results.
pub const DISPATCH_FIELD: &str = "dispatch";
/// Name of the probability field of SLDC results.
pub const PROBA_FIELD: &str = "proba";

/// A complete detection workflow.
pub trait Workflow: Send + Sync {
    /// Run the workflow on `image`.
    ///
    /// Polygons of the result are expressed in `image` coordinates.
    ///
    /// # Errors
    ///
    /// Returns any non tile-local failure: invalid configuration for this
    /// image, collaborator failures and worker failures.
    fn process(&self, image: &View) -> Result<WorkflowInformation, WorkflowError>;
}

// ---------------------------------------------------------------------------
// Segment-locate stage
// ---------------------------------------------------------------------------

/// Per-tile half of a workflow, shared by both variants.
struct TileStage<'a> {
    segmenter: &'a dyn Segmenter,
    locator: &'a dyn Locator,
    seg_batch_size: usize,
    root: &'a str,
}

impl TileStage<'_> {
    /// Fetch, segment and locate the tiles of one worker batch.
    fn run(
        &self,
        image: &View,
        topology: &TileTopology,
        identifiers: &[TileId],
    ) -> Result<(Vec<TilePolygons>, WorkflowTiming), WorkflowError> {
        let mut timing = WorkflowTiming::with_root(self.root);
        let mut found = Vec::with_capacity(identifiers.len());

        for chunk in identifiers.chunks(self.seg_batch_size.max(1)) {
            timing.start("fetch");
            let mut tiles: Vec<Tile> = Vec::with_capacity(chunk.len());
            let mut pixels: Vec<DynamicImage> = Vec::with_capacity(chunk.len());
            for &identifier in chunk {
                let tile = topology.tile(image, identifier)?;
                match tile.pixels() {
                    Ok(data) => {
                        tiles.push(tile);
                        pixels.push(data);
                    }
                    Err(e) if e.is_tile_local() => {
                        tracing::warn!(tile = identifier, error = %e, "skipping tile");
                        found.push(TilePolygons::unlabelled(identifier, Vec::new()));
                    }
                    Err(e) => return Err(e),
                }
            }
            timing.end("fetch");
            if tiles.is_empty() {
                continue;
            }

            let masks = timing.time("segment", || self.segmenter.segment_batch(&pixels))?;
            if masks.len() != tiles.len() {
                return Err(WorkflowError::Collaborator {
                    component: "segmenter",
                    reason: format!("{} masks for {} tiles", masks.len(), tiles.len()),
                });
            }

            timing.start("locate");
            for (tile, mask) in tiles.iter().zip(&masks) {
                let expected = (tile.view().width(), tile.view().height());
                if mask.dimensions() != expected {
                    return Err(WorkflowError::Collaborator {
                        component: "segmenter",
                        reason: format!(
                            "mask of tile {} is {:?}, expected {expected:?}",
                            tile.identifier(),
                            mask.dimensions()
                        ),
                    });
                }
                let located = self.locator.locate(mask, tile.offset());
                found.push(TilePolygons::from_located(tile.identifier(), located));
            }
            timing.end("locate");
        }
        Ok((found, timing))
    }
}

/// Topology, segment-locate and merge: everything up to merged polygons.
fn locate_and_merge(
    stage: &TileStage<'_>,
    config: &WorkflowConfig,
    merger: &PolygonMerger,
    pool: &WorkerPool,
    image: &View,
    timing: &mut WorkflowTiming,
) -> Result<(Vec<Polygon<f64>>, Vec<Label>), WorkflowError> {
    let topology = image.tile_topology(
        config.tile_width,
        config.tile_height,
        config.overlap,
        config.border_tiles,
    )?;
    let batches = topology.partition_identifiers(pool.n_jobs());
    tracing::debug!(
        tiles = topology.tile_count(),
        batches = batches.len(),
        width = image.width(),
        height = image.height(),
        "segment-locate"
    );

    let results = pool.map(batches, |batch| stage.run(image, &topology, &batch))?;
    let mut tiles = Vec::with_capacity(topology.tile_count());
    for (found, batch_timing) in results {
        tiles.extend(found);
        timing.merge(&batch_timing);
    }

    let (polygons, labels) = timing.time("merge", || merger.merge(&tiles, &topology))?;
    tracing::debug!(polygons = polygons.len(), "merged");
    Ok((polygons, labels))
}

// ---------------------------------------------------------------------------
// SLDC workflow
// ---------------------------------------------------------------------------

/// Segment, locate, dispatch and classify.
///
/// The label of each result polygon is the class predicted by the
/// classifier it was dispatched to (`None` when no rule matched). Results
/// carry the [`DISPATCH_FIELD`] and [`PROBA_FIELD`] extra fields.
pub struct SldcWorkflow {
    config: WorkflowConfig,
    segmenter: Box<dyn Segmenter>,
    locator: Box<dyn Locator>,
    merger: PolygonMerger,
    dispatcher_classifier: DispatcherClassifier,
    pool: WorkerPool,
}

impl std::fmt::Debug for SldcWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SldcWorkflow")
            .field("config", &self.config)
            .field("dispatcher_classifier", &self.dispatcher_classifier)
            .finish_non_exhaustive()
    }
}

impl SldcWorkflow {
    /// Start building an SLDC workflow.
    #[must_use]
    pub fn builder() -> SldcWorkflowBuilder {
        SldcWorkflowBuilder::default()
    }

    /// The workflow configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Change the number of workers used by later runs.
    pub fn set_n_jobs(&mut self, n_jobs: usize) {
        self.config.n_jobs = n_jobs.max(1);
        self.pool.resize(n_jobs);
    }

    fn dispatch_classify(
        &self,
        image: &View,
        polygons: &[Polygon<f64>],
        timing: &mut WorkflowTiming,
    ) -> Result<Classification, WorkflowError> {
        let root = format!("{SLDC_TIMING_ROOT}.dispatch_classify");
        let indices: Vec<usize> = (0..polygons.len()).collect();
        let batches = if self.config.parallel_dispatch_classify {
            batch_split(self.pool.n_jobs(), indices)
        } else {
            vec![indices]
        };

        let run = |batch: Vec<usize>| {
            let mut batch_timing = WorkflowTiming::with_root(root.as_str());
            let refs: Vec<&Polygon<f64>> = batch.iter().map(|&i| &polygons[i]).collect();
            self.dispatcher_classifier
                .dispatch_classify_batch(image, &refs, &mut batch_timing)
                .map(|classification| (classification, batch_timing))
        };
        let results = if self.config.parallel_dispatch_classify {
            self.pool.map(batches, run)?
        } else {
            batches.into_iter().map(run).collect::<Result<Vec<_>, _>>()?
        };

        let mut classification = Classification::default();
        for (batch, batch_timing) in results {
            classification.extend(batch);
            timing.merge(&batch_timing);
        }
        Ok(classification)
    }
}

impl Workflow for SldcWorkflow {
    fn process(&self, image: &View) -> Result<WorkflowInformation, WorkflowError> {
        let mut timing = WorkflowTiming::with_root(SLDC_TIMING_ROOT);
        let stage = TileStage {
            segmenter: self.segmenter.as_ref(),
            locator: self.locator.as_ref(),
            seg_batch_size: self.config.seg_batch_size,
            root: SLDC_TIMING_ROOT,
        };
        let (polygons, _) = locate_and_merge(
            &stage,
            &self.config,
            &self.merger,
            &self.pool,
            image,
            &mut timing,
        )?;

        timing.start("dispatch_classify");
        let classification = self.dispatch_classify(image, &polygons, &mut timing)?;
        timing.end("dispatch_classify");

        let dispatches = classification
            .dispatches
            .into_iter()
            .map(FieldValue::from)
            .collect();
        let probas = classification
            .probabilities
            .into_iter()
            .map(FieldValue::Float)
            .collect();
        WorkflowInformation::new(polygons, classification.predictions, timing)?
            .with_field(DISPATCH_FIELD, dispatches)?
            .with_field(PROBA_FIELD, probas)
    }
}

/// Builder of [`SldcWorkflow`].
///
/// Classifiers are registered either with dispatching rules
/// ([`add_classifier`](Self::add_classifier),
/// [`add_catchall_classifier`](Self::add_catchall_classifier)) or all at
/// once with a one-shot dispatch function
/// ([`one_shot_dispatcher`](Self::one_shot_dispatcher)). Mixing both is a
/// configuration error.
#[derive(Default)]
pub struct SldcWorkflowBuilder {
    config: WorkflowConfig,
    segmenter: Option<Box<dyn Segmenter>>,
    locator: Option<Box<dyn Locator>>,
    rules: Vec<Box<dyn DispatchingRule>>,
    rule_labels: Vec<String>,
    rule_classifiers: Vec<Box<dyn PolygonClassifier>>,
    one_shot: Option<(Dispatcher, Vec<Box<dyn PolygonClassifier>>)>,
}

impl SldcWorkflowBuilder {
    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Maximum tile size.
    #[must_use]
    pub fn tile_size(mut self, width: u32, height: u32) -> Self {
        self.config.tile_width = width;
        self.config.tile_height = height;
        self
    }

    /// Tile overlap.
    #[must_use]
    pub fn overlap(mut self, overlap: u32) -> Self {
        self.config.overlap = overlap;
        self
    }

    /// Merge tolerance.
    #[must_use]
    pub fn distance_tolerance(mut self, tolerance: f64) -> Self {
        self.config.distance_tolerance = tolerance;
        self
    }

    /// Number of workers.
    #[must_use]
    pub fn n_jobs(mut self, n_jobs: usize) -> Self {
        self.config.n_jobs = n_jobs;
        self
    }

    /// Tiles per segmentation call.
    #[must_use]
    pub fn seg_batch_size(mut self, size: usize) -> Self {
        self.config.seg_batch_size = size;
        self
    }

    /// Border tile policy.
    #[must_use]
    pub fn border_tiles(mut self, border_tiles: BorderTiles) -> Self {
        self.config.border_tiles = border_tiles;
        self
    }

    /// Also run dispatch and classification on the workers.
    #[must_use]
    pub fn parallel_dispatch_classify(mut self, parallel: bool) -> Self {
        self.config.parallel_dispatch_classify = parallel;
        self
    }

    /// The segmenter (mandatory).
    #[must_use]
    pub fn segmenter(mut self, segmenter: impl Segmenter + 'static) -> Self {
        self.segmenter = Some(Box::new(segmenter));
        self
    }

    /// Replace the default [`BinaryLocator`].
    #[must_use]
    pub fn locator(mut self, locator: impl Locator + 'static) -> Self {
        self.locator = Some(Box::new(locator));
        self
    }

    /// Route polygons matching `rule` to `classifier`.
    ///
    /// The dispatch label is the index of the rule.
    #[must_use]
    pub fn add_classifier(
        self,
        rule: impl DispatchingRule + 'static,
        classifier: impl PolygonClassifier + 'static,
    ) -> Self {
        let label = self.rules.len().to_string();
        self.add_labelled_classifier(rule, classifier, label)
    }

    /// Route polygons matching `rule` to `classifier` under `label`.
    #[must_use]
    pub fn add_labelled_classifier(
        mut self,
        rule: impl DispatchingRule + 'static,
        classifier: impl PolygonClassifier + 'static,
        label: impl Into<String>,
    ) -> Self {
        self.rules.push(Box::new(rule));
        self.rule_labels.push(label.into());
        self.rule_classifiers.push(Box::new(classifier));
        self
    }

    /// Route every polygon no earlier rule matched to `classifier`.
    #[must_use]
    pub fn add_catchall_classifier(self, classifier: impl PolygonClassifier + 'static) -> Self {
        self.add_classifier(CatchAllRule, classifier)
    }

    /// Dispatch with `dispatch`, whose labels select among `classifiers`.
    #[must_use]
    pub fn one_shot_dispatcher<F>(
        mut self,
        dispatch: F,
        classifiers: Vec<(String, Box<dyn PolygonClassifier>)>,
    ) -> Self
    where
        F: Fn(&View, &Polygon<f64>) -> Option<String> + Send + Sync + 'static,
    {
        let mut mapping = BTreeMap::new();
        let mut boxed = Vec::with_capacity(classifiers.len());
        for (label, classifier) in classifiers {
            mapping.insert(label, boxed.len());
            boxed.push(classifier);
        }
        self.one_shot = Some((Dispatcher::custom(dispatch, mapping), boxed));
        self
    }

    /// Validate and assemble the workflow.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::MissingComponent`] without segmenter or
    /// classifier, and [`WorkflowError::Configuration`] for an invalid
    /// configuration or when rules and a one-shot dispatcher are mixed.
    pub fn build(self) -> Result<SldcWorkflow, WorkflowError> {
        self.config.validate()?;
        let segmenter = self
            .segmenter
            .ok_or(WorkflowError::MissingComponent("segmenter"))?;

        let (dispatcher, classifiers) = match (self.one_shot, self.rules.is_empty()) {
            (Some(_), false) => {
                return Err(WorkflowError::Configuration(
                    "cannot mix dispatching rules with a one-shot dispatcher".to_owned(),
                ));
            }
            (Some(one_shot), true) => one_shot,
            (None, false) => (
                Dispatcher::RuleBased {
                    rules: self.rules,
                    labels: self.rule_labels,
                },
                self.rule_classifiers,
            ),
            (None, true) => return Err(WorkflowError::MissingComponent("classifier")),
        };
        if classifiers.is_empty() {
            return Err(WorkflowError::MissingComponent("classifier"));
        }

        let locator = self
            .locator
            .unwrap_or_else(|| Box::new(BinaryLocator::new(self.config.contour_tracer)));
        Ok(SldcWorkflow {
            merger: PolygonMerger::new(self.config.distance_tolerance)?,
            pool: WorkerPool::new(self.config.n_jobs),
            dispatcher_classifier: DispatcherClassifier::new(dispatcher, classifiers)?,
            config: self.config,
            segmenter,
            locator,
        })
    }
}

// ---------------------------------------------------------------------------
// Semantic workflow
// ---------------------------------------------------------------------------

/// Segment, locate and merge, with the pixel class as label.
///
/// Results have no extra field.
pub struct SemanticWorkflow {
    config: WorkflowConfig,
    segmenter: Box<dyn Segmenter>,
    locator: SemanticLocator,
    merger: PolygonMerger,
    pool: WorkerPool,
}

impl std::fmt::Debug for SemanticWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticWorkflow")
            .field("config", &self.config)
            .field("locator", &self.locator)
            .finish_non_exhaustive()
    }
}

impl SemanticWorkflow {
    /// Start building a semantic workflow.
    #[must_use]
    pub fn builder() -> SemanticWorkflowBuilder {
        SemanticWorkflowBuilder::default()
    }

    /// The workflow configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Class values the segmenter can emit, background excluded.
    #[must_use]
    pub fn classes(&self) -> Vec<Label> {
        self.segmenter
            .classes()
            .into_iter()
            .filter(|&class| Some(class) != self.locator.background())
            .collect()
    }

    /// Change the number of workers used by later runs.
    pub fn set_n_jobs(&mut self, n_jobs: usize) {
        self.config.n_jobs = n_jobs.max(1);
        self.pool.resize(n_jobs);
    }
}

impl Workflow for SemanticWorkflow {
    fn process(&self, image: &View) -> Result<WorkflowInformation, WorkflowError> {
        let mut timing = WorkflowTiming::with_root(SEMANTIC_TIMING_ROOT);
        let stage = TileStage {
            segmenter: self.segmenter.as_ref(),
            locator: &self.locator,
            seg_batch_size: self.config.seg_batch_size,
            root: SEMANTIC_TIMING_ROOT,
        };
        let (polygons, labels) = locate_and_merge(
            &stage,
            &self.config,
            &self.merger,
            &self.pool,
            image,
            &mut timing,
        )?;
        WorkflowInformation::new(polygons, labels.into_iter().map(Some).collect(), timing)
    }
}

/// Builder of [`SemanticWorkflow`].
#[derive(Default)]
pub struct SemanticWorkflowBuilder {
    config: WorkflowConfig,
    segmenter: Option<Box<dyn Segmenter>>,
    background: Option<Label>,
}

impl SemanticWorkflowBuilder {
    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Maximum tile size.
    #[must_use]
    pub fn tile_size(mut self, width: u32, height: u32) -> Self {
        self.config.tile_width = width;
        self.config.tile_height = height;
        self
    }

    /// Tile overlap.
    #[must_use]
    pub fn overlap(mut self, overlap: u32) -> Self {
        self.config.overlap = overlap;
        self
    }

    /// Merge tolerance.
    #[must_use]
    pub fn distance_tolerance(mut self, tolerance: f64) -> Self {
        self.config.distance_tolerance = tolerance;
        self
    }

    /// Number of workers.
    #[must_use]
    pub fn n_jobs(mut self, n_jobs: usize) -> Self {
        self.config.n_jobs = n_jobs;
        self
    }

    /// Border tile policy.
    #[must_use]
    pub fn border_tiles(mut self, border_tiles: BorderTiles) -> Self {
        self.config.border_tiles = border_tiles;
        self
    }

    /// The segmenter (mandatory).
    #[must_use]
    pub fn segmenter(mut self, segmenter: impl Segmenter + 'static) -> Self {
        self.segmenter = Some(Box::new(segmenter));
        self
    }

    /// Class value never turned into polygons.
    #[must_use]
    pub fn background(mut self, class: Label) -> Self {
        self.background = Some(class);
        self
    }

    /// Validate and assemble the workflow.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::MissingComponent`] without segmenter and
    /// [`WorkflowError::Configuration`] for an invalid configuration.
    pub fn build(self) -> Result<SemanticWorkflow, WorkflowError> {
        self.config.validate()?;
        let segmenter = self
            .segmenter
            .ok_or(WorkflowError::MissingComponent("segmenter"))?;
        Ok(SemanticWorkflow {
            locator: SemanticLocator::new(self.background, self.config.contour_tracer),
            merger: PolygonMerger::new(self.config.distance_tolerance)?,
            pool: WorkerPool::new(self.config.n_jobs),
            config: self.config,
            segmenter,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;
    use crate::segment::ThresholdSegmenter;

    struct Constant;

    impl PolygonClassifier for Constant {
        fn predict_batch(
            &self,
            _image: &View,
            polygons: &[&Polygon<f64>],
        ) -> Result<(Vec<Label>, Vec<f64>), WorkflowError> {
            Ok((vec![5; polygons.len()], vec![1.0; polygons.len()]))
        }
    }

    fn blobs() -> View {
        // Two 20x20 squares, the second one straddling the tile border at x=50.
        View::from(image::DynamicImage::ImageLuma8(GrayImage::from_fn(
            100,
            60,
            |x, y| {
                let a = (5..25).contains(&x) && (5..25).contains(&y);
                let b = (40..60).contains(&x) && (30..50).contains(&y);
                Luma([if a || b { 255 } else { 0 }])
            },
        )))
    }

    #[test]
    fn build_requires_components() {
        let err = SldcWorkflow::builder()
            .add_catchall_classifier(Constant)
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingComponent("segmenter")));

        let err = SldcWorkflow::builder()
            .segmenter(ThresholdSegmenter::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingComponent("classifier")));

        let err = SemanticWorkflow::builder().build().unwrap_err();
        assert!(matches!(err, WorkflowError::MissingComponent("segmenter")));
    }

    #[test]
    fn build_rejects_mixed_dispatch() {
        let err = SldcWorkflow::builder()
            .segmenter(ThresholdSegmenter::default())
            .add_catchall_classifier(Constant)
            .one_shot_dispatcher(
                |_: &View, _: &Polygon<f64>| Some("a".to_owned()),
                vec![("a".to_owned(), Box::new(Constant) as Box<dyn PolygonClassifier>)],
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));
    }

    #[test]
    fn build_validates_config() {
        let err = SldcWorkflow::builder()
            .segmenter(ThresholdSegmenter::default())
            .add_catchall_classifier(Constant)
            .seg_batch_size(2)
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));
    }

    #[test]
    fn sldc_process_merges_and_classifies() {
        let workflow = SldcWorkflow::builder()
            .segmenter(ThresholdSegmenter::default())
            .add_catchall_classifier(Constant)
            .tile_size(50, 50)
            .overlap(3)
            .build()
            .unwrap();
        let info = workflow.process(&blobs()).unwrap();

        assert_eq!(info.len(), 2);
        assert!(info.labels().iter().all(|label| *label == Some(5)));
        let dispatch = info.field(DISPATCH_FIELD).unwrap();
        assert!(dispatch.iter().all(|d| d.as_text() == Some("0")));
        let timing = info.timing();
        for phase in ["fetch", "segment", "locate", "merge", "dispatch_classify"] {
            assert!(
                !timing.get(&format!("{SLDC_TIMING_ROOT}.{phase}")).is_empty(),
                "{phase}"
            );
        }
        assert_eq!(
            timing
                .get("workflow.sldc.dispatch_classify.classify")
                .len(),
            1
        );
    }

    #[test]
    fn one_shot_dispatcher_routes_by_label() {
        let workflow = SldcWorkflow::builder()
            .segmenter(ThresholdSegmenter::default())
            .one_shot_dispatcher(
                |_: &View, polygon: &Polygon<f64>| {
                    use geo::Centroid;
                    let x = polygon.centroid()?.x();
                    (x < 30.0).then(|| "left".to_owned())
                },
                vec![("left".to_owned(), Box::new(Constant) as Box<dyn PolygonClassifier>)],
            )
            .tile_size(50, 50)
            .overlap(3)
            .build()
            .unwrap();
        let info = workflow.process(&blobs()).unwrap();
        let mut labels: Vec<_> = info.labels().to_vec();
        labels.sort_unstable();
        assert_eq!(labels, vec![None, Some(5)]);
    }

    #[test]
    fn parallel_dispatch_matches_sequential() {
        let build = |parallel| {
            SldcWorkflow::builder()
                .segmenter(ThresholdSegmenter::default())
                .add_catchall_classifier(Constant)
                .tile_size(30, 30)
                .overlap(2)
                .n_jobs(3)
                .parallel_dispatch_classify(parallel)
                .build()
                .unwrap()
        };
        let sequential = build(false).process(&blobs()).unwrap();
        let parallel = build(true).process(&blobs()).unwrap();
        assert_eq!(sequential.polygons(), parallel.polygons());
        assert_eq!(sequential.labels(), parallel.labels());
    }

    #[test]
    fn semantic_workflow_excludes_background() {
        let workflow = SemanticWorkflow::builder()
            .segmenter(crate::segment::IntensitySegmenter)
            .background(0)
            .tile_size(50, 50)
            .overlap(3)
            .build()
            .unwrap();
        assert_eq!(workflow.classes().len(), 255);
        let info = workflow.process(&blobs()).unwrap();
        assert_eq!(info.len(), 2);
        assert!(info.labels().iter().all(|label| *label == Some(255)));
        assert_eq!(info.field_names().count(), 0);
        assert!(!info.timing().get("workflow.ssl.merge").is_empty());
    }
}
