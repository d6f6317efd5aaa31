//! sldc: Segment-Locate-Dispatch-Classify workflows for very large images.
//!
//! An image too large to process at once is cut into overlapping tiles:
//! tile -> segment -> locate -> merge across tile borders ->
//! dispatch -> classify.
//!
//! The segmentation algorithm, the dispatching rules and the classifiers
//! are supplied by the caller through the [`Segmenter`],
//! [`DispatchingRule`] and [`PolygonClassifier`] traits. This crate owns
//! the tiling, the cross-tile merging, the parallel execution and the
//! timing instrumentation.
//!
//! ```no_run
//! use sldc::{SldcWorkflow, ThresholdSegmenter, View, Workflow};
//! # use sldc::{Label, PolygonClassifier, WorkflowError};
//! # struct MyClassifier;
//! # impl PolygonClassifier for MyClassifier {
//! #     fn predict_batch(&self, _: &View, p: &[&geo::Polygon<f64>])
//! #         -> Result<(Vec<Label>, Vec<f64>), WorkflowError> {
//! #         Ok((vec![1; p.len()], vec![1.0; p.len()]))
//! #     }
//! # }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let image = View::from(image::open("slide.png")?);
//! let workflow = SldcWorkflow::builder()
//!     .segmenter(ThresholdSegmenter::new(128))
//!     .add_catchall_classifier(MyClassifier)
//!     .tile_size(512, 512)
//!     .n_jobs(4)
//!     .build()?;
//! let results = workflow.process(&image)?;
//! println!("{} objects\n{}", results.len(), results.timing().report());
//! # Ok(())
//! # }
//! ```

pub mod border;
pub mod chain;
pub mod config;
pub mod contour;
pub mod dispatch;
pub mod image;
pub mod information;
pub mod locate;
pub mod merge;
pub mod pool;
pub mod segment;
pub mod timing;
pub mod topology;
pub mod types;
pub mod workflow;

pub use border::{Side, TileBorderIndex};
pub use chain::{
    ExecutorOptions, KeepAll, LabelFilter, PolygonFilter, WorkflowChain, WorkflowChainBuilder,
};
pub use config::WorkflowConfig;
pub use contour::{ContourTracer, ContourTracerKind};
pub use dispatch::{
    CatchAllRule, Classification, DispatchingRule, Dispatcher, DispatcherClassifier,
    PolygonClassifier,
};
pub use crate::image::{Image, Tile, View};
pub use information::{ChainInformation, FieldValue, Record, WorkflowInformation};
pub use locate::{BinaryLocator, Locator, SemanticLocator};
pub use merge::{PolygonMerger, TilePolygons};
pub use pool::WorkerPool;
pub use segment::{IntensitySegmenter, Segmenter, ThresholdSegmenter};
pub use timing::{PhaseStats, PhaseTree, WorkflowTiming};
pub use topology::{BorderTiles, Neighbours, TileTopology, batch_split};
pub use types::{DEFAULT_LABEL, Label, LabelMask, TileId, WorkflowError};
pub use workflow::{
    DISPATCH_FIELD, PROBA_FIELD, SemanticWorkflow, SemanticWorkflowBuilder, SldcWorkflow,
    SldcWorkflowBuilder, Workflow,
};
