//! Core types shared by every workflow stage.

use image::{ImageBuffer, Luma};

/// Class value attached to a polygon.
///
/// For semantic workflows this is the pixel class produced by the
/// segmenter. For SLDC workflows it is the class predicted by the
/// classifier the polygon was dispatched to.
pub type Label = u32;

/// 1-based identifier of a tile within a [`TileTopology`](crate::TileTopology).
pub type TileId = usize;

/// Label assigned to polygons when the caller does not provide any.
pub const DEFAULT_LABEL: Label = 1;

/// Per-pixel class map produced by a [`Segmenter`](crate::Segmenter).
///
/// Binary segmenters emit `0` (background) and `255` (foreground).
pub type LabelMask = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Errors that can occur while building or running a workflow.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Tiling, tolerance or worker parameters are invalid.
    #[error("invalid workflow configuration: {0}")]
    Configuration(String),

    /// A builder was asked to build without a mandatory component.
    #[error("missing workflow component: {0}")]
    MissingComponent(&'static str),

    /// A tile identifier outside `1..=count` was requested.
    #[error("tile identifier {identifier} is out of range 1..={count}")]
    OutOfRange {
        /// The requested identifier.
        identifier: TileId,
        /// Number of tiles in the topology.
        count: usize,
    },

    /// An image could not produce the requested pixels.
    #[error("cannot fetch {width}x{height} pixels at ({x}, {y}): {reason}")]
    PixelFetch {
        /// Left edge of the requested region.
        x: u32,
        /// Top edge of the requested region.
        y: u32,
        /// Width of the requested region.
        width: u32,
        /// Height of the requested region.
        height: u32,
        /// Human-readable cause.
        reason: String,
    },

    /// The pixels of a single tile could not be extracted.
    #[error("cannot extract tile {identifier}: {source}")]
    TileExtraction {
        /// The tile that failed.
        identifier: TileId,
        /// The underlying pixel fetch failure.
        #[source]
        source: Box<Self>,
    },

    /// An extra information field does not have one value per polygon.
    #[error("field `{field}` has {actual} values but there are {expected} polygons")]
    FieldLength {
        /// Name of the offending field.
        field: String,
        /// Number of polygons in the record set.
        expected: usize,
        /// Number of values supplied for the field.
        actual: usize,
    },

    /// Two result sets with different field names were merged.
    #[error("cannot merge workflow information with fields {left:?} into fields {right:?}")]
    IncompatibleSchema {
        /// Field names of the receiving record set.
        left: Vec<String>,
        /// Field names of the merged-in record set.
        right: Vec<String>,
    },

    /// A user-supplied collaborator (segmenter, classifier) failed.
    #[error("{component} failed: {reason}")]
    Collaborator {
        /// Which collaborator failed.
        component: &'static str,
        /// Human-readable cause.
        reason: String,
    },

    /// The worker pool could not be created or used.
    #[error("worker pool failure: {0}")]
    Worker(String),
}

impl WorkflowError {
    /// Whether this error only affects a single tile and can be absorbed
    /// by treating the tile as empty.
    #[must_use]
    pub const fn is_tile_local(&self) -> bool {
        matches!(self, Self::TileExtraction { .. } | Self::PixelFetch { .. })
    }
}
