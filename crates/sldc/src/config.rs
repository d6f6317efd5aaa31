//! Workflow configuration.

use serde::{Deserialize, Serialize};

use crate::contour::ContourTracerKind;
use crate::topology::BorderTiles;
use crate::types::WorkflowError;

/// Tiling, merging and parallelism parameters of a workflow.
///
/// All parameters have defaults; missing fields take their default when
/// deserializing. Builders call [`validate`](Self::validate) once when the
/// workflow is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Maximum tile width in pixels.
    pub tile_width: u32,

    /// Maximum tile height in pixels.
    pub tile_height: u32,

    /// Number of pixels shared by adjacent tiles.
    ///
    /// Must be smaller than both tile dimensions.
    pub overlap: u32,

    /// Maximum distance between two fragments of the same object for them
    /// to be merged across a tile border.
    pub distance_tolerance: f64,

    /// Number of parallel workers.
    pub n_jobs: usize,

    /// Number of tiles handed to the segmenter at once.
    ///
    /// Values above 1 require tiles of identical size, so the border
    /// policy must be [`BorderTiles::Skip`] or [`BorderTiles::Extend`].
    pub seg_batch_size: usize,

    /// What to do with undersized tiles on the right and bottom edges.
    pub border_tiles: BorderTiles,

    /// Whether dispatch and classification also run on `n_jobs` workers.
    pub parallel_dispatch_classify: bool,

    /// Which contour tracing algorithm locators use.
    pub contour_tracer: ContourTracerKind,
}

impl WorkflowConfig {
    /// Default maximum tile width.
    pub const DEFAULT_TILE_WIDTH: u32 = 1024;
    /// Default maximum tile height.
    pub const DEFAULT_TILE_HEIGHT: u32 = 1024;
    /// Default tile overlap.
    pub const DEFAULT_OVERLAP: u32 = 7;
    /// Default merge tolerance.
    pub const DEFAULT_DISTANCE_TOLERANCE: f64 = 1.0;
    /// Default number of workers.
    pub const DEFAULT_N_JOBS: usize = 1;
    /// Default segmentation batch size.
    pub const DEFAULT_SEG_BATCH_SIZE: usize = 1;

    /// Check every parameter and their cross-constraints.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] describing the first
    /// violated constraint.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let invalid = |message: String| Err(WorkflowError::Configuration(message));
        if self.tile_width == 0 || self.tile_height == 0 {
            return invalid(format!(
                "tile dimensions must be positive, got {}x{}",
                self.tile_width, self.tile_height
            ));
        }
        if self.overlap >= self.tile_width.min(self.tile_height) {
            return invalid(format!(
                "overlap ({}) must be smaller than the tile dimensions ({}x{})",
                self.overlap, self.tile_width, self.tile_height
            ));
        }
        if !self.distance_tolerance.is_finite() || self.distance_tolerance < 0.0 {
            return invalid(format!(
                "distance tolerance must be a finite non-negative number, got {}",
                self.distance_tolerance
            ));
        }
        if self.n_jobs == 0 {
            return invalid("n_jobs must be at least 1".to_owned());
        }
        if self.seg_batch_size == 0 {
            return invalid("seg_batch_size must be at least 1".to_owned());
        }
        if self.seg_batch_size > 1 && self.border_tiles == BorderTiles::Keep {
            return invalid(format!(
                "seg_batch_size {} requires uniform tiles: use the `skip` or `extend` \
                 border policy",
                self.seg_batch_size
            ));
        }
        Ok(())
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            tile_width: Self::DEFAULT_TILE_WIDTH,
            tile_height: Self::DEFAULT_TILE_HEIGHT,
            overlap: Self::DEFAULT_OVERLAP,
            distance_tolerance: Self::DEFAULT_DISTANCE_TOLERANCE,
            n_jobs: Self::DEFAULT_N_JOBS,
            seg_batch_size: Self::DEFAULT_SEG_BATCH_SIZE,
            border_tiles: BorderTiles::default(),
            parallel_dispatch_classify: false,
            contour_tracer: ContourTracerKind::default(),
        }
    }
}
