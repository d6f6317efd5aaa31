//! Tile topology: deterministic addressing of the tiles covering an image.
//!
//! A [`TileTopology`] maps an image size, a maximum tile size and an
//! overlap into a row-major grid of tiles. Identifiers are 1-based:
//! identifier `1` is the top-left tile, identifier `H` the top-right one
//! (with `H` the number of tiles per row) and `V * H` the bottom-right one.
//!
//! Every look-up (offset, size, neighbours) is pure row/column arithmetic,
//! so a topology can be shared by all workers without locking.
//!
//! # Border tiles
//!
//! When the image size is not a multiple of the tile stride, the last
//! column and row of tiles are narrower than the maximum tile size. The
//! [`BorderTiles`] policy decides what happens to them:
//!
//! - [`Keep`](BorderTiles::Keep): keep them, smaller than the others.
//! - [`Skip`](BorderTiles::Skip): drop the undersized column and row from
//!   the grid, so every addressable tile has the full size.
//! - [`Extend`](BorderTiles::Extend): shift them backwards so they keep the
//!   full size, overlapping their predecessor a bit more.

use serde::{Deserialize, Serialize};

use crate::border::Side;
use crate::image::{Tile, View};
use crate::types::{TileId, WorkflowError};

/// Policy applied to tiles on the right and bottom edges of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderTiles {
    /// Border tiles are clamped to the image and may be smaller.
    #[default]
    Keep,
    /// Undersized border tiles are removed from the grid.
    Skip,
    /// Border tiles are moved inwards so they keep the full tile size.
    Extend,
}

/// The four direct neighbours of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Neighbours {
    /// Tile above, in the same column.
    pub top: Option<TileId>,
    /// Tile below, in the same column.
    pub bottom: Option<TileId>,
    /// Tile on the left, in the same row.
    pub left: Option<TileId>,
    /// Tile on the right, in the same row.
    pub right: Option<TileId>,
}

impl Neighbours {
    /// Present neighbours paired with the side of the tile they touch.
    pub fn iter(&self) -> impl Iterator<Item = (Side, TileId)> {
        [
            (Side::Top, self.top),
            (Side::Bottom, self.bottom),
            (Side::Left, self.left),
            (Side::Right, self.right),
        ]
        .into_iter()
        .filter_map(|(side, neighbour)| neighbour.map(|id| (side, id)))
    }
}

/// Addressable grid of tiles covering an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileTopology {
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
    overlap: u32,
    border_tiles: BorderTiles,
    horizontal_count: usize,
    vertical_count: usize,
}

impl TileTopology {
    /// Build the topology of a `image_width` x `image_height` image.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if a tile dimension or an
    /// image dimension is zero, or if `overlap >= min(tile_width, tile_height)`.
    pub fn new(
        image_width: u32,
        image_height: u32,
        tile_width: u32,
        tile_height: u32,
        overlap: u32,
        border_tiles: BorderTiles,
    ) -> Result<Self, WorkflowError> {
        if tile_width == 0 || tile_height == 0 {
            return Err(WorkflowError::Configuration(format!(
                "tile dimensions must be positive, got {tile_width}x{tile_height}"
            )));
        }
        if image_width == 0 || image_height == 0 {
            return Err(WorkflowError::Configuration(format!(
                "cannot tile an empty {image_width}x{image_height} image"
            )));
        }
        if overlap >= tile_width.min(tile_height) {
            return Err(WorkflowError::Configuration(format!(
                "overlap ({overlap}) must be smaller than the tile dimensions \
                 ({tile_width}x{tile_height})"
            )));
        }

        let mut horizontal_count = Self::tile_count_1d(image_width, tile_width, overlap);
        let mut vertical_count = Self::tile_count_1d(image_height, tile_height, overlap);

        if border_tiles == BorderTiles::Skip {
            if last_tile_is_short(image_width, tile_width, overlap, horizontal_count) {
                horizontal_count -= 1;
            }
            if last_tile_is_short(image_height, tile_height, overlap, vertical_count) {
                vertical_count -= 1;
            }
            if horizontal_count == 0 || vertical_count == 0 {
                horizontal_count = 0;
                vertical_count = 0;
            }
        }

        Ok(Self {
            image_width,
            image_height,
            tile_width,
            tile_height,
            overlap,
            border_tiles,
            horizontal_count,
            vertical_count,
        })
    }

    /// Number of tiles needed to cover `length` pixels along one axis.
    ///
    /// `1` when the axis is shorter than a tile, otherwise
    /// `ceil((length - overlap) / (tile_length - overlap))`.
    /// Requires `overlap < tile_length`.
    #[must_use]
    pub const fn tile_count_1d(length: u32, tile_length: u32, overlap: u32) -> usize {
        if length < tile_length {
            1
        } else {
            (length - overlap).div_ceil(tile_length - overlap) as usize
        }
    }

    /// Width of the tiled image.
    #[must_use]
    pub const fn image_width(&self) -> u32 {
        self.image_width
    }

    /// Height of the tiled image.
    #[must_use]
    pub const fn image_height(&self) -> u32 {
        self.image_height
    }

    /// Maximum tile width.
    #[must_use]
    pub const fn tile_width(&self) -> u32 {
        self.tile_width
    }

    /// Maximum tile height.
    #[must_use]
    pub const fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// Number of pixels shared by two adjacent tiles.
    #[must_use]
    pub const fn overlap(&self) -> u32 {
        self.overlap
    }

    /// Border policy this topology was built with.
    #[must_use]
    pub const fn border_tiles(&self) -> BorderTiles {
        self.border_tiles
    }

    /// Number of tiles per row.
    #[must_use]
    pub const fn horizontal_count(&self) -> usize {
        self.horizontal_count
    }

    /// Number of tiles per column.
    #[must_use]
    pub const fn vertical_count(&self) -> usize {
        self.vertical_count
    }

    /// Total number of addressable tiles.
    #[must_use]
    pub const fn tile_count(&self) -> usize {
        self.horizontal_count * self.vertical_count
    }

    /// All valid identifiers, in row-major order.
    pub fn identifiers(&self) -> impl Iterator<Item = TileId> + use<> {
        1..=self.tile_count()
    }

    /// `(row, col)` of a tile, both 0-based.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::OutOfRange`] for an unknown identifier.
    pub const fn tile_coord(&self, identifier: TileId) -> Result<(usize, usize), WorkflowError> {
        if identifier == 0 || identifier > self.tile_count() {
            return Err(WorkflowError::OutOfRange {
                identifier,
                count: self.tile_count(),
            });
        }
        let index = identifier - 1;
        Ok((
            index / self.horizontal_count,
            index % self.horizontal_count,
        ))
    }

    /// Identifier of the tile at `(row, col)`, both 0-based.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::OutOfRange`] if the cell is outside the grid.
    pub const fn identifier(&self, row: usize, col: usize) -> Result<TileId, WorkflowError> {
        if row >= self.vertical_count || col >= self.horizontal_count {
            return Err(WorkflowError::OutOfRange {
                identifier: row * self.horizontal_count + col + 1,
                count: self.tile_count(),
            });
        }
        Ok(row * self.horizontal_count + col + 1)
    }

    /// Top-left corner `(x, y)` of a tile in image coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::OutOfRange`] for an unknown identifier.
    pub fn tile_offset(&self, identifier: TileId) -> Result<(u32, u32), WorkflowError> {
        let (row, col) = self.tile_coord(identifier)?;
        Ok((
            self.axis_offset(col, self.tile_width, self.image_width),
            self.axis_offset(row, self.tile_height, self.image_height),
        ))
    }

    /// `(width, height)` of a tile, clamped to the image.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::OutOfRange`] for an unknown identifier.
    pub fn tile_size(&self, identifier: TileId) -> Result<(u32, u32), WorkflowError> {
        let (x, y) = self.tile_offset(identifier)?;
        Ok((
            self.tile_width.min(self.image_width - x),
            self.tile_height.min(self.image_height - y),
        ))
    }

    /// The (top, bottom, left, right) neighbours of a tile.
    ///
    /// Left and right neighbours are always in the same row and top and
    /// bottom neighbours in the same column: the grid does not wrap.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::OutOfRange`] for an unknown identifier.
    pub fn tile_neighbours(&self, identifier: TileId) -> Result<Neighbours, WorkflowError> {
        let (row, col) = self.tile_coord(identifier)?;
        let h = self.horizontal_count;
        Ok(Neighbours {
            top: (row > 0).then(|| identifier - h),
            bottom: (row + 1 < self.vertical_count).then(|| identifier + h),
            left: (col > 0).then(|| identifier - 1),
            right: (col + 1 < h).then(|| identifier + 1),
        })
    }

    /// Bounded view of a tile of `image`.
    ///
    /// No pixel is read here: fetching is deferred to [`Tile::pixels`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::OutOfRange`] for an unknown identifier and
    /// [`WorkflowError::Configuration`] if `image` does not have the size
    /// this topology was built for.
    pub fn tile(&self, image: &View, identifier: TileId) -> Result<Tile, WorkflowError> {
        if image.width() != self.image_width || image.height() != self.image_height {
            return Err(WorkflowError::Configuration(format!(
                "topology built for a {}x{} image, got {}x{}",
                self.image_width,
                self.image_height,
                image.width(),
                image.height()
            )));
        }
        let (x, y) = self.tile_offset(identifier)?;
        let (width, height) = self.tile_size(identifier)?;
        let view = image.window(x, y, width, height)?;
        Ok(Tile::new(identifier, view))
    }

    /// Split all identifiers into at most `n` contiguous batches of
    /// near-equal size. See [`batch_split`].
    #[must_use]
    pub fn partition_identifiers(&self, n: usize) -> Vec<Vec<TileId>> {
        let identifiers: Vec<TileId> = self.identifiers().collect();
        batch_split(n, identifiers)
    }

    fn axis_offset(&self, index: usize, tile_length: u32, length: u32) -> u32 {
        let stride = u64::from(tile_length - self.overlap);
        let natural = u32::try_from(index as u64 * stride).unwrap_or(u32::MAX);
        match self.border_tiles {
            BorderTiles::Keep | BorderTiles::Skip => natural,
            BorderTiles::Extend => natural.min(length.saturating_sub(tile_length)),
        }
    }
}

/// Whether the last tile along an axis is narrower than `tile_length`.
const fn last_tile_is_short(length: u32, tile_length: u32, overlap: u32, count: usize) -> bool {
    let last_offset = (count as u64 - 1) * (tile_length - overlap) as u64;
    last_offset + tile_length as u64 > length as u64
}

/// Split `items` into at most `n_batches` contiguous batches.
///
/// When there are at least as many batches as items, every item gets its
/// own batch. Otherwise the first `len % n_batches` batches receive
/// `len / n_batches + 1` items and the remaining ones `len / n_batches`.
/// Order is preserved: concatenating the batches gives back `items`.
#[must_use]
pub fn batch_split<T>(n_batches: usize, items: Vec<T>) -> Vec<Vec<T>> {
    let count = items.len();
    let n_batches = n_batches.max(1);
    if n_batches >= count {
        return items.into_iter().map(|item| vec![item]).collect();
    }

    let smaller = count / n_batches;
    let bigger_count = count % n_batches;
    let mut batches = Vec::with_capacity(n_batches);
    let mut rest = items.into_iter();
    for index in 0..n_batches {
        let size = if index < bigger_count {
            smaller + 1
        } else {
            smaller
        };
        batches.push(rest.by_ref().take(size).collect());
    }
    batches
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn keep(width: u32, height: u32, tile: u32, overlap: u32) -> TileTopology {
        TileTopology::new(width, height, tile, tile, overlap, BorderTiles::Keep).unwrap()
    }

    #[test]
    fn tile_count_1d_formula() {
        assert_eq!(TileTopology::tile_count_1d(700, 300, 100), 3);
        assert_eq!(TileTopology::tile_count_1d(299, 300, 100), 1);
        assert_eq!(TileTopology::tile_count_1d(300, 300, 100), 1);
        assert_eq!(TileTopology::tile_count_1d(301, 300, 100), 2);
        assert_eq!(TileTopology::tile_count_1d(2000, 512, 7), 4);
    }

    #[test]
    fn square_grid_with_overlap() {
        let topology = keep(700, 700, 300, 100);
        assert_eq!(topology.horizontal_count(), 3);
        assert_eq!(topology.vertical_count(), 3);
        assert_eq!(topology.tile_count(), 9);

        let offsets = [0, 200, 400];
        for id in topology.identifiers() {
            let (row, col) = topology.tile_coord(id).unwrap();
            assert_eq!(
                topology.tile_offset(id).unwrap(),
                (offsets[col], offsets[row])
            );
            assert_eq!(topology.tile_size(id).unwrap(), (300, 300));
        }
    }

    #[test]
    fn rectangular_grid_clamps_border_tiles() {
        let topology = keep(600, 450, 300, 100);
        assert_eq!(topology.horizontal_count(), 3);
        assert_eq!(topology.vertical_count(), 2);
        assert_eq!(topology.tile_offset(3).unwrap(), (400, 0));
        assert_eq!(topology.tile_size(3).unwrap(), (200, 300));
        assert_eq!(topology.tile_offset(4).unwrap(), (0, 200));
        assert_eq!(topology.tile_size(4).unwrap(), (300, 250));
        assert_eq!(topology.tile_size(6).unwrap(), (200, 250));
    }

    #[test]
    fn identifiers_and_coords_are_bijective() {
        let topology = keep(1000, 700, 256, 12);
        for row in 0..topology.vertical_count() {
            for col in 0..topology.horizontal_count() {
                let id = topology.identifier(row, col).unwrap();
                assert_eq!(topology.tile_coord(id).unwrap(), (row, col));
            }
        }
        for id in topology.identifiers() {
            let (row, col) = topology.tile_coord(id).unwrap();
            assert_eq!(topology.identifier(row, col).unwrap(), id);
        }
    }

    #[test]
    fn neighbours_of_corner_edge_and_center() {
        let topology = keep(700, 700, 300, 100);
        assert_eq!(
            topology.tile_neighbours(1).unwrap(),
            Neighbours {
                top: None,
                bottom: Some(4),
                left: None,
                right: Some(2),
            }
        );
        assert_eq!(
            topology.tile_neighbours(5).unwrap(),
            Neighbours {
                top: Some(2),
                bottom: Some(8),
                left: Some(4),
                right: Some(6),
            }
        );
        // Right edge: no wrap-around to the next row.
        assert_eq!(topology.tile_neighbours(3).unwrap().right, None);
        assert_eq!(topology.tile_neighbours(4).unwrap().left, None);
        assert_eq!(
            topology.tile_neighbours(9).unwrap(),
            Neighbours {
                top: Some(6),
                bottom: None,
                left: Some(8),
                right: None,
            }
        );
    }

    #[test]
    fn neighbours_are_symmetric() {
        for border_tiles in [BorderTiles::Keep, BorderTiles::Skip, BorderTiles::Extend] {
            let topology = TileTopology::new(1111, 777, 200, 150, 20, border_tiles).unwrap();
            for id in topology.identifiers() {
                let n = topology.tile_neighbours(id).unwrap();
                if let Some(right) = n.right {
                    assert_eq!(topology.tile_neighbours(right).unwrap().left, Some(id));
                }
                if let Some(bottom) = n.bottom {
                    assert_eq!(topology.tile_neighbours(bottom).unwrap().top, Some(id));
                }
            }
        }
    }

    #[test]
    fn neighbour_iteration_pairs_sides() {
        let topology = keep(700, 700, 300, 100);
        let sides: Vec<(Side, TileId)> = topology.tile_neighbours(2).unwrap().iter().collect();
        assert_eq!(
            sides,
            vec![(Side::Bottom, 5), (Side::Left, 1), (Side::Right, 3)]
        );
    }

    #[test]
    fn out_of_range_identifiers() {
        let topology = keep(700, 700, 300, 100);
        assert!(matches!(
            topology.tile_offset(0),
            Err(WorkflowError::OutOfRange { identifier: 0, count: 9 })
        ));
        assert!(matches!(
            topology.tile_neighbours(10),
            Err(WorkflowError::OutOfRange { identifier: 10, count: 9 })
        ));
        assert!(topology.identifier(3, 0).is_err());
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        assert!(matches!(
            TileTopology::new(100, 100, 0, 10, 0, BorderTiles::Keep),
            Err(WorkflowError::Configuration(_))
        ));
        assert!(matches!(
            TileTopology::new(100, 100, 10, 20, 10, BorderTiles::Keep),
            Err(WorkflowError::Configuration(_))
        ));
        assert!(matches!(
            TileTopology::new(0, 100, 10, 10, 0, BorderTiles::Keep),
            Err(WorkflowError::Configuration(_))
        ));
    }

    #[test]
    fn skip_borders_drops_short_column_and_row() {
        let topology = TileTopology::new(525, 450, 175, 175, 0, BorderTiles::Skip).unwrap();
        assert_eq!(topology.horizontal_count(), 3);
        assert_eq!(topology.vertical_count(), 2);
        for id in topology.identifiers() {
            assert_eq!(topology.tile_size(id).unwrap(), (175, 175));
        }
        assert_eq!(topology.tile_offset(4).unwrap(), (0, 175));
        assert_eq!(
            topology.tile_neighbours(3).unwrap(),
            Neighbours {
                top: None,
                bottom: Some(6),
                left: Some(2),
                right: None,
            }
        );

        let topology = TileTopology::new(450, 525, 175, 175, 0, BorderTiles::Skip).unwrap();
        assert_eq!(topology.horizontal_count(), 2);
        assert_eq!(topology.vertical_count(), 3);
        assert_eq!(
            topology.tile_neighbours(3).unwrap(),
            Neighbours {
                top: Some(1),
                bottom: Some(5),
                left: None,
                right: Some(4),
            }
        );
    }

    #[test]
    fn skip_borders_on_tiny_image_has_no_tiles() {
        let topology = TileTopology::new(50, 50, 100, 100, 0, BorderTiles::Skip).unwrap();
        assert_eq!(topology.tile_count(), 0);
        assert!(topology.partition_identifiers(4).is_empty());
    }

    #[test]
    fn extend_keeps_full_size_tiles() {
        let topology = TileTopology::new(50, 100, 45, 45, 0, BorderTiles::Extend).unwrap();
        assert_eq!(topology.horizontal_count(), 2);
        assert_eq!(topology.vertical_count(), 3);
        assert_eq!(topology.tile_offset(2).unwrap(), (5, 0));
        assert_eq!(topology.tile_offset(3).unwrap(), (0, 45));
        assert_eq!(topology.tile_offset(5).unwrap(), (0, 55));
        assert_eq!(topology.tile_offset(6).unwrap(), (5, 55));
        for id in topology.identifiers() {
            assert_eq!(topology.tile_size(id).unwrap(), (45, 45));
        }
    }

    #[test]
    fn extend_clamps_offset_on_small_images() {
        let topology = TileTopology::new(30, 30, 45, 45, 0, BorderTiles::Extend).unwrap();
        assert_eq!(topology.tile_count(), 1);
        assert_eq!(topology.tile_offset(1).unwrap(), (0, 0));
        assert_eq!(topology.tile_size(1).unwrap(), (30, 30));
    }

    #[test]
    fn partition_identifiers_matches_batch_sizes() {
        let topology = keep(700, 700, 300, 100);
        let batches = topology.partition_identifiers(5);
        assert_eq!(
            batches,
            vec![vec![1, 2], vec![3, 4], vec![5, 6], vec![7, 8], vec![9]]
        );
        assert_eq!(topology.partition_identifiers(9).len(), 9);
        assert_eq!(topology.partition_identifiers(10).len(), 9);
        assert_eq!(topology.partition_identifiers(1), vec![(1..=9).collect::<Vec<_>>()]);
    }

    #[test]
    fn batch_split_front_loads_extra_items() {
        let batches = batch_split(3, (0..10).collect());
        assert_eq!(
            batches,
            vec![vec![0, 1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]
        );
        assert!(batch_split::<u8>(4, Vec::new()).is_empty());
        assert_eq!(batch_split(0, vec!['a', 'b']), vec![vec!['a', 'b']]);
    }
}
