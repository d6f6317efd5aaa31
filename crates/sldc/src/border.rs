//! Border index: which polygons of a tile touch which of its edges.
//!
//! Objects crossing a tile boundary are cut into fragments, one per tile,
//! and every fragment touches the shared edge. Indexing polygons by the
//! edge band they intersect lets the merger compare only fragments that
//! face each other across a boundary instead of every pair of polygons.

use geo::{Coord, Intersects, Polygon, Rect};

/// An edge of a tile, or [`None`](Self::None) for polygons touching no edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    /// Top edge.
    Top,
    /// Bottom edge.
    Bottom,
    /// Left edge.
    Left,
    /// Right edge.
    Right,
    /// Polygons that touch none of the edge bands.
    None,
}

impl Side {
    /// The four actual edges, in probe order.
    pub const EDGES: [Self; 4] = [Self::Top, Self::Bottom, Self::Left, Self::Right];

    /// The facing edge of the neighbouring tile.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Top => Self::Bottom,
            Self::Bottom => Self::Top,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
            Self::None => Self::None,
        }
    }

    const fn slot(self) -> usize {
        match self {
            Self::Top => 0,
            Self::Bottom => 1,
            Self::Left => 2,
            Self::Right => 3,
            Self::None => 4,
        }
    }
}

/// Polygons of one tile grouped by the edge bands they intersect.
///
/// A polygon lands on every side whose band it intersects (corner
/// fragments belong to two sides) or on [`Side::None`] if it touches no
/// band at all.
#[derive(Debug, Clone, Default)]
pub struct TileBorderIndex {
    by_side: [Vec<usize>; 5],
    all: Vec<usize>,
    filtering: bool,
}

impl TileBorderIndex {
    /// Index the polygons of the tile at `offset` with size `size`.
    ///
    /// `polygons` yields `(global id, polygon)` pairs in image
    /// coordinates. `band` is the probe width measured inwards from each
    /// edge; `None` disables filtering and every side then reports all
    /// polygons of the tile.
    pub fn new<'a>(
        offset: (u32, u32),
        size: (u32, u32),
        polygons: impl IntoIterator<Item = (usize, &'a Polygon<f64>)>,
        band: Option<f64>,
    ) -> Self {
        let mut index = Self {
            filtering: band.is_some(),
            ..Self::default()
        };
        let probes = band.map(|width| probes(offset, size, width));

        for (id, polygon) in polygons {
            index.all.push(id);
            let Some(probes) = &probes else {
                continue;
            };
            let mut touches_edge = false;
            for (side, probe) in Side::EDGES.iter().zip(probes) {
                if probe.intersects(polygon) {
                    index.by_side[side.slot()].push(id);
                    touches_edge = true;
                }
            }
            if !touches_edge {
                index.by_side[Side::None.slot()].push(id);
            }
        }
        index
    }

    /// Global ids of the polygons on `side`, in insertion order.
    #[must_use]
    pub fn polygons_by_side(&self, side: Side) -> &[usize] {
        if self.filtering {
            &self.by_side[side.slot()]
        } else {
            &self.all
        }
    }

    /// Global ids of every polygon of the tile.
    #[must_use]
    pub fn polygons(&self) -> &[usize] {
        &self.all
    }
}

/// Probe rectangles for the top, bottom, left and right bands.
fn probes(offset: (u32, u32), size: (u32, u32), band: f64) -> [Rect<f64>; 4] {
    let x0 = f64::from(offset.0);
    let y0 = f64::from(offset.1);
    let x1 = x0 + f64::from(size.0);
    let y1 = y0 + f64::from(size.1);
    let rect = |min_x: f64, min_y: f64, max_x: f64, max_y: f64| {
        Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
    };
    [
        rect(x0, y0, x1, y0 + band),
        rect(x0, y1 - band, x1, y1),
        rect(x0, y0, x0 + band, y1),
        rect(x1 - band, y0, x1, y1),
    ]
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    fn square(x: f64, y: f64, side: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + side, y: y),
            (x: x + side, y: y + side),
            (x: x, y: y + side),
        ]
    }

    #[test]
    fn opposite_sides() {
        assert_eq!(Side::Top.opposite(), Side::Bottom);
        assert_eq!(Side::Bottom.opposite(), Side::Top);
        assert_eq!(Side::Left.opposite(), Side::Right);
        assert_eq!(Side::Right.opposite(), Side::Left);
        assert_eq!(Side::None.opposite(), Side::None);
    }

    #[test]
    fn polygons_are_assigned_to_touched_bands() {
        // Tile at (100, 50), 100x100, band of 3 pixels.
        let center = square(140.0, 90.0, 10.0);
        let top = square(140.0, 50.0, 5.0);
        let right = square(196.0, 100.0, 5.0);
        let corner = square(100.0, 145.0, 5.0);
        let polygons = [center, top, right, corner];

        let index = TileBorderIndex::new(
            (100, 50),
            (100, 100),
            polygons.iter().enumerate().map(|(i, p)| (i + 10, p)),
            Some(3.0),
        );

        assert_eq!(index.polygons_by_side(Side::None), &[10]);
        assert_eq!(index.polygons_by_side(Side::Top), &[11]);
        assert_eq!(index.polygons_by_side(Side::Right), &[12]);
        assert_eq!(index.polygons_by_side(Side::Left), &[13]);
        assert_eq!(index.polygons_by_side(Side::Bottom), &[13]);
        assert_eq!(index.polygons(), &[10, 11, 12, 13]);
    }

    #[test]
    fn band_width_controls_detection() {
        // 4 pixels away from the left edge.
        let near = square(4.0, 40.0, 10.0);
        let narrow = TileBorderIndex::new((0, 0), (100, 100), [(0, &near)], Some(3.0));
        assert!(narrow.polygons_by_side(Side::Left).is_empty());
        let wide = TileBorderIndex::new((0, 0), (100, 100), [(0, &near)], Some(5.0));
        assert_eq!(wide.polygons_by_side(Side::Left), &[0]);
    }

    #[test]
    fn no_band_reports_every_polygon_on_every_side() {
        let a = square(40.0, 40.0, 10.0);
        let b = square(0.0, 0.0, 10.0);
        let index = TileBorderIndex::new((0, 0), (100, 100), [(3, &a), (7, &b)], None);
        for side in Side::EDGES {
            assert_eq!(index.polygons_by_side(side), &[3, 7]);
        }
        assert_eq!(index.polygons_by_side(Side::None), &[3, 7]);
    }
}
