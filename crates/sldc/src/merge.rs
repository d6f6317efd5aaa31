//! Cross-tile polygon merging.
//!
//! Objects crossing a tile boundary are extracted as one partial polygon
//! per tile. The merger reunites those fragments:
//!
//! 1. Assign every polygon a global id and index each tile's polygons by
//!    the edge bands they touch ([`TileBorderIndex`]).
//! 2. For every pair of adjacent tiles, compare the candidates on facing
//!    sides and union (`UnionFind`) those with the same label lying closer
//!    than the tolerance.
//! 3. Emit every connected component: singletons unchanged, larger
//!    components as the closing (dilate, union, erode) of their members.

use std::collections::{BTreeMap, HashMap};

use geo::algorithm::buffer::{BufferStyle, LineJoin};
use geo::line_measures::Distance;
use geo::{Area, Buffer, Euclidean, MultiPolygon, Polygon};
use petgraph::unionfind::UnionFind;

use crate::border::TileBorderIndex;
use crate::topology::TileTopology;
use crate::types::{DEFAULT_LABEL, Label, TileId, WorkflowError};

/// Minimum corner angle (radians) below which joins are bevelled instead
/// of mitred. Right angles always stay sharp.
const MITRE_ANGLE: f64 = 0.4;

/// Parts of an eroded union smaller than this fraction of its largest
/// part are buffering slivers, not objects.
const SLIVER_RATIO: f64 = 1e-3;

/// Polygons extracted from one tile, in image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePolygons {
    identifier: TileId,
    polygons: Vec<Polygon<f64>>,
    labels: Vec<Label>,
}

impl TilePolygons {
    /// Labelled polygons of tile `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::FieldLength`] if `labels` and `polygons`
    /// differ in length.
    pub fn new(
        identifier: TileId,
        polygons: Vec<Polygon<f64>>,
        labels: Vec<Label>,
    ) -> Result<Self, WorkflowError> {
        if polygons.len() != labels.len() {
            return Err(WorkflowError::FieldLength {
                field: "labels".to_owned(),
                expected: polygons.len(),
                actual: labels.len(),
            });
        }
        Ok(Self {
            identifier,
            polygons,
            labels,
        })
    }

    /// Polygons of tile `identifier`, all labelled [`DEFAULT_LABEL`].
    #[must_use]
    pub fn unlabelled(identifier: TileId, polygons: Vec<Polygon<f64>>) -> Self {
        let labels = vec![DEFAULT_LABEL; polygons.len()];
        Self {
            identifier,
            polygons,
            labels,
        }
    }

    /// Tile the polygons were extracted from.
    #[must_use]
    pub const fn identifier(&self) -> TileId {
        self.identifier
    }

    /// The polygons, in image coordinates.
    #[must_use]
    pub fn polygons(&self) -> &[Polygon<f64>] {
        &self.polygons
    }

    /// One label per polygon.
    #[must_use]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Split `(polygon, label)` pairs produced by a locator.
    #[must_use]
    pub fn from_located(identifier: TileId, located: Vec<(Polygon<f64>, Label)>) -> Self {
        let (polygons, labels) = located.into_iter().unzip();
        Self {
            identifier,
            polygons,
            labels,
        }
    }
}

/// Tolerance-based merger of polygons split across tile borders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolygonMerger {
    tolerance: f64,
}

impl PolygonMerger {
    /// Merger joining same-label fragments closer than `tolerance`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if `tolerance` is negative
    /// or not finite.
    pub fn new(tolerance: f64) -> Result<Self, WorkflowError> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(WorkflowError::Configuration(format!(
                "merge tolerance must be a finite non-negative distance, got {tolerance}"
            )));
        }
        Ok(Self { tolerance })
    }

    /// The merge tolerance.
    #[must_use]
    pub const fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Merge the polygons of `tiles` laid out according to `topology`.
    ///
    /// Returns the merged polygons and their labels, in the order of the
    /// first (lowest global id) member of each merged object. Global ids
    /// follow the order of `tiles` and of the polygons within each tile.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::OutOfRange`] if a tile identifier does not
    /// belong to `topology`.
    pub fn merge(
        &self,
        tiles: &[TilePolygons],
        topology: &TileTopology,
    ) -> Result<(Vec<Polygon<f64>>, Vec<Label>), WorkflowError> {
        let records = flatten(tiles);
        if records.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let indices = self.border_indices(tiles, &records, topology)?;
        let mut components = UnionFind::<usize>::new(records.len());
        self.link_neighbours(&indices, &records, topology, &mut components)?;

        let groups = group_components(components.into_labeling());
        tracing::debug!(
            polygons = records.len(),
            components = groups.len(),
            tolerance = self.tolerance,
            "merged tile polygons"
        );

        let mut polygons = Vec::with_capacity(groups.len());
        let mut labels = Vec::with_capacity(groups.len());
        for group in groups {
            if let [single] = group.as_slice() {
                polygons.push(records[*single].polygon.clone());
                labels.push(records[*single].label);
                continue;
            }
            let label = dominant_label(&group, &records);
            for part in self.close(&group, &records) {
                polygons.push(part);
                labels.push(label);
            }
        }
        Ok((polygons, labels))
    }

    // -----------------------------------------------------------------------
    // Candidate search
    // -----------------------------------------------------------------------

    fn border_indices(
        &self,
        tiles: &[TilePolygons],
        records: &[Record<'_>],
        topology: &TileTopology,
    ) -> Result<BTreeMap<TileId, TileBorderIndex>, WorkflowError> {
        let band = self.tolerance + f64::from(topology.overlap());
        let mut by_tile: BTreeMap<TileId, Vec<usize>> = BTreeMap::new();
        for (id, record) in records.iter().enumerate() {
            by_tile.entry(record.tile).or_default().push(id);
        }

        let mut indices = BTreeMap::new();
        for tile in tiles {
            if indices.contains_key(&tile.identifier) {
                continue;
            }
            let offset = topology.tile_offset(tile.identifier)?;
            let size = topology.tile_size(tile.identifier)?;
            let members = by_tile.get(&tile.identifier).map_or(&[][..], Vec::as_slice);
            let index = TileBorderIndex::new(
                offset,
                size,
                members.iter().map(|&id| (id, records[id].polygon)),
                Some(band),
            );
            indices.insert(tile.identifier, index);
        }
        Ok(indices)
    }

    fn link_neighbours(
        &self,
        indices: &BTreeMap<TileId, TileBorderIndex>,
        records: &[Record<'_>],
        topology: &TileTopology,
        components: &mut UnionFind<usize>,
    ) -> Result<(), WorkflowError> {
        for (&tile, index) in indices {
            for (side, neighbour) in topology.tile_neighbours(tile)?.iter() {
                let Some(neighbour_index) = indices.get(&neighbour) else {
                    continue;
                };
                for &a in index.polygons_by_side(side) {
                    for &b in neighbour_index.polygons_by_side(side.opposite()) {
                        if a == b || components.equiv(a, b) {
                            continue;
                        }
                        if records[a].label == records[b].label
                            && Euclidean.distance(records[a].polygon, records[b].polygon)
                                < self.tolerance
                        {
                            components.union(a, b);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Geometry
    // -----------------------------------------------------------------------

    /// Dilate every member, union the dilations and erode the union back.
    fn close(&self, group: &[usize], records: &[Record<'_>]) -> Vec<Polygon<f64>> {
        let dilated: Vec<MultiPolygon<f64>> = group
            .iter()
            .map(|&id| {
                records[id]
                    .polygon
                    .buffer_with_style(mitre_style(self.tolerance))
            })
            .collect();
        let union = geo::unary_union(&dilated);
        let closed = drop_slivers(union.buffer_with_style(mitre_style(-self.tolerance)));
        if !closed.is_empty() {
            return closed;
        }

        // Erosion swallowed everything (degenerate, very thin members).
        let raw: Vec<MultiPolygon<f64>> = group
            .iter()
            .map(|&id| MultiPolygon::new(vec![records[id].polygon.clone()]))
            .collect();
        geo::unary_union(&raw).0
    }
}

struct Record<'a> {
    tile: TileId,
    polygon: &'a Polygon<f64>,
    label: Label,
}

fn flatten(tiles: &[TilePolygons]) -> Vec<Record<'_>> {
    tiles
        .iter()
        .flat_map(|tile| {
            tile.polygons
                .iter()
                .zip(&tile.labels)
                .map(|(polygon, &label)| Record {
                    tile: tile.identifier,
                    polygon,
                    label,
                })
        })
        .collect()
}

/// Group ids by representative, ordered by their lowest member id.
fn group_components(representatives: Vec<usize>) -> Vec<Vec<usize>> {
    let mut slot_of: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (id, representative) in representatives.into_iter().enumerate() {
        let slot = *slot_of.entry(representative).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(id);
    }
    groups
}

/// Label covering the largest total area; ties go to the lowest label.
fn dominant_label(group: &[usize], records: &[Record<'_>]) -> Label {
    let mut areas: BTreeMap<Label, f64> = BTreeMap::new();
    for &id in group {
        *areas.entry(records[id].label).or_default() += records[id].polygon.unsigned_area();
    }
    let mut best: Option<(Label, f64)> = None;
    for (label, area) in areas {
        if best.is_none_or(|(_, best_area)| area > best_area) {
            best = Some((label, area));
        }
    }
    best.map_or(DEFAULT_LABEL, |(label, _)| label)
}

/// Keep the parts of `closed` that are not negligible next to its largest.
fn drop_slivers(closed: MultiPolygon<f64>) -> Vec<Polygon<f64>> {
    let largest = closed
        .0
        .iter()
        .map(Area::unsigned_area)
        .fold(0.0_f64, f64::max);
    let minimum = largest * SLIVER_RATIO;
    closed
        .0
        .into_iter()
        .filter(|part| {
            let area = part.unsigned_area();
            area > 0.0 && area >= minimum
        })
        .collect()
}

fn mitre_style(distance: f64) -> BufferStyle<f64> {
    BufferStyle::new(distance).line_join(LineJoin::Miter(MITRE_ANGLE))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use geo::{BooleanOps, Centroid, polygon};

    use super::*;
    use crate::topology::BorderTiles;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
        ]
    }

    fn two_tiles() -> TileTopology {
        TileTopology::new(20, 10, 10, 10, 0, BorderTiles::Keep).unwrap()
    }

    #[test]
    fn rejects_negative_tolerance() {
        assert!(matches!(
            PolygonMerger::new(-1.0),
            Err(WorkflowError::Configuration(_))
        ));
        assert!(PolygonMerger::new(f64::NAN).is_err());
        assert!(PolygonMerger::new(0.0).is_ok());
    }

    #[test]
    fn label_length_is_checked() {
        let err = TilePolygons::new(1, vec![rect(0.0, 0.0, 1.0, 1.0)], vec![]).unwrap_err();
        assert!(matches!(err, WorkflowError::FieldLength { expected: 1, actual: 0, .. }));

        let err = TilePolygons::new(
            1,
            vec![rect(0.0, 0.0, 1.0, 1.0), rect(2.0, 0.0, 3.0, 1.0)],
            vec![1],
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::FieldLength { expected: 2, actual: 1, .. }));

        let tile = TilePolygons::new(3, vec![rect(0.0, 0.0, 1.0, 1.0)], vec![4]).unwrap();
        assert_eq!(tile.identifier(), 3);
        assert_eq!(tile.polygons().len(), tile.labels().len());
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let merger = PolygonMerger::new(1.0).unwrap();
        let (polygons, labels) = merger.merge(&[], &two_tiles()).unwrap();
        assert!(polygons.is_empty());
        assert!(labels.is_empty());
    }

    #[test]
    fn touching_fragments_merge() {
        let merger = PolygonMerger::new(1.0).unwrap();
        let tiles = [
            TilePolygons::unlabelled(1, vec![rect(4.0, 2.0, 9.5, 6.0)]),
            TilePolygons::unlabelled(2, vec![rect(10.0, 2.0, 15.0, 6.0)]),
        ];
        let (polygons, labels) = merger.merge(&tiles, &two_tiles()).unwrap();
        assert_eq!(polygons.len(), 1);
        assert_eq!(labels, vec![DEFAULT_LABEL]);
        // The 0.5 gap is closed.
        assert!((polygons[0].unsigned_area() - 44.0).abs() < 1e-3);
        assert!(polygons[0].unsigned_area() >= 22.0);
        let centroid = polygons[0].centroid().unwrap();
        assert!(centroid.x() > 6.75 && centroid.x() < 12.5, "{centroid:?}");
        assert!((centroid.y() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn fragments_across_a_horizontal_border_merge() {
        let topology = TileTopology::new(10, 20, 10, 10, 0, BorderTiles::Keep).unwrap();
        let top = rect(2.0, 4.0, 6.0, 9.5);
        let bottom = rect(2.0, 10.0, 6.0, 15.0);
        let (top_centroid, bottom_centroid) = (top.centroid().unwrap(), bottom.centroid().unwrap());
        let largest = top.unsigned_area().max(bottom.unsigned_area());
        let tiles = [
            TilePolygons::unlabelled(1, vec![top]),
            TilePolygons::unlabelled(2, vec![bottom]),
        ];

        let merger = PolygonMerger::new(1.0).unwrap();
        let (polygons, _) = merger.merge(&tiles, &topology).unwrap();
        assert_eq!(polygons.len(), 1);
        assert!(polygons[0].unsigned_area() >= largest);
        assert!((polygons[0].unsigned_area() - 44.0).abs() < 1e-3);
        let centroid = polygons[0].centroid().unwrap();
        assert!(
            centroid.y() > top_centroid.y() && centroid.y() < bottom_centroid.y(),
            "{centroid:?}"
        );
        assert!((centroid.x() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn closing_drops_buffer_slivers() {
        let sliver = polygon![
            (x: 20.0, y: 20.0),
            (x: 20.001, y: 20.0),
            (x: 20.0, y: 20.001),
        ];
        let flat = polygon![(x: 30.0, y: 0.0), (x: 31.0, y: 0.0), (x: 32.0, y: 0.0)];
        let parts = drop_slivers(MultiPolygon::new(vec![
            rect(0.0, 0.0, 10.0, 10.0),
            sliver,
            flat,
            rect(12.0, 0.0, 14.0, 2.0),
        ]));
        assert_eq!(parts.len(), 2);
        assert!((parts[0].unsigned_area() - 100.0).abs() < 1e-9);
        assert!((parts[1].unsigned_area() - 4.0).abs() < 1e-9);
        assert!(drop_slivers(MultiPolygon::new(vec![])).is_empty());
    }

    #[test]
    fn curved_object_split_in_two_stays_one_polygon() {
        let circle: Polygon<f64> = Polygon::new(
            (0..360)
                .map(|step| {
                    let angle = f64::from(step).to_radians();
                    geo::Coord {
                        x: 10.0 + 6.0 * angle.cos(),
                        y: 5.0 + 4.0 * angle.sin(),
                    }
                })
                .collect(),
            vec![],
        );
        let halves: Vec<TilePolygons> = [(1, 0.0), (2, 10.0)]
            .into_iter()
            .map(|(id, x0)| {
                let parts: MultiPolygon<f64> =
                    circle.intersection(&rect(x0, 0.0, x0 + 10.0, 10.0));
                TilePolygons::unlabelled(id, parts.0)
            })
            .collect();

        let merger = PolygonMerger::new(1.0).unwrap();
        let (polygons, _) = merger.merge(&halves, &two_tiles()).unwrap();
        assert_eq!(polygons.len(), 1);
        let relative =
            (polygons[0].unsigned_area() - circle.unsigned_area()).abs() / circle.unsigned_area();
        assert!(relative < 0.01, "{relative}");
    }

    #[test]
    fn far_fragments_stay_apart() {
        let merger = PolygonMerger::new(1.0).unwrap();
        let tiles = [
            TilePolygons::unlabelled(1, vec![rect(4.0, 2.0, 9.0, 6.0)]),
            TilePolygons::unlabelled(2, vec![rect(10.0, 2.0, 15.0, 6.0)]),
        ];
        let (polygons, _) = merger.merge(&tiles, &two_tiles()).unwrap();
        assert_eq!(polygons.len(), 2);
    }

    #[test]
    fn different_labels_never_merge() {
        let merger = PolygonMerger::new(5.0).unwrap();
        let tiles = [
            TilePolygons::new(1, vec![rect(4.0, 2.0, 10.0, 6.0)], vec![3]).unwrap(),
            TilePolygons::new(2, vec![rect(10.0, 2.0, 15.0, 6.0)], vec![4]).unwrap(),
        ];
        let (polygons, labels) = merger.merge(&tiles, &two_tiles()).unwrap();
        assert_eq!(polygons.len(), 2);
        assert_eq!(labels, vec![3, 4]);
    }

    #[test]
    fn dominant_label_prefers_area_then_lowest_value() {
        let big = rect(0.0, 0.0, 4.0, 4.0);
        let small = rect(0.0, 0.0, 1.0, 1.0);
        let records = [
            Record { tile: 1, polygon: &small, label: 2 },
            Record { tile: 1, polygon: &big, label: 9 },
            Record { tile: 2, polygon: &small, label: 2 },
        ];
        assert_eq!(dominant_label(&[0, 1, 2], &records), 9);

        let records = [
            Record { tile: 1, polygon: &small, label: 7 },
            Record { tile: 2, polygon: &small, label: 5 },
        ];
        assert_eq!(dominant_label(&[0, 1], &records), 5);
    }

    #[test]
    fn components_keep_first_member_order() {
        let groups = group_components(vec![3, 1, 3, 1, 4]);
        assert_eq!(groups, vec![vec![0, 2], vec![1, 3], vec![4]]);
    }
}
