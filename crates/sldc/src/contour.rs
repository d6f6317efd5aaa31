//! Contour tracing: extract polygons from a binary mask.
//!
//! This module defines the [`ContourTracer`] trait for pluggable contour
//! tracing algorithms and the [`ContourTracerKind`] enum for selecting
//! which algorithm to use at runtime.
//!
//! Polygons are expressed in pixel-centre coordinates: the border of a
//! region runs through the centres of its outermost pixels, so a filled
//! `n` x `n` square becomes a polygon of area `(n - 1)²`.

use geo::{Area, Coord, LineString, Polygon};
use image::{GrayImage, Luma};
use imageproc::contours::{BorderType, Contour};
use serde::{Deserialize, Serialize};

/// Selects which contour tracing algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContourTracerKind {
    /// Suzuki-Abe border following via `imageproc::contours::find_contours`.
    ///
    /// Outer borders become exterior rings, hole borders become interior
    /// rings of the region that encloses them.
    #[default]
    BorderFollowing,
}

/// Trait for contour tracing strategies.
///
/// Input: a binary mask (non-zero pixels = foreground).
/// Output: one polygon per foreground region, in mask coordinates.
pub trait ContourTracer {
    /// Trace the foreground regions of `mask`.
    fn trace(&self, mask: &GrayImage) -> Vec<Polygon<f64>>;
}

impl ContourTracer for ContourTracerKind {
    fn trace(&self, mask: &GrayImage) -> Vec<Polygon<f64>> {
        match *self {
            Self::BorderFollowing => trace_border_following(mask),
        }
    }
}

/// Suzuki-Abe border following.
///
/// The mask is padded with one background pixel on every side first:
/// `find_contours` only starts an outer border after a background pixel,
/// so regions touching the left edge would otherwise be missed.
fn trace_border_following(mask: &GrayImage) -> Vec<Polygon<f64>> {
    let (width, height) = mask.dimensions();
    let padded = GrayImage::from_fn(width + 2, height + 2, |x, y| {
        if x == 0 || y == 0 || x > width || y > height {
            Luma([0])
        } else {
            *mask.get_pixel(x - 1, y - 1)
        }
    });
    let contours: Vec<Contour<i32>> = imageproc::contours::find_contours(&padded);

    // Contour index -> index of the polygon built from it.
    let mut owner: Vec<Option<usize>> = vec![None; contours.len()];
    let mut rings: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();

    for (index, contour) in contours.iter().enumerate() {
        if contour.border_type == BorderType::Outer
            && let Some(ring) = contour_ring(contour)
        {
            owner[index] = Some(rings.len());
            rings.push((ring, Vec::new()));
        }
    }

    for contour in &contours {
        if contour.border_type != BorderType::Hole {
            continue;
        }
        let Some(polygon_index) = contour.parent.and_then(|parent| owner[parent]) else {
            continue;
        };
        if let Some(ring) = contour_ring(contour) {
            rings[polygon_index].1.push(ring);
        }
    }

    rings
        .into_iter()
        .map(|(exterior, interiors)| Polygon::new(exterior, interiors))
        .collect()
}

/// Convert a padded contour into a ring, or `None` if it encloses no area.
fn contour_ring(contour: &Contour<i32>) -> Option<LineString<f64>> {
    if contour.points.len() < 3 {
        return None;
    }
    let ring: LineString<f64> = contour
        .points
        .iter()
        .map(|p| Coord {
            x: f64::from(p.x - 1),
            y: f64::from(p.y - 1),
        })
        .collect();
    let area = Polygon::new(ring.clone(), Vec::new()).unsigned_area();
    (area > 0.0).then_some(ring)
}
