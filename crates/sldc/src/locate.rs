//! Location: turn a segmentation mask into polygons.
//!
//! Locators receive the mask of one tile together with the tile offset
//! and return polygons already translated into the coordinate frame of
//! the processed image, ready for cross-tile merging.

use std::collections::BTreeSet;

use geo::{Polygon, Translate};
use image::{GrayImage, Luma};

use crate::contour::{ContourTracer, ContourTracerKind};
use crate::types::{DEFAULT_LABEL, Label, LabelMask};

/// Extraction of labelled polygons from a segmentation mask.
pub trait Locator: Send + Sync {
    /// Polygons found in `mask`, translated by `offset`, with their label.
    fn locate(&self, mask: &LabelMask, offset: (u32, u32)) -> Vec<(Polygon<f64>, Label)>;
}

/// Locator for binary masks: every non-zero pixel is foreground.
///
/// All polygons receive [`DEFAULT_LABEL`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinaryLocator {
    tracer: ContourTracerKind,
}

impl BinaryLocator {
    /// Binary locator using `tracer`.
    #[must_use]
    pub const fn new(tracer: ContourTracerKind) -> Self {
        Self { tracer }
    }
}

impl Locator for BinaryLocator {
    fn locate(&self, mask: &LabelMask, offset: (u32, u32)) -> Vec<(Polygon<f64>, Label)> {
        let binary = binarize(mask, |value| value != 0);
        self.tracer
            .trace(&binary)
            .into_iter()
            .map(|polygon| (translate(&polygon, offset), DEFAULT_LABEL))
            .collect()
    }
}

/// Locator for class masks: one polygon set per class value.
///
/// Pixels with the background value are never extracted. Polygons are
/// returned grouped by increasing class value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SemanticLocator {
    background: Option<Label>,
    tracer: ContourTracerKind,
}

impl SemanticLocator {
    /// Semantic locator ignoring `background` (if any).
    #[must_use]
    pub const fn new(background: Option<Label>, tracer: ContourTracerKind) -> Self {
        Self { background, tracer }
    }

    /// The ignored class value.
    #[must_use]
    pub const fn background(&self) -> Option<Label> {
        self.background
    }
}

impl Locator for SemanticLocator {
    fn locate(&self, mask: &LabelMask, offset: (u32, u32)) -> Vec<(Polygon<f64>, Label)> {
        let classes: BTreeSet<Label> = mask
            .pixels()
            .map(|p| p.0[0])
            .filter(|&class| Some(class) != self.background)
            .collect();

        let mut located = Vec::new();
        for class in classes {
            let binary = binarize(mask, |value| value == class);
            located.extend(
                self.tracer
                    .trace(&binary)
                    .into_iter()
                    .map(|polygon| (translate(&polygon, offset), class)),
            );
        }
        located
    }
}

fn binarize(mask: &LabelMask, foreground: impl Fn(Label) -> bool) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([if foreground(mask.get_pixel(x, y).0[0]) {
            255
        } else {
            0
        }])
    })
}

fn translate(polygon: &Polygon<f64>, offset: (u32, u32)) -> Polygon<f64> {
    polygon.translate(f64::from(offset.0), f64::from(offset.1))
}
