//! Images, bounded views and tiles.
//!
//! The engine never loads a whole image: it works on [`View`]s, cheap
//! handles describing a rectangle of a root [`Image`] (or of another
//! view), and only fetches pixels when a stage actually needs them.
//!
//! Views nest: a window of a window keeps a reference to its parent, and
//! absolute offsets are resolved by walking the parent chain up to the
//! root. Chains are short (image → window → tile) and never cyclic since
//! a parent is always created before its children.

use std::fmt;
use std::sync::Arc;

use geo::{Coord, Polygon, Translate};
use image::{DynamicImage, GrayImage, Luma, RgbaImage};
use imageproc::point::Point as PixelPoint;

use crate::topology::{BorderTiles, TileTopology};
use crate::types::{TileId, WorkflowError};

/// A raster that can produce rectangular regions of pixels on demand.
///
/// Implementations backed by slow storage (tiled files, remote servers)
/// should return [`WorkflowError::PixelFetch`] when a region cannot be
/// produced. Workflows treat such failures as recoverable: the affected
/// tile contributes no polygons.
pub trait Image: Send + Sync {
    /// Width in pixels.
    fn width(&self) -> u32;

    /// Height in pixels.
    fn height(&self) -> u32;

    /// Number of channels per pixel.
    fn channels(&self) -> u8;

    /// Fetch the `width` x `height` region whose top-left corner is `(x, y)`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::PixelFetch`] if the pixels cannot be produced.
    fn fetch_pixels(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, WorkflowError>;
}

impl Image for DynamicImage {
    fn width(&self) -> u32 {
        Self::width(self)
    }

    fn height(&self) -> u32 {
        Self::height(self)
    }

    fn channels(&self) -> u8 {
        self.color().channel_count()
    }

    fn fetch_pixels(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, WorkflowError> {
        let inside = u64::from(x) + u64::from(width) <= u64::from(Self::width(self))
            && u64::from(y) + u64::from(height) <= u64::from(Self::height(self));
        if !inside {
            return Err(WorkflowError::PixelFetch {
                x,
                y,
                width,
                height,
                reason: format!(
                    "region exceeds the {}x{} image",
                    Self::width(self),
                    Self::height(self)
                ),
            });
        }
        Ok(self.crop_imm(x, y, width, height))
    }
}

#[derive(Clone)]
enum Parent {
    Root(Arc<dyn Image>),
    View(Arc<View>),
}

/// Immutable bounded view of an image.
///
/// A view is a rectangle (offset relative to its parent, size) with an
/// optional clip polygon expressed in the view's own coordinates. Pixels
/// outside the clip polygon are made transparent when fetched.
#[derive(Clone)]
pub struct View {
    parent: Parent,
    offset: (u32, u32),
    width: u32,
    height: u32,
    clip: Option<Polygon<f64>>,
}

impl View {
    /// A view covering the whole of `image`.
    #[must_use]
    pub fn new(image: Arc<dyn Image>) -> Self {
        let width = image.width();
        let height = image.height();
        Self {
            parent: Parent::Root(image),
            offset: (0, 0),
            width,
            height,
            clip: None,
        }
    }

    /// Width of the view.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height of the view.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Offset of the view within its parent.
    #[must_use]
    pub const fn offset(&self) -> (u32, u32) {
        self.offset
    }

    /// Clip polygon, in view coordinates.
    #[must_use]
    pub const fn clip(&self) -> Option<&Polygon<f64>> {
        self.clip.as_ref()
    }

    /// Offset of the view within the root image.
    #[must_use]
    pub fn absolute_offset(&self) -> (u32, u32) {
        let mut x = self.offset.0;
        let mut y = self.offset.1;
        let mut parent = &self.parent;
        while let Parent::View(view) = parent {
            x += view.offset.0;
            y += view.offset.1;
            parent = &view.parent;
        }
        (x, y)
    }

    /// The image at the top of the parent chain.
    #[must_use]
    pub fn root(&self) -> &Arc<dyn Image> {
        let mut parent = &self.parent;
        loop {
            match parent {
                Parent::Root(image) => return image,
                Parent::View(view) => parent = &view.parent,
            }
        }
    }

    /// Number of channels of the fetched pixels.
    ///
    /// Clipping adds an alpha channel to images that have none.
    #[must_use]
    pub fn channels(&self) -> u8 {
        let channels = self.root().channels();
        match (&self.clip, channels) {
            (Some(_), 1 | 3) => channels + 1,
            _ => channels,
        }
    }

    /// A sub-view of `width` x `height` pixels at `(x, y)` in this view.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if the window is empty or
    /// leaves this view.
    pub fn window(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Self, WorkflowError> {
        let inside = u64::from(x) + u64::from(width) <= u64::from(self.width)
            && u64::from(y) + u64::from(height) <= u64::from(self.height);
        if width == 0 || height == 0 || !inside {
            return Err(WorkflowError::Configuration(format!(
                "window {width}x{height} at ({x}, {y}) does not fit in a {}x{} view",
                self.width, self.height
            )));
        }
        Ok(Self {
            parent: Parent::View(Arc::new(self.clone())),
            offset: (x, y),
            width,
            height,
            clip: None,
        })
    }

    /// The same view, clipped to `polygon` (in view coordinates).
    #[must_use]
    pub fn clipped(mut self, polygon: Polygon<f64>) -> Self {
        self.clip = Some(polygon);
        self
    }

    /// Fetch the pixels of this view.
    ///
    /// # Errors
    ///
    /// Propagates the [`WorkflowError::PixelFetch`] raised by the root image.
    pub fn pixels(&self) -> Result<DynamicImage, WorkflowError> {
        let (x, y) = self.absolute_offset();
        let pixels = self.root().fetch_pixels(x, y, self.width, self.height)?;
        Ok(match &self.clip {
            Some(polygon) => apply_clip(&pixels, polygon),
            None => pixels,
        })
    }

    /// Topology of the tiles covering this view.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] for invalid tile parameters.
    pub fn tile_topology(
        &self,
        tile_width: u32,
        tile_height: u32,
        overlap: u32,
        border_tiles: BorderTiles,
    ) -> Result<TileTopology, WorkflowError> {
        TileTopology::new(
            self.width,
            self.height,
            tile_width,
            tile_height,
            overlap,
            border_tiles,
        )
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("absolute_offset", &self.absolute_offset())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("clipped", &self.clip.is_some())
            .finish()
    }
}

impl<I: Image + 'static> From<I> for View {
    fn from(image: I) -> Self {
        Self::new(Arc::new(image))
    }
}

/// A view of one tile of a [`TileTopology`].
#[derive(Debug, Clone)]
pub struct Tile {
    identifier: TileId,
    view: View,
}

impl Tile {
    pub(crate) const fn new(identifier: TileId, view: View) -> Self {
        Self { identifier, view }
    }

    /// Identifier of the tile in its topology.
    #[must_use]
    pub const fn identifier(&self) -> TileId {
        self.identifier
    }

    /// The bounded view of the tile.
    #[must_use]
    pub const fn view(&self) -> &View {
        &self.view
    }

    /// Offset of the tile within the tiled view.
    #[must_use]
    pub const fn offset(&self) -> (u32, u32) {
        self.view.offset()
    }

    /// Fetch the tile pixels.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::TileExtraction`] wrapping the underlying
    /// fetch failure.
    pub fn pixels(&self) -> Result<DynamicImage, WorkflowError> {
        self.view
            .pixels()
            .map_err(|source| WorkflowError::TileExtraction {
                identifier: self.identifier,
                source: Box::new(source),
            })
    }
}

/// Make every pixel outside `polygon` fully transparent.
fn apply_clip(pixels: &DynamicImage, polygon: &Polygon<f64>) -> DynamicImage {
    let mask = rasterize_polygon(pixels.width(), pixels.height(), polygon);
    let mut rgba: RgbaImage = pixels.to_rgba8();
    for (x, y, pixel) in rgba.enumerate_pixels_mut() {
        if mask.get_pixel(x, y).0[0] == 0 {
            pixel.0[3] = 0;
        }
    }
    match pixels.color().channel_count() {
        1 | 2 => DynamicImage::ImageLumaA8(DynamicImage::ImageRgba8(rgba).to_luma_alpha8()),
        _ => DynamicImage::ImageRgba8(rgba),
    }
}

/// Binary mask (255 inside) of the exterior ring of `polygon`.
///
/// Holes are cleared after the exterior is filled.
pub(crate) fn rasterize_polygon(width: u32, height: u32, polygon: &Polygon<f64>) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    fill_ring(&mut mask, polygon.exterior().0.as_slice(), Luma([255]));
    for interior in polygon.interiors() {
        fill_ring(&mut mask, interior.0.as_slice(), Luma([0]));
    }
    mask
}

#[allow(clippy::cast_possible_truncation)]
fn fill_ring(mask: &mut GrayImage, ring: &[Coord<f64>], value: Luma<u8>) {
    let mut points: Vec<PixelPoint<i32>> = ring
        .iter()
        .map(|c| PixelPoint::new(c.x.round() as i32, c.y.round() as i32))
        .collect();
    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() >= 3 {
        imageproc::drawing::draw_polygon_mut(mask, &points, value);
    }
}

/// Translate `polygon` from view coordinates into its parent's frame.
#[must_use]
pub fn to_parent_frame(polygon: &Polygon<f64>, view: &View) -> Polygon<f64> {
    let (x, y) = view.offset();
    polygon.translate(f64::from(x), f64::from(y))
}
