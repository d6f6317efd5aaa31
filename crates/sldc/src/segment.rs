//! Segmentation: turn tile pixels into a per-pixel class mask.
//!
//! The segmentation algorithm itself is supplied by the caller through
//! the [`Segmenter`] trait. [`ThresholdSegmenter`] and
//! [`IntensitySegmenter`] are minimal reference implementations for
//! binary and semantic workflows respectively.

use image::{DynamicImage, Luma};

use crate::types::{Label, LabelMask, WorkflowError};

/// Pixel classification of a tile.
pub trait Segmenter: Send + Sync {
    /// Classify every pixel of `image`.
    ///
    /// The returned mask must have the same dimensions as `image`.
    ///
    /// # Errors
    ///
    /// Implementations report failures as
    /// [`WorkflowError::Collaborator`]. They abort the whole workflow run.
    fn segment(&self, image: &DynamicImage) -> Result<LabelMask, WorkflowError>;

    /// Classify several tiles at once.
    ///
    /// Override when the underlying algorithm benefits from batching. The
    /// default implementation segments tiles one after the other.
    ///
    /// # Errors
    ///
    /// Same as [`segment`](Self::segment).
    fn segment_batch(&self, images: &[DynamicImage]) -> Result<Vec<LabelMask>, WorkflowError> {
        images.iter().map(|image| self.segment(image)).collect()
    }

    /// Class values this segmenter can emit.
    ///
    /// Binary segmenters emit `0` for background and `255` for foreground.
    fn classes(&self) -> Vec<Label> {
        vec![0, 255]
    }
}

/// Binary segmenter: pixels at least as bright as the threshold are
/// foreground (`255`).
///
/// Fully transparent pixels (outside a clipped view) are background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdSegmenter {
    threshold: u8,
}

impl ThresholdSegmenter {
    /// Segmenter with the given luminance threshold.
    #[must_use]
    pub const fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    /// The luminance threshold.
    #[must_use]
    pub const fn threshold(&self) -> u8 {
        self.threshold
    }
}

impl Default for ThresholdSegmenter {
    fn default() -> Self {
        Self::new(128)
    }
}

impl Segmenter for ThresholdSegmenter {
    fn segment(&self, image: &DynamicImage) -> Result<LabelMask, WorkflowError> {
        let pixels = image.to_luma_alpha8();
        Ok(LabelMask::from_fn(pixels.width(), pixels.height(), |x, y| {
            let [luma, alpha] = pixels.get_pixel(x, y).0;
            let foreground = alpha > 0 && luma >= self.threshold;
            Luma([if foreground { 255 } else { 0 }])
        }))
    }
}

/// Semantic segmenter using the 8-bit luminance of each pixel as its class.
///
/// Useful for label images where every object class is painted with a
/// distinct grey level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntensitySegmenter;

impl Segmenter for IntensitySegmenter {
    fn segment(&self, image: &DynamicImage) -> Result<LabelMask, WorkflowError> {
        let pixels = image.to_luma8();
        Ok(LabelMask::from_fn(pixels.width(), pixels.height(), |x, y| {
            Luma([Label::from(pixels.get_pixel(x, y).0[0])])
        }))
    }

    fn classes(&self) -> Vec<Label> {
        (0..=255).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, LumaA};

    use super::*;

    #[test]
    fn threshold_splits_foreground() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_fn(4, 1, |x, _| {
            Luma([[0, 99, 100, 255][x as usize]])
        }));
        let mask = ThresholdSegmenter::new(100).segment(&image).unwrap();
        let values: Vec<u32> = mask.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values, vec![0, 0, 255, 255]);
    }

    #[test]
    fn transparent_pixels_are_background() {
        let image = DynamicImage::ImageLumaA8(image::ImageBuffer::from_fn(2, 1, |x, _| {
            LumaA([255, if x == 0 { 0 } else { 255 }])
        }));
        let mask = ThresholdSegmenter::default().segment(&image).unwrap();
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn default_batch_segments_each_image() {
        let images = vec![
            DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 2, Luma([200]))),
            DynamicImage::ImageLuma8(GrayImage::from_pixel(5, 4, Luma([10]))),
        ];
        let masks = ThresholdSegmenter::default()
            .segment_batch(&images)
            .unwrap();
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0].dimensions(), (3, 2));
        assert!(masks[0].pixels().all(|p| p.0[0] == 255));
        assert!(masks[1].pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn intensity_segmenter_keeps_grey_levels() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_fn(3, 1, |x, _| {
            Luma([[0, 85, 190][x as usize]])
        }));
        let mask = IntensitySegmenter.segment(&image).unwrap();
        let values: Vec<u32> = mask.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values, vec![0, 85, 190]);
        assert_eq!(IntensitySegmenter.classes().len(), 256);
        assert_eq!(ThresholdSegmenter::default().classes(), vec![0, 255]);
    }
}
