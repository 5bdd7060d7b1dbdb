//! Immutable camera frame shared by every strategy in a cycle.

use crate::Result;
use anyhow::Context;
use image::{DynamicImage, GrayImage, RgbImage};
use std::sync::Arc;

/// A captured frame with its grayscale view computed once.
///
/// Both buffers sit behind `Arc`, so clones are cheap and the pixels are
/// never mutated while characters are evaluated in parallel.
#[derive(Debug, Clone)]
pub struct Frame {
    rgb: Arc<RgbImage>,
    gray: Arc<GrayImage>,
}

impl Frame {
    pub fn from_rgb(rgb: RgbImage) -> Self {
        let gray = image::imageops::grayscale(&rgb);
        Self {
            rgb: Arc::new(rgb),
            gray: Arc::new(gray),
        }
    }

    pub fn from_gray(gray: GrayImage) -> Self {
        let rgb = DynamicImage::ImageLuma8(gray.clone()).to_rgb8();
        Self {
            rgb: Arc::new(rgb),
            gray: Arc::new(gray),
        }
    }

    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self {
            rgb: Arc::new(image.to_rgb8()),
            gray: Arc::new(image.to_luma8()),
        }
    }

    /// Decode an encoded image (PNG, JPEG, ...).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("Failed to decode frame")?;
        Ok(Self::from_dynamic(&image))
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }

    pub fn dimensions(&self) -> [u32; 2] {
        [self.width(), self.height()]
    }
}
