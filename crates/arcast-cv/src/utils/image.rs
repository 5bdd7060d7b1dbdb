//! Image loading and encoding helpers

use crate::Result;
use anyhow::Context;
use image::{GrayImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

/// Image utility functions
pub struct ImageUtils;

impl ImageUtils {
    /// Load image as grayscale
    pub fn load_grayscale<P: AsRef<Path>>(path: P) -> Result<GrayImage> {
        let img = image::open(&path)
            .with_context(|| format!("Failed to open image: {:?}", path.as_ref()))?;
        Ok(img.to_luma8())
    }

    /// Decode encoded bytes as grayscale
    pub fn decode_grayscale(bytes: &[u8]) -> Result<GrayImage> {
        let img = image::load_from_memory(bytes).context("Failed to decode image bytes")?;
        Ok(img.to_luma8())
    }

    /// Encode a grayscale image as PNG
    pub fn encode_png(image: &GrayImage) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .context("Failed to encode PNG")?;
        Ok(buf)
    }

    /// Save a grayscale image, format chosen by extension
    pub fn save<P: AsRef<Path>>(image: &GrayImage, path: P) -> Result<()> {
        image
            .save(&path)
            .with_context(|| format!("Failed to save image: {:?}", path.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_round_trip() -> Result<()> {
        let mut img = GrayImage::new(16, 16);
        img.put_pixel(3, 4, image::Luma([200]));

        let decoded = ImageUtils::decode_grayscale(&ImageUtils::encode_png(&img)?)?;

        assert_eq!(decoded.dimensions(), img.dimensions());
        assert_eq!(decoded.get_pixel(3, 4)[0], 200);
        Ok(())
    }
}
