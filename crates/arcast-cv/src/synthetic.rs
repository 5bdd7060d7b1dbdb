//! Deterministic synthetic imagery for demos and tests.
//!
//! Random gray blocks make feature-rich markers; pasting one onto a flat
//! canvas gives a frame with a known marker placement.

use image::imageops;
use image::{GrayImage, Luma, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A `width` x `height` image tiled with `block`-sized squares of random gray.
pub fn random_blocks(width: u32, height: u32, block: u32, seed: u64) -> GrayImage {
    let block = block.max(1);
    let cols = width.div_ceil(block);
    let rows = height.div_ceil(block);

    let mut rng = StdRng::seed_from_u64(seed);
    let shades: Vec<u8> = (0..cols * rows).map(|_| rng.gen_range(0..=255)).collect();

    GrayImage::from_fn(width, height, |x, y| {
        Luma([shades[((y / block) * cols + x / block) as usize]])
    })
}

pub fn flat(width: u32, height: u32, value: u8) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([value]))
}

/// Copy `patch` onto `canvas` with its top-left corner at `(x, y)`.
/// Parts falling outside the canvas are dropped.
pub fn paste(canvas: &mut GrayImage, patch: &GrayImage, x: i64, y: i64) {
    imageops::replace(canvas, patch, x, y);
}

/// Grayscale to a three-channel image, as a camera would deliver it.
pub fn to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        image::Rgb([v, v, v])
    })
}
