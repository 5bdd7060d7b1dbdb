//! OpenCV-backed implementations of the extraction and detection seams.
//!
//! Enabled with the `opencv` feature. The pure-Rust pipeline stays the
//! default; these are drop-in alternatives behind the same traits.

pub mod orb;
pub mod yolo;

pub use orb::OpenCvOrbExtractor;
pub use yolo::{OpenCvYoloModel, YoloConfig};

use crate::Result;
use anyhow::Context;
use image::{GrayImage, RgbImage};
use opencv::core::{Mat, Vec3b};
use opencv::prelude::*;

/// Copy a grayscale image into a single-channel Mat.
pub fn gray_to_mat(image: &GrayImage) -> Result<Mat> {
    let mat = Mat::new_rows_cols_with_data(image.height() as i32, image.width() as i32, image.as_raw())
        .context("Failed to wrap grayscale buffer")?;
    mat.try_clone().context("Failed to copy grayscale Mat")
}

/// Copy an RGB image into a three-channel Mat, channel order unchanged.
pub fn rgb_to_mat(image: &RgbImage) -> Result<Mat> {
    let pixels: Vec<Vec3b> = image.pixels().map(|p| Vec3b::from(p.0)).collect();
    let mat = Mat::new_rows_cols_with_data(image.height() as i32, image.width() as i32, &pixels)
        .context("Failed to wrap RGB buffer")?;
    mat.try_clone().context("Failed to copy RGB Mat")
}
