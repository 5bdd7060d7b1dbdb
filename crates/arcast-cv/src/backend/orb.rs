//! ORB through OpenCV's features2d module.

use super::gray_to_mat;
use crate::features::{Descriptor, FeatureConfig, FeatureSet, Keypoint};
use crate::traits::FeatureExtractor;
use image::GrayImage;
use opencv::core::{KeyPoint, Mat, Vector, no_array};
use opencv::features2d::{ORB, ORB_ScoreType};
use opencv::prelude::*;
use tracing::warn;

/// OpenCV ORB with the same budget semantics as the built-in extractor.
///
/// A detector is created per call; OpenCV feature objects are not `Sync`.
#[derive(Debug, Clone)]
pub struct OpenCvOrbExtractor {
    levels: i32,
    scale_factor: f32,
    fast_threshold: i32,
}

impl OpenCvOrbExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            levels: config.pyramid_levels.max(1) as i32,
            scale_factor: config.scale_factor,
            fast_threshold: config.fast_threshold as i32,
        }
    }

    fn run(&self, image: &GrayImage, max_features: usize) -> crate::Result<FeatureSet> {
        let mat = gray_to_mat(image)?;
        let mut orb = ORB::create(
            max_features as i32,
            self.scale_factor,
            self.levels,
            31,
            0,
            2,
            ORB_ScoreType::HARRIS_SCORE,
            31,
            self.fast_threshold,
        )?;

        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();
        orb.detect_and_compute(&mat, &no_array(), &mut keypoints, &mut descriptors, false)?;

        let mut set = FeatureSet::empty([image.width(), image.height()]);
        for (i, kp) in keypoints.iter().enumerate() {
            let row = descriptors.at_row::<u8>(i as i32)?;
            let mut descriptor: Descriptor = [0; 32];
            descriptor.copy_from_slice(&row[..32]);

            let pt = kp.pt();
            set.keypoints.push(Keypoint {
                x: pt.x,
                y: pt.y,
                angle: kp.angle().to_radians(),
                score: kp.response(),
                octave: kp.octave().clamp(0, u8::MAX as i32) as u8,
            });
            set.descriptors.push(descriptor);
        }
        Ok(set)
    }
}

impl FeatureExtractor for OpenCvOrbExtractor {
    fn extract(&self, image: &GrayImage, max_features: usize) -> FeatureSet {
        match self.run(image, max_features) {
            Ok(set) => set,
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(%reason, "OpenCV ORB extraction failed");
                FeatureSet::empty([image.width(), image.height()])
            }
        }
    }

    fn name(&self) -> &'static str {
        "opencv-orb"
    }
}
