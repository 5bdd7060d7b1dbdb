//! Keypoint and binary descriptor extraction
//!
//! An ORB-style pipeline: FAST-9 corners on a scale pyramid, intensity
//! centroid orientation and 256-bit rotated BRIEF descriptors. Descriptors are
//! compared with Hamming distance.

pub mod brief;
pub mod fast;
pub mod orb;

pub use orb::OrbExtractor;

use arcast_core::MarkerRole;
use serde::{Deserialize, Serialize};

/// 256-bit binary descriptor = 32 bytes
pub type Descriptor = [u8; 32];

/// A detected keypoint in level-0 pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Orientation, radians
    pub angle: f32,
    pub score: f32,
    /// Pyramid level the keypoint was found on
    pub octave: u8,
}

/// Keypoints and their descriptors, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
    /// Size of the image the features were extracted from
    pub image_size: [u32; 2],
}

impl FeatureSet {
    pub fn empty(image_size: [u32; 2]) -> Self {
        Self {
            keypoints: Vec::new(),
            descriptors: Vec::new(),
            image_size,
        }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Number of differing bits between two descriptors.
pub fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Keypoint budget for detection markers
    #[serde(default = "default_detection_target")]
    pub detection_target: usize,
    /// Keypoint budget for positioning markers (denser for pose)
    #[serde(default = "default_positioning_target")]
    pub positioning_target: usize,
    /// Keypoint budget for live frames
    #[serde(default = "default_frame_target")]
    pub frame_target: usize,
    #[serde(default = "default_fast_threshold")]
    pub fast_threshold: u8,
    #[serde(default = "default_pyramid_levels")]
    pub pyramid_levels: usize,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
    /// Feature count at which marker confidence reaches 0.5
    #[serde(default = "default_half_saturation")]
    pub confidence_half_saturation: f64,
}

fn default_detection_target() -> usize {
    500
}

fn default_positioning_target() -> usize {
    2000
}

fn default_frame_target() -> usize {
    1000
}

fn default_fast_threshold() -> u8 {
    20
}

fn default_pyramid_levels() -> usize {
    4
}

fn default_scale_factor() -> f32 {
    1.2
}

fn default_half_saturation() -> f64 {
    100.0
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            detection_target: default_detection_target(),
            positioning_target: default_positioning_target(),
            frame_target: default_frame_target(),
            fast_threshold: default_fast_threshold(),
            pyramid_levels: default_pyramid_levels(),
            scale_factor: default_scale_factor(),
            confidence_half_saturation: default_half_saturation(),
        }
    }
}

impl FeatureConfig {
    pub fn target_for(&self, role: MarkerRole) -> usize {
        match role {
            MarkerRole::Detection => self.detection_target,
            MarkerRole::Positioning => self.positioning_target,
        }
    }

    /// Low-contrast scenes (dusk, indoor): lower FAST threshold, more levels.
    pub fn low_contrast() -> Self {
        Self {
            fast_threshold: 10,
            pyramid_levels: 6,
            ..Default::default()
        }
    }
}
