//! Marker matching
//!
//! Frame descriptors are matched against an indexed marker, a homography is
//! fitted to the correspondences and decomposed into a camera-relative pose.

pub mod matcher;
pub mod pose;

pub use matcher::MarkerMatcher;

use crate::features::FeatureSet;
use arcast_core::MarkerRole;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Descriptors of one marker image, ready to be matched.
#[derive(Debug, Clone)]
pub struct MarkerTarget {
    pub role: MarkerRole,
    pub features: Arc<FeatureSet>,
    /// Count cached on the character at indexing time
    pub feature_count: u32,
    pub confidence: f64,
}

/// Marker matching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Lowe ratio: best distance must be below `ratio` times the second best
    #[serde(default = "default_ratio")]
    pub ratio: f32,
    /// Absolute Hamming cutoff out of 256 bits
    #[serde(default = "default_max_hamming")]
    pub max_hamming: u32,
    /// Keep only mutual nearest neighbors
    #[serde(default)]
    pub cross_check: bool,
    /// Share of the marker's cached features that must be inliers
    #[serde(default = "default_inlier_ratio")]
    pub inlier_ratio: f64,
    #[serde(default = "default_min_inliers")]
    pub min_inliers: usize,
    /// Upper bound on the required inliers for very dense markers
    #[serde(default = "default_max_required_inliers")]
    pub max_required_inliers: usize,
    #[serde(default = "default_ransac_iterations")]
    pub ransac_iterations: usize,
    #[serde(default = "default_ransac_threshold")]
    pub ransac_threshold_px: f64,
    #[serde(default = "default_ransac_seed")]
    pub ransac_seed: u64,
    /// Printed width of every marker, meters
    #[serde(default = "default_marker_width")]
    pub marker_width_m: f64,
    /// Projected marker quads smaller than this are rejected
    #[serde(default = "default_min_area")]
    pub min_area_px: f64,
    #[serde(default = "default_max_depth")]
    pub max_depth_m: f64,
    /// Markers indexed with a lower confidence never match
    #[serde(default = "default_min_feature_confidence")]
    pub min_feature_confidence: f64,
}

fn default_ratio() -> f32 {
    0.75
}

fn default_max_hamming() -> u32 {
    64
}

fn default_inlier_ratio() -> f64 {
    0.03
}

fn default_min_inliers() -> usize {
    8
}

fn default_max_required_inliers() -> usize {
    40
}

fn default_ransac_iterations() -> usize {
    1000
}

fn default_ransac_threshold() -> f64 {
    4.0
}

fn default_ransac_seed() -> u64 {
    0x00c0_ffee
}

fn default_marker_width() -> f64 {
    0.2
}

fn default_min_area() -> f64 {
    400.0
}

fn default_max_depth() -> f64 {
    50.0
}

fn default_min_feature_confidence() -> f64 {
    0.1
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            ratio: default_ratio(),
            max_hamming: default_max_hamming(),
            cross_check: false,
            inlier_ratio: default_inlier_ratio(),
            min_inliers: default_min_inliers(),
            max_required_inliers: default_max_required_inliers(),
            ransac_iterations: default_ransac_iterations(),
            ransac_threshold_px: default_ransac_threshold(),
            ransac_seed: default_ransac_seed(),
            marker_width_m: default_marker_width(),
            min_area_px: default_min_area(),
            max_depth_m: default_max_depth(),
            min_feature_confidence: default_min_feature_confidence(),
        }
    }
}

impl MatcherConfig {
    /// Fewer false positives, needs a clear view of the marker
    pub fn strict() -> Self {
        Self {
            ratio: 0.7,
            max_hamming: 48,
            cross_check: true,
            inlier_ratio: 0.05,
            min_inliers: 12,
            ransac_threshold_px: 3.0,
            ..Default::default()
        }
    }

    /// Matches small or blurry markers at the cost of more false positives
    pub fn lenient() -> Self {
        Self {
            ratio: 0.8,
            max_hamming: 80,
            inlier_ratio: 0.02,
            min_inliers: 6,
            ransac_threshold_px: 6.0,
            min_area_px: 100.0,
            ..Default::default()
        }
    }

    /// Inliers needed to accept a marker indexed with `feature_count` features.
    pub fn required_inliers(&self, feature_count: u32) -> usize {
        let scaled = (feature_count as f64 * self.inlier_ratio).ceil() as usize;
        let floor = self.min_inliers.max(4);
        scaled.clamp(floor, self.max_required_inliers.max(floor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_inliers_scale_with_feature_count() {
        let config = MatcherConfig::default();
        assert_eq!(config.required_inliers(40), 8);
        assert_eq!(config.required_inliers(500), 15);
        assert_eq!(config.required_inliers(1800), 40);
        assert!(config.required_inliers(40) < config.required_inliers(1800));
    }

    #[test]
    fn test_presets_order() {
        let strict = MatcherConfig::strict();
        let lenient = MatcherConfig::lenient();
        assert!(strict.required_inliers(500) > lenient.required_inliers(500));
        assert!(strict.max_hamming < lenient.max_hamming);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: MatcherConfig = serde_json::from_str(r#"{"cross_check": true}"#).unwrap();
        assert!(config.cross_check);
        assert_eq!(config.max_hamming, 64);
        assert_eq!(config.marker_width_m, 0.2);
    }
}
