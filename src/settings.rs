//! Engine settings
//!
//! Every tunable of the pipeline in one TOML document. Each section is
//! optional and falls back to its defaults, so an empty file is valid.

use crate::engine::StrategyPolicy;
use arcast_core::{CameraSettings, GpsDepth, PoseConfig};
use arcast_cv::{FeatureConfig, MatcherConfig, ObjectGateConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid settings: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub strategy: StrategyPolicy,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub object: ObjectGateConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub camera: CameraSettings,
}

impl Settings {
    /// Read, parse and validate a settings file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut problems = Vec::new();

        if self.strategy.order.is_empty() {
            problems.push("strategy.order is empty".to_string());
        }
        for (i, strategy) in self.strategy.order.iter().enumerate() {
            if self.strategy.order[..i].contains(strategy) {
                problems.push(format!("strategy.order lists {strategy} twice"));
            }
        }

        let f = &self.features;
        if f.detection_target == 0 || f.positioning_target == 0 || f.frame_target == 0 {
            problems.push("features: keypoint targets must be positive".to_string());
        }
        if f.pyramid_levels == 0 {
            problems.push("features.pyramid_levels must be at least 1".to_string());
        }
        if !(f.scale_factor > 1.0) {
            problems.push(format!("features.scale_factor = {} must exceed 1", f.scale_factor));
        }
        if !(f.confidence_half_saturation > 0.0) {
            problems.push("features.confidence_half_saturation must be positive".to_string());
        }

        let m = &self.matcher;
        if !(m.ratio > 0.0 && m.ratio <= 1.0) {
            problems.push(format!("matcher.ratio = {} is outside (0, 1]", m.ratio));
        }
        if m.min_inliers < 4 {
            problems.push("matcher.min_inliers must be at least 4".to_string());
        }
        if m.max_required_inliers < m.min_inliers {
            problems.push("matcher.max_required_inliers is below matcher.min_inliers".to_string());
        }
        if !(m.marker_width_m > 0.0) {
            problems.push("matcher.marker_width_m must be positive".to_string());
        }
        if !(m.ransac_threshold_px > 0.0) {
            problems.push("matcher.ransac_threshold_px must be positive".to_string());
        }

        if !(0.0..=1.0).contains(&self.object.nms_iou) {
            problems.push(format!("object.nms_iou = {} is outside [0, 1]", self.object.nms_iou));
        }

        let p = &self.pose;
        if !(p.assumed_object_height_m > 0.0) {
            problems.push("pose.assumed_object_height_m must be positive".to_string());
        }
        if !(p.object_depth_min_m > 0.0 && p.object_depth_min_m <= p.object_depth_max_m) {
            problems.push("pose: object depth range is empty".to_string());
        }
        match p.gps_depth {
            GpsDepth::Fixed { distance_m } if !(distance_m > 0.0) => {
                problems.push("pose.gps_depth.distance_m must be positive".to_string());
            }
            GpsDepth::Scaled { min_m, max_m, .. } if !(min_m > 0.0 && min_m <= max_m) => {
                problems.push("pose.gps_depth: depth range is empty".to_string());
            }
            _ => {}
        }

        let fov = self.camera.horizontal_fov_deg;
        if !(fov > 0.0 && fov < 180.0) {
            problems.push(format!("camera.horizontal_fov_deg = {fov} is outside (0, 180)"));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SettingsError::Validation(problems.join("; ")))
        }
    }
}
