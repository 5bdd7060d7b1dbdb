//! Character configuration model
//!
//! A character is a virtual overlay anchored to a GPS location, optionally
//! triggered by a printed marker or by a detected object class. The
//! configuration store owns these records; the engine reads a snapshot per
//! evaluation cycle.

use crate::error::{ConfigValidationError, ValidationErrors};
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NAME_MAX_LEN: usize = 100;

pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);
pub const ACTIVATION_RADIUS_RANGE: (f64, f64) = (1.0, 1000.0);
pub const HEIGHT_OFFSET_RANGE: (f64, f64) = (-10.0, 100.0);
pub const BASE_SIZE_RANGE: (f64, f64) = (0.1, 10.0);
pub const FACING_RANGE: (f64, f64) = (0.0, 360.0);
pub const MARKER_OFFSET_RANGE: (f64, f64) = (-10.0, 10.0);
pub const CONFIDENCE_RANGE: (f64, f64) = (0.1, 1.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub u64);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque handle into the media store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(String);

impl MediaRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the character's bounding volume sits on its anchor point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Standing on the ground
    #[default]
    Standing,
    /// Hovering in place
    Floating,
    /// Hanging on a wall
    Wall,
}

/// Anchor point of the bounding volume handed to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    /// Bottom center of the volume
    Base,
    /// Geometric center
    Center,
    /// Center of the back face
    Back,
}

impl DisplayMode {
    pub fn anchor(self) -> Anchor {
        match self {
            DisplayMode::Standing => Anchor::Base,
            DisplayMode::Floating => Anchor::Center,
            DisplayMode::Wall => Anchor::Back,
        }
    }
}

/// Displacement in meters. For markers: x right, y up, z out of the marker
/// towards the viewer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Offset3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Offset3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Which of the two marker images a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerRole {
    /// Decides whether the character appears
    Detection,
    /// Decides where the character appears
    Positioning,
}

impl fmt::Display for MarkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerRole::Detection => f.write_str("detection"),
            MarkerRole::Positioning => f.write_str("positioning"),
        }
    }
}

/// A marker image plus the derived values cached for it.
///
/// `content_hash` and `feature_count` are written only by feature indexing
/// when the image changes; a file on disk may omit them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerImage {
    pub media: MediaRef,
    #[serde(default)]
    pub content_hash: ContentHash,
    #[serde(default)]
    pub feature_count: u32,
}

impl MarkerImage {
    pub fn new(media: MediaRef) -> Self {
        Self {
            media,
            content_hash: ContentHash::default(),
            feature_count: 0,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.feature_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerStrategy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<MarkerImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positioning: Option<MarkerImage>,
    #[serde(default = "default_marker_offset")]
    pub offset: Offset3,
}

fn default_marker_offset() -> Offset3 {
    Offset3::new(0.0, 0.0, 0.5)
}

impl Default for MarkerStrategy {
    fn default() -> Self {
        Self {
            enabled: false,
            detection: None,
            positioning: None,
            offset: default_marker_offset(),
        }
    }
}

impl MarkerStrategy {
    pub fn image(&self, role: MarkerRole) -> Option<&MarkerImage> {
        match role {
            MarkerRole::Detection => self.detection.as_ref(),
            MarkerRole::Positioning => self.positioning.as_ref(),
        }
    }

    pub fn image_mut(&mut self, role: MarkerRole) -> &mut Option<MarkerImage> {
        match role {
            MarkerRole::Detection => &mut self.detection,
            MarkerRole::Positioning => &mut self.positioning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStrategy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub target_class: String,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_confidence_threshold() -> f64 {
    0.5
}

impl Default for ObjectStrategy {
    fn default() -> Self {
        Self {
            enabled: false,
            target_class: String::new(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoAnchor {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default = "default_activation_radius")]
    pub activation_radius_m: f64,
}

fn default_activation_radius() -> f64 {
    10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default)]
    pub height_offset_m: f64,
    #[serde(default = "default_base_size")]
    pub base_size: f64,
    /// Compass bearing the character faces (0 = north, 90 = east).
    #[serde(default)]
    pub facing_deg: f64,
    #[serde(default)]
    pub display_mode: DisplayMode,
}

fn default_base_size() -> f64 {
    1.0
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            height_offset_m: 0.0,
            base_size: default_base_size(),
            facing_deg: 0.0,
            display_mode: DisplayMode::Standing,
        }
    }
}

/// Trigger mechanism governing a character's visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Marker,
    Object,
    Gps,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Marker => f.write_str("marker"),
            Strategy::Object => f.write_str("object"),
            Strategy::Gps => f.write_str("gps"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterConfig {
    #[serde(default = "unassigned_id")]
    pub id: CharacterId,
    pub name: String,
    /// Bumped by the store on every committed write.
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_image: Option<MediaRef>,
    pub anchor: GeoAnchor,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub marker: MarkerStrategy,
    #[serde(default)]
    pub object: ObjectStrategy,
}

fn unassigned_id() -> CharacterId {
    CharacterId(0)
}

impl CharacterConfig {
    /// A GPS-only character with default placement.
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: unassigned_id(),
            name: name.into(),
            version: 0,
            anchor: GeoAnchor {
                latitude,
                longitude,
                altitude: 0.0,
                activation_radius_m: default_activation_radius(),
            },
            placement: Placement::default(),
            marker: MarkerStrategy::default(),
            object: ObjectStrategy::default(),
            character_image: None,
        }
    }

    pub fn with_radius(mut self, radius_m: f64) -> Self {
        self.anchor.activation_radius_m = radius_m;
        self
    }

    /// Enabled strategies in the fixed order marker, object, gps.
    /// GPS is listed only when neither of the other two is enabled.
    pub fn enabled_strategies(&self) -> Vec<Strategy> {
        let mut strategies = Vec::with_capacity(2);
        if self.marker.enabled {
            strategies.push(Strategy::Marker);
        }
        if self.object.enabled {
            strategies.push(Strategy::Object);
        }
        if strategies.is_empty() {
            strategies.push(Strategy::Gps);
        }
        strategies
    }

    /// The strategy that decides visibility under the default precedence.
    pub fn strategy(&self) -> Strategy {
        if self.marker.enabled {
            Strategy::Marker
        } else if self.object.enabled {
            Strategy::Object
        } else {
            Strategy::Gps
        }
    }

    /// Check every scalar range. All violations are reported, not just the first.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();

        let len = self.name.chars().count();
        if len == 0 || len > NAME_MAX_LEN {
            errors.push(ConfigValidationError::InvalidName {
                len,
                max: NAME_MAX_LEN,
            });
        }

        check_range(&mut errors, "latitude", self.anchor.latitude, LATITUDE_RANGE);
        check_range(&mut errors, "longitude", self.anchor.longitude, LONGITUDE_RANGE);
        if !self.anchor.altitude.is_finite() {
            errors.push(ConfigValidationError::NotFinite { field: "altitude" });
        }
        check_range(
            &mut errors,
            "activation_radius_m",
            self.anchor.activation_radius_m,
            ACTIVATION_RADIUS_RANGE,
        );
        check_range(
            &mut errors,
            "height_offset_m",
            self.placement.height_offset_m,
            HEIGHT_OFFSET_RANGE,
        );
        check_range(&mut errors, "base_size", self.placement.base_size, BASE_SIZE_RANGE);
        check_range(&mut errors, "facing_deg", self.placement.facing_deg, FACING_RANGE);

        let offset = self.marker.offset;
        check_range(&mut errors, "marker.offset.x", offset.x, MARKER_OFFSET_RANGE);
        check_range(&mut errors, "marker.offset.y", offset.y, MARKER_OFFSET_RANGE);
        check_range(&mut errors, "marker.offset.z", offset.z, MARKER_OFFSET_RANGE);

        check_range(
            &mut errors,
            "object.confidence_threshold",
            self.object.confidence_threshold,
            CONFIDENCE_RANGE,
        );
        if self.object.enabled && self.object.target_class.trim().is_empty() {
            errors.push(ConfigValidationError::MissingTargetClass);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }

    /// Fold a facing of exactly 360 degrees onto 0 and trim the class label.
    pub fn normalize(&mut self) {
        if self.placement.facing_deg >= 360.0 {
            self.placement.facing_deg -= 360.0;
        }
        let trimmed = self.object.target_class.trim();
        if trimmed.len() != self.object.target_class.len() {
            self.object.target_class = trimmed.to_string();
        }
    }
}

fn check_range(
    errors: &mut Vec<ConfigValidationError>,
    field: &'static str,
    value: f64,
    (min, max): (f64, f64),
) {
    if !value.is_finite() {
        errors.push(ConfigValidationError::NotFinite { field });
    } else if value < min || value > max {
        errors.push(ConfigValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_gps_only_character() {
        let config = CharacterConfig::new("Statue", 45.0, 9.0);

        assert_eq!(config.anchor.activation_radius_m, 10.0);
        assert_eq!(config.marker.offset, Offset3::new(0.0, 0.0, 0.5));
        assert_eq!(config.object.confidence_threshold, 0.5);
        assert_eq!(config.enabled_strategies(), vec![Strategy::Gps]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_reports_every_violation() {
        let mut config = CharacterConfig::new("", 91.0, 9.0).with_radius(0.5);
        config.placement.base_size = 20.0;
        config.marker.offset.z = f64::NAN;
        config.object.enabled = true;

        let errors = config.validate().unwrap_err();
        let fields: Vec<String> = errors.iter().map(|e| e.to_string()).collect();

        assert_eq!(errors.0.len(), 6, "{fields:?}");
        assert!(errors.0.contains(&ConfigValidationError::MissingTargetClass));
        assert!(errors.0.contains(&ConfigValidationError::NotFinite {
            field: "marker.offset.z"
        }));
    }

    #[test]
    fn test_facing_360_normalizes_to_north() {
        let mut config = CharacterConfig::new("Guide", 0.0, 0.0);
        config.placement.facing_deg = 360.0;
        assert!(config.validate().is_ok());

        config.normalize();
        assert_eq!(config.placement.facing_deg, 0.0);
    }

    #[test]
    fn test_marker_and_object_both_enabled() {
        let mut config = CharacterConfig::new("Both", 0.0, 0.0);
        config.marker.enabled = true;
        config.object.enabled = true;
        config.object.target_class = "bottle".into();

        assert_eq!(
            config.enabled_strategies(),
            vec![Strategy::Marker, Strategy::Object]
        );
        assert_eq!(config.strategy(), Strategy::Marker);
    }

    #[test]
    fn test_display_mode_serde_names() {
        let json = serde_json::to_string(&DisplayMode::Wall).unwrap();
        assert_eq!(json, "\"wall\"");
        assert_eq!(DisplayMode::Floating.anchor(), Anchor::Center);
    }
}
