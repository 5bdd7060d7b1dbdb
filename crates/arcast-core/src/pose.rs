//! Pose composition
//!
//! Turns whichever trigger fired into a placement transform for the
//! renderer. Output transforms live in camera space with +x right, +y up and
//! -z forward, in meters. Marker poses arrive in the vision convention
//! (+x right, +y down, +z forward) and are flipped on the way out.

use crate::camera::CameraSettings;
use crate::character::{Anchor, CharacterConfig};
use crate::geo::{GeoFix, wrap_signed};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Rotation and translation of a detected marker relative to the camera,
/// in the vision convention. The marker frame has x to the right of the
/// printed image, y down it, and z into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerPose {
    pub rotation: Rotation3<f64>,
    /// Marker center in camera coordinates, meters.
    pub translation: Vector3<f64>,
    /// Apparent size of the marker in the frame relative to its indexed image.
    pub scale: f64,
    pub inliers: usize,
}

/// The detection chosen for an object-triggered character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectHit {
    pub class: String,
    pub confidence: f64,
    pub center_px: [f64; 2],
    pub size_px: [f64; 2],
    pub frame_size: [u32; 2],
}

/// What one strategy produced for one character in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    NoTrigger,
    Gps(GeoFix),
    Marker {
        detection: MarkerPose,
        positioning: Option<MarkerPose>,
    },
    Object(ObjectHit),
}

impl StrategyOutcome {
    pub fn is_trigger(&self) -> bool {
        match self {
            StrategyOutcome::NoTrigger => false,
            StrategyOutcome::Gps(fix) => fix.inside,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceOrientation {
    /// Compass heading of the camera's optical axis, degrees from north.
    pub heading_deg: f64,
}

impl DeviceOrientation {
    pub fn new(heading_deg: f64) -> Self {
        Self { heading_deg }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub translation: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub scale: f64,
    pub anchor: Anchor,
}

/// Virtual depth for GPS-placed characters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GpsDepth {
    /// Always this far in front of the camera.
    Fixed { distance_m: f64 },
    /// Real distance times `factor`, clamped.
    Scaled { factor: f64, min_m: f64, max_m: f64 },
}

impl Default for GpsDepth {
    fn default() -> Self {
        GpsDepth::Scaled {
            factor: 1.0,
            min_m: 2.0,
            max_m: 25.0,
        }
    }
}

impl GpsDepth {
    pub fn depth_for(&self, distance_m: f64) -> f64 {
        match *self {
            GpsDepth::Fixed { distance_m: d } => d,
            GpsDepth::Scaled {
                factor,
                min_m,
                max_m,
            } => (distance_m * factor).clamp(min_m, max_m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseConfig {
    /// Add anchor altitude minus device altitude to the GPS height.
    #[serde(default)]
    pub apply_altitude_delta: bool,
    /// Real-world height assumed for detected objects when estimating depth.
    #[serde(default = "default_object_height")]
    pub assumed_object_height_m: f64,
    #[serde(default = "default_object_depth_min")]
    pub object_depth_min_m: f64,
    #[serde(default = "default_object_depth_max")]
    pub object_depth_max_m: f64,
    #[serde(default)]
    pub gps_depth: GpsDepth,
}

fn default_object_height() -> f64 {
    0.3
}

fn default_object_depth_min() -> f64 {
    0.2
}

fn default_object_depth_max() -> f64 {
    15.0
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            apply_altitude_delta: false,
            assumed_object_height_m: default_object_height(),
            object_depth_min_m: default_object_depth_min(),
            object_depth_max_m: default_object_depth_max(),
            gps_depth: GpsDepth::default(),
        }
    }
}

/// Vision frame (y down, z forward) to render frame (y up, z backward).
fn flip() -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0))
}

/// Rotation about the up axis that turns the model's front towards
/// `bearing_deg` measured clockwise, as seen from above.
fn yaw(bearing_deg: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -bearing_deg.to_radians())
}

/// Pure mapping from a strategy outcome plus static placement to a transform.
#[derive(Debug, Clone, Default)]
pub struct PoseResolver {
    config: PoseConfig,
    camera: CameraSettings,
}

impl PoseResolver {
    pub fn new(config: PoseConfig, camera: CameraSettings) -> Self {
        Self { config, camera }
    }

    pub fn config(&self) -> &PoseConfig {
        &self.config
    }

    /// `None` whenever the outcome is not a trigger.
    pub fn resolve(
        &self,
        outcome: &StrategyOutcome,
        config: &CharacterConfig,
        orientation: &DeviceOrientation,
    ) -> Option<Transform3D> {
        let transform = match outcome {
            StrategyOutcome::NoTrigger => return None,
            StrategyOutcome::Gps(fix) => self.resolve_gps(fix, config, orientation)?,
            StrategyOutcome::Marker {
                detection,
                positioning,
            } => self.resolve_marker(positioning.as_ref().unwrap_or(detection), config),
            StrategyOutcome::Object(hit) => self.resolve_object(hit, config, orientation),
        };

        let finite = transform.translation.iter().all(|v| v.is_finite())
            && transform.rotation.coords.iter().all(|v| v.is_finite());
        finite.then_some(transform)
    }

    fn resolve_gps(
        &self,
        fix: &GeoFix,
        config: &CharacterConfig,
        orientation: &DeviceOrientation,
    ) -> Option<Transform3D> {
        if !fix.inside {
            return None;
        }

        let relative = wrap_signed(fix.bearing_deg - orientation.heading_deg).to_radians();
        let depth = self.config.gps_depth.depth_for(fix.distance_m);

        let mut height = config.placement.height_offset_m;
        if self.config.apply_altitude_delta {
            height += fix.elevation_delta_m.unwrap_or(0.0);
        }

        Some(Transform3D {
            translation: Vector3::new(depth * relative.sin(), height, -depth * relative.cos()),
            rotation: yaw(config.placement.facing_deg - orientation.heading_deg),
            scale: config.placement.base_size,
            anchor: config.placement.display_mode.anchor(),
        })
    }

    fn resolve_marker(&self, pose: &MarkerPose, config: &CharacterConfig) -> Transform3D {
        let offset = config.marker.offset;
        // Offsets are authored with y up and z out of the marker.
        let local = Vector3::new(offset.x, -offset.y, -offset.z);
        let position = pose.translation + pose.rotation * local;

        let f = flip();
        let in_render = Rotation3::from_matrix_unchecked(f * pose.rotation.matrix() * f);
        let rotation =
            UnitQuaternion::from_rotation_matrix(&in_render) * yaw(config.placement.facing_deg);

        Transform3D {
            translation: f * position,
            rotation,
            scale: config.placement.base_size,
            anchor: config.placement.display_mode.anchor(),
        }
    }

    fn resolve_object(
        &self,
        hit: &ObjectHit,
        config: &CharacterConfig,
        orientation: &DeviceOrientation,
    ) -> Transform3D {
        let k = self
            .camera
            .intrinsics_for(hit.frame_size[0], hit.frame_size[1]);

        let box_height = hit.size_px[1].max(1.0);
        let depth = (self.config.assumed_object_height_m * k.fy / box_height)
            .clamp(self.config.object_depth_min_m, self.config.object_depth_max_m);

        let [nx, ny] = k.pixel_to_normalized(hit.center_px);
        let in_camera = Vector3::new(nx * depth, ny * depth, depth);

        let offset = config.marker.offset;
        let translation = flip() * in_camera + Vector3::new(offset.x, offset.y, offset.z);

        Transform3D {
            translation,
            rotation: yaw(config.placement.facing_deg - orientation.heading_deg),
            scale: config.placement.base_size,
            anchor: config.placement.display_mode.anchor(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraIntrinsics;
    use crate::character::{DisplayMode, Offset3};
    use approx::assert_abs_diff_eq;

    fn gps_fix(distance_m: f64, bearing_deg: f64) -> GeoFix {
        GeoFix {
            inside: true,
            distance_m,
            bearing_deg,
            elevation_delta_m: Some(3.0),
        }
    }

    fn square_camera() -> CameraSettings {
        CameraSettings {
            horizontal_fov_deg: 90.0,
            intrinsics: Some(CameraIntrinsics {
                fx: 500.0,
                fy: 500.0,
                cx: 320.0,
                cy: 240.0,
            }),
        }
    }

    fn identity_marker(depth: f64) -> MarkerPose {
        MarkerPose {
            rotation: Rotation3::identity(),
            translation: Vector3::new(0.0, 0.0, depth),
            scale: 1.0,
            inliers: 40,
        }
    }

    #[test]
    fn test_no_trigger_never_renders() {
        let resolver = PoseResolver::default();
        let config = CharacterConfig::new("Ghost", 0.0, 0.0);
        let heading = DeviceOrientation::new(0.0);

        assert!(resolver.resolve(&StrategyOutcome::NoTrigger, &config, &heading).is_none());

        let mut outside = gps_fix(50.0, 0.0);
        outside.inside = false;
        assert!(resolver.resolve(&StrategyOutcome::Gps(outside), &config, &heading).is_none());
    }

    #[test]
    fn test_gps_target_straight_ahead() {
        let resolver = PoseResolver::new(
            PoseConfig {
                gps_depth: GpsDepth::Fixed { distance_m: 5.0 },
                ..Default::default()
            },
            CameraSettings::default(),
        );
        let mut config = CharacterConfig::new("Ahead", 0.0, 0.0);
        config.placement.height_offset_m = 1.7;
        config.placement.base_size = 2.0;

        let t = resolver
            .resolve(&StrategyOutcome::Gps(gps_fix(8.0, 90.0)), &config, &DeviceOrientation::new(90.0))
            .unwrap();

        assert_abs_diff_eq!(t.translation, Vector3::new(0.0, 1.7, -5.0), epsilon = 1e-9);
        assert_eq!(t.scale, 2.0);
        assert_eq!(t.anchor, Anchor::Base);
    }

    #[test]
    fn test_gps_target_to_the_right_with_scaled_depth() {
        let resolver = PoseResolver::new(
            PoseConfig {
                apply_altitude_delta: true,
                ..Default::default()
            },
            CameraSettings::default(),
        );
        let config = CharacterConfig::new("Right", 0.0, 0.0);

        // Target due east, device facing north: the character is to the right.
        let t = resolver
            .resolve(&StrategyOutcome::Gps(gps_fix(8.0, 90.0)), &config, &DeviceOrientation::new(0.0))
            .unwrap();
        assert_abs_diff_eq!(t.translation, Vector3::new(8.0, 3.0, 0.0), epsilon = 1e-9);

        // Scaled depth is clamped at the far end.
        let far = resolver
            .resolve(&StrategyOutcome::Gps(gps_fix(400.0, 0.0)), &config, &DeviceOrientation::new(0.0))
            .unwrap();
        assert_abs_diff_eq!(far.translation.z, -25.0, epsilon = 1e-9);
    }

    #[test]
    fn test_facing_rotates_front_towards_bearing() {
        let resolver = PoseResolver::default();
        let mut config = CharacterConfig::new("Facing", 0.0, 0.0);
        config.placement.facing_deg = 90.0;

        let t = resolver
            .resolve(&StrategyOutcome::Gps(gps_fix(5.0, 0.0)), &config, &DeviceOrientation::new(0.0))
            .unwrap();

        // Local -z (the model's front) turns to +x, i.e. east when facing north.
        let front = t.rotation * Vector3::new(0.0, 0.0, -1.0);
        assert_abs_diff_eq!(front, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_marker_offset_in_marker_frame() {
        let resolver = PoseResolver::default();
        let mut config = CharacterConfig::new("OnMarker", 0.0, 0.0);
        config.marker.offset = Offset3::new(0.1, 0.2, 0.5);
        config.placement.display_mode = DisplayMode::Wall;

        let outcome = StrategyOutcome::Marker {
            detection: identity_marker(2.0),
            positioning: None,
        };
        let t = resolver
            .resolve(&outcome, &config, &DeviceOrientation::default())
            .unwrap();

        // Marker faces the camera 2 m ahead; +z offset pulls the character towards the viewer.
        assert_abs_diff_eq!(t.translation, Vector3::new(0.1, 0.2, -1.5), epsilon = 1e-9);
        assert_eq!(t.anchor, Anchor::Back);
    }

    #[test]
    fn test_positioning_marker_wins_over_detection() {
        let resolver = PoseResolver::default();
        let mut config = CharacterConfig::new("Split", 0.0, 0.0);
        config.marker.offset = Offset3::default();

        let outcome = StrategyOutcome::Marker {
            detection: identity_marker(2.0),
            positioning: Some(identity_marker(4.0)),
        };
        let t = resolver
            .resolve(&outcome, &config, &DeviceOrientation::default())
            .unwrap();
        assert_abs_diff_eq!(t.translation.z, -4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_larger_box_is_closer() {
        let resolver = PoseResolver::new(PoseConfig::default(), square_camera());
        let mut config = CharacterConfig::new("Bottle", 0.0, 0.0);
        config.marker.offset = Offset3::default();

        let hit = |h: f64| ObjectHit {
            class: "bottle".into(),
            confidence: 0.9,
            center_px: [320.0, 240.0],
            size_px: [h / 2.0, h],
            frame_size: [640, 480],
        };

        let small = resolver
            .resolve(&StrategyOutcome::Object(hit(50.0)), &config, &DeviceOrientation::default())
            .unwrap();
        let large = resolver
            .resolve(&StrategyOutcome::Object(hit(150.0)), &config, &DeviceOrientation::default())
            .unwrap();

        // 0.3 m * 500 px / 50 px = 3 m
        assert_abs_diff_eq!(small.translation, Vector3::new(0.0, 0.0, -3.0), epsilon = 1e-9);
        assert!(large.translation.z > small.translation.z);
    }

    #[test]
    fn test_object_off_center_projects_left_and_up() {
        let resolver = PoseResolver::new(PoseConfig::default(), square_camera());
        let mut config = CharacterConfig::new("Cup", 0.0, 0.0);
        config.marker.offset = Offset3::new(0.0, 0.5, 0.0);

        let hit = ObjectHit {
            class: "cup".into(),
            confidence: 0.8,
            center_px: [70.0, 140.0],
            size_px: [100.0, 100.0],
            frame_size: [640, 480],
        };
        let t = resolver
            .resolve(&StrategyOutcome::Object(hit), &config, &DeviceOrientation::default())
            .unwrap();

        // depth 1.5 m; x = -250/500*1.5, y = +100/500*1.5 + 0.5
        assert_abs_diff_eq!(t.translation, Vector3::new(-0.75, 0.8, -1.5), epsilon = 1e-9);
    }
}
