//! GPS proximity trigger.
//!
//! Great-circle distance (haversine) and initial bearing on a spherical
//! Earth. Accurate to ~0.5% which is well below consumer GPS error at the
//! activation radii we deal with.

use crate::character::{CharacterConfig, GeoAnchor};
use serde::{Deserialize, Serialize};

/// Mean Earth radius (IUGG), meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Device position as reported by the sensor source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
}

impl DeviceFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Outcome of a proximity check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub inside: bool,
    pub distance_m: f64,
    /// Initial bearing from the device to the anchor, [0, 360).
    pub bearing_deg: f64,
    /// Anchor altitude minus device altitude, when the device reports one.
    pub elevation_delta_m: Option<f64>,
}

/// Wrap a longitude into (-180, 180].
pub fn normalize_longitude(longitude: f64) -> f64 {
    let wrapped = (longitude + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped <= -180.0 { 180.0 } else { wrapped }
}

/// Wrap an angle into [0, 360).
pub fn normalize_bearing(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Wrap an angle into (-180, 180].
pub fn wrap_signed(degrees: f64) -> f64 {
    let wrapped = normalize_bearing(degrees);
    if wrapped > 180.0 { wrapped - 360.0 } else { wrapped }
}

/// Great-circle distance between two points, meters.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = phi2 - phi1;
    let d_lambda = (normalize_longitude(b.longitude) - normalize_longitude(a.longitude)).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Forward azimuth from `from` towards `to`, degrees clockwise from north.
pub fn initial_bearing_deg(from: GeoPoint, to: GeoPoint) -> f64 {
    let phi1 = from.latitude.to_radians();
    let phi2 = to.latitude.to_radians();
    let d_lambda = (normalize_longitude(to.longitude) - normalize_longitude(from.longitude)).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    normalize_bearing(y.atan2(x).to_degrees())
}

/// Stateless GPS proximity evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTrigger;

impl GeoTrigger {
    pub fn new() -> Self {
        Self
    }

    /// Distance, bearing and inside-radius verdict for one character.
    /// The radius boundary is inclusive.
    pub fn evaluate(&self, device: &DeviceFix, config: &CharacterConfig) -> GeoFix {
        self.evaluate_anchor(device, &config.anchor)
    }

    pub fn evaluate_anchor(&self, device: &DeviceFix, anchor: &GeoAnchor) -> GeoFix {
        let target = GeoPoint::new(anchor.latitude, anchor.longitude);
        let distance_m = haversine_m(device.point(), target);
        let bearing_deg = initial_bearing_deg(device.point(), target);

        GeoFix {
            inside: distance_m <= anchor.activation_radius_m,
            distance_m,
            bearing_deg,
            elevation_delta_m: device.altitude.map(|alt| anchor.altitude - alt),
        }
    }
}
