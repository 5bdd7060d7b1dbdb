//! Pinhole camera intrinsics.
//!
//! Phone cameras rarely ship calibration, so by default intrinsics are
//! derived from the frame size and a nominal horizontal field of view.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length in x (pixels).
    pub fx: f64,
    /// Focal length in y (pixels).
    pub fy: f64,
    /// Principal point x (pixels).
    pub cx: f64,
    /// Principal point y (pixels).
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Square pixels, principal point at the frame center.
    pub fn from_fov(width: u32, height: u32, horizontal_fov_deg: f64) -> Self {
        let half = (horizontal_fov_deg.to_radians() / 2.0).tan();
        let f = (width as f64 / 2.0) / half;
        Self {
            fx: f,
            fy: f,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    /// Returns `true` when focal lengths are finite and non-zero.
    pub fn is_valid(self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.fx.abs() > 1e-12
            && self.fy.abs() > 1e-12
    }

    /// Pixel to normalized pinhole coordinates.
    pub fn pixel_to_normalized(self, pixel_xy: [f64; 2]) -> [f64; 2] {
        [
            (pixel_xy[0] - self.cx) / self.fx,
            (pixel_xy[1] - self.cy) / self.fy,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraSettings {
    /// Used when no explicit intrinsics are configured.
    #[serde(default = "default_hfov")]
    pub horizontal_fov_deg: f64,
    /// Calibrated intrinsics for the capture resolution, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsics: Option<CameraIntrinsics>,
}

fn default_hfov() -> f64 {
    63.0
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            horizontal_fov_deg: default_hfov(),
            intrinsics: None,
        }
    }
}

impl CameraSettings {
    pub fn intrinsics_for(&self, width: u32, height: u32) -> CameraIntrinsics {
        match self.intrinsics {
            Some(k) if k.is_valid() => k,
            _ => CameraIntrinsics::from_fov(width, height, self.horizontal_fov_deg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ninety_degree_fov() {
        let k = CameraIntrinsics::from_fov(640, 480, 90.0);
        assert_relative_eq!(k.fx, 320.0, epsilon = 1e-9);
        assert_eq!(k.cx, 320.0);
        assert_eq!(k.cy, 240.0);
        let [x, y] = k.pixel_to_normalized([640.0, 240.0]);
        assert_relative_eq!(x, 1.0, epsilon = 1e-9);
        assert_eq!(y, 0.0);
    }

    #[test]
    fn test_invalid_intrinsics_fall_back_to_fov() {
        let settings = CameraSettings {
            horizontal_fov_deg: 90.0,
            intrinsics: Some(CameraIntrinsics {
                fx: 0.0,
                fy: 0.0,
                cx: 1.0,
                cy: 1.0,
            }),
        };
        assert_relative_eq!(settings.intrinsics_for(640, 480).fx, 320.0, epsilon = 1e-9);
    }
}
