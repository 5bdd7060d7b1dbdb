//! Homography sanity checks and planar pose decomposition.

use super::MatcherConfig;
use crate::homography::{project, weight};
use arcast_core::{CameraIntrinsics, MarkerPose};
use nalgebra::{Matrix3, Rotation3, Vector3};

/// Why a fitted homography was not turned into a pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degeneracy {
    NonFinite,
    BehindCamera,
    NotConvex,
    Mirrored,
    TooSmall,
    TooFar,
}

/// Marker image corners projected into the frame, clockwise from top-left.
pub fn projected_quad(h: &Matrix3<f64>, marker_size: [u32; 2]) -> [[f64; 2]; 4] {
    let (w, hgt) = (marker_size[0] as f64, marker_size[1] as f64);
    [[0.0, 0.0], [w, 0.0], [w, hgt], [0.0, hgt]].map(|p| project(h, p))
}

/// Signed shoelace area; positive for clockwise quads in image coordinates.
fn signed_area(quad: &[[f64; 2]; 4]) -> f64 {
    (0..4)
        .map(|i| {
            let a = quad[i];
            let b = quad[(i + 1) % 4];
            a[0] * b[1] - b[0] * a[1]
        })
        .sum::<f64>()
        / 2.0
}

/// Reject homographies that cannot come from a real view of a flat marker.
pub fn check(
    h: &Matrix3<f64>,
    marker_size: [u32; 2],
    config: &MatcherConfig,
) -> Result<[[f64; 2]; 4], Degeneracy> {
    if !h.iter().all(|v| v.is_finite()) {
        return Err(Degeneracy::NonFinite);
    }

    let (w, hgt) = (marker_size[0] as f64, marker_size[1] as f64);
    let corners = [[0.0, 0.0], [w, 0.0], [w, hgt], [0.0, hgt]];
    let weights = corners.map(|p| weight(h, p));
    // Every corner must land on the same side of the camera plane.
    let sign = weights[0].signum();
    if weights.iter().any(|wt| wt.abs() < 1e-12 || wt.signum() != sign) {
        return Err(Degeneracy::BehindCamera);
    }

    let quad = projected_quad(h, marker_size);
    if quad.iter().flatten().any(|v| !v.is_finite()) {
        return Err(Degeneracy::NonFinite);
    }

    let turns: Vec<f64> = (0..4)
        .map(|i| {
            let a = quad[i];
            let b = quad[(i + 1) % 4];
            let c = quad[(i + 2) % 4];
            (b[0] - a[0]) * (c[1] - b[1]) - (b[1] - a[1]) * (c[0] - b[0])
        })
        .collect();
    if turns.iter().all(|t| *t < 0.0) {
        return Err(Degeneracy::Mirrored);
    }
    if !turns.iter().all(|t| *t > 0.0) {
        return Err(Degeneracy::NotConvex);
    }

    if signed_area(&quad) < config.min_area_px {
        return Err(Degeneracy::TooSmall);
    }

    Ok(quad)
}

/// Camera-relative pose of the marker plane from the marker-to-frame
/// homography.
///
/// Marker pixels are lifted to meters with the configured printed width, so
/// the homography factors as `K [r1 r2 t]` up to scale.
pub fn decompose(
    h: &Matrix3<f64>,
    marker_size: [u32; 2],
    k: &CameraIntrinsics,
    config: &MatcherConfig,
    inliers: usize,
) -> Result<MarkerPose, Degeneracy> {
    let quad = check(h, marker_size, config)?;

    let (w, hgt) = (marker_size[0] as f64, marker_size[1] as f64);
    let px_per_m = w / config.marker_width_m;
    let lift = Matrix3::new(px_per_m, 0.0, w / 2.0, 0.0, px_per_m, hgt / 2.0, 0.0, 0.0, 1.0);
    let k_inv = Matrix3::new(
        1.0 / k.fx,
        0.0,
        -k.cx / k.fx,
        0.0,
        1.0 / k.fy,
        -k.cy / k.fy,
        0.0,
        0.0,
        1.0,
    );

    let g = k_inv * h * lift;
    let g1: Vector3<f64> = g.column(0).into_owned();
    let g2: Vector3<f64> = g.column(1).into_owned();
    let g3: Vector3<f64> = g.column(2).into_owned();

    let (n1, n2) = (g1.norm(), g2.norm());
    if n1 < 1e-12 || n2 < 1e-12 {
        return Err(Degeneracy::NonFinite);
    }
    let mut lambda = 2.0 / (n1 + n2);
    if g3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = g1 * lambda;
    let r2 = g2 * lambda;
    let translation = g3 * lambda;
    let approx = Matrix3::from_columns(&[r1, r2, r1.cross(&r2)]);

    // Closest rotation in the Frobenius sense.
    let svd = approx.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(Degeneracy::NonFinite);
    };
    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        rotation = u * v_t;
    }

    if !rotation.iter().chain(translation.iter()).all(|v| v.is_finite()) {
        return Err(Degeneracy::NonFinite);
    }
    if translation.z <= 0.0 {
        return Err(Degeneracy::BehindCamera);
    }
    if translation.z > config.max_depth_m {
        return Err(Degeneracy::TooFar);
    }

    Ok(MarkerPose {
        rotation: Rotation3::from_matrix_unchecked(rotation),
        translation,
        scale: (signed_area(&quad) / (w * hgt)).sqrt(),
        inliers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn camera() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        }
    }

    #[test]
    fn test_fronto_parallel_marker() {
        // 200 px marker at 0.2 m printed width, seen 1:1 with its center on
        // the principal point: depth = f / px_per_m = 0.5 m.
        let h = Matrix3::new(1.0, 0.0, 220.0, 0.0, 1.0, 140.0, 0.0, 0.0, 1.0);
        let pose = decompose(&h, [200, 200], &camera(), &MatcherConfig::default(), 30).unwrap();

        assert_abs_diff_eq!(pose.translation, Vector3::new(0.0, 0.0, 0.5), epsilon = 1e-9);
        assert_abs_diff_eq!(pose.rotation.angle(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(pose.scale, 1.0, epsilon = 1e-9);
        assert_eq!(pose.inliers, 30);
    }

    #[test]
    fn test_half_size_is_twice_as_far() {
        let h = Matrix3::new(0.5, 0.0, 270.0, 0.0, 0.5, 190.0, 0.0, 0.0, 1.0);
        let pose = decompose(&h, [200, 200], &camera(), &MatcherConfig::default(), 30).unwrap();
        assert_abs_diff_eq!(pose.translation.z, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pose.scale, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_in_plane_rotation_is_recovered() {
        let angle = 30f64.to_radians();
        let (s, c) = angle.sin_cos();
        // Rotate about the marker center, then move it to the principal point.
        let center = Matrix3::new(1.0, 0.0, -100.0, 0.0, 1.0, -100.0, 0.0, 0.0, 1.0);
        let rot = Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0);
        let place = Matrix3::new(1.0, 0.0, 320.0, 0.0, 1.0, 240.0, 0.0, 0.0, 1.0);
        let h = place * rot * center;

        let pose = decompose(&h, [200, 200], &camera(), &MatcherConfig::default(), 20).unwrap();
        assert_abs_diff_eq!(pose.rotation.angle(), angle, epsilon = 1e-6);
        let axis = pose.rotation.axis().unwrap();
        assert_abs_diff_eq!(axis.z.abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mirrored_homography_is_rejected() {
        let h = Matrix3::new(-1.0, 0.0, 400.0, 0.0, 1.0, 100.0, 0.0, 0.0, 1.0);
        assert_eq!(
            check(&h, [200, 200], &MatcherConfig::default()),
            Err(Degeneracy::Mirrored)
        );
    }

    #[test]
    fn test_tiny_projection_is_rejected() {
        let h = Matrix3::new(0.05, 0.0, 300.0, 0.0, 0.05, 200.0, 0.0, 0.0, 1.0);
        assert_eq!(
            check(&h, [200, 200], &MatcherConfig::default()),
            Err(Degeneracy::TooSmall)
        );
    }

    #[test]
    fn test_plane_crossing_horizon_is_rejected() {
        // w changes sign between the left and right marker edges.
        let h = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -0.01, 0.0, 1.0);
        assert_eq!(
            check(&h, [200, 200], &MatcherConfig::default()),
            Err(Degeneracy::BehindCamera)
        );
    }

    #[test]
    fn test_non_finite_is_rejected() {
        let mut h = Matrix3::identity();
        h[(0, 1)] = f64::NAN;
        assert_eq!(
            check(&h, [200, 200], &MatcherConfig::default()),
            Err(Degeneracy::NonFinite)
        );
    }

    #[test]
    fn test_depth_limit() {
        let h = Matrix3::new(0.02, 0.0, 318.0, 0.0, 0.02, 238.0, 0.0, 0.0, 1.0);
        let config = MatcherConfig {
            min_area_px: 1.0,
            max_depth_m: 10.0,
            ..Default::default()
        };
        // 0.02 scale puts the marker at 25 m.
        assert_eq!(
            decompose(&h, [200, 200], &camera(), &config, 10).map(|_| ()),
            Err(Degeneracy::TooFar)
        );
    }
}
