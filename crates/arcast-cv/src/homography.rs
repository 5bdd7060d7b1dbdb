//! Planar homography estimation
//!
//! Normalized DLT for the minimal and over-determined cases, wrapped in a
//! seeded RANSAC loop so repeated runs on the same matches agree.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HomographyError {
    #[error("need at least {needed} correspondences, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("source and destination lengths differ ({src} vs {dst})")]
    LengthMismatch { src: usize, dst: usize },
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("only {found} inliers, need {needed}")]
    InsufficientInliers { needed: usize, found: usize },
}

/// Map `p` through `h`. Points sent to infinity come back as NaN.
pub fn project(h: &Matrix3<f64>, p: [f64; 2]) -> [f64; 2] {
    let q = h * Vector3::new(p[0], p[1], 1.0);
    if q.z.abs() < 1e-12 {
        return [f64::NAN, f64::NAN];
    }
    [q.x / q.z, q.y / q.z]
}

/// Homogeneous weight of `p` under `h`; negative means the point lands
/// behind the camera.
pub fn weight(h: &Matrix3<f64>, p: [f64; 2]) -> f64 {
    h[(2, 0)] * p[0] + h[(2, 1)] * p[1] + h[(2, 2)]
}

fn transfer_error(h: &Matrix3<f64>, src: [f64; 2], dst: [f64; 2]) -> f64 {
    let p = project(h, src);
    let e = ((p[0] - dst[0]).powi(2) + (p[1] - dst[1]).powi(2)).sqrt();
    if e.is_finite() { e } else { f64::INFINITY }
}

/// Similarity moving the centroid to the origin with mean radius sqrt(2).
fn conditioning(points: &[[f64; 2]]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    let (cx, cy) = (sx / n, sy / n);

    let spread = points
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if spread < 1e-12 {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / spread;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// Direct linear transform from four or more correspondences.
///
/// Returns `H` with `dst ≈ project(H, src)`, scaled so `H[2][2] = 1` when
/// possible.
pub fn estimate(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<Matrix3<f64>, HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    let n = src.len();
    if n < 4 {
        return Err(HomographyError::TooFewPoints { needed: 4, got: n });
    }

    let ts = conditioning(src).ok_or(HomographyError::Degenerate)?;
    let td = conditioning(dst).ok_or(HomographyError::Degenerate)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        let s = ts * Vector3::new(s[0], s[1], 1.0);
        let d = td * Vector3::new(d[0], d[1], 1.0);
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);

        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -u * x;
        a[(r, 7)] = -u * y;
        a[(r, 8)] = -u;

        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -v * x;
        a[(r + 1, 7)] = -v * y;
        a[(r + 1, 8)] = -v;
    }

    // Null vector of A from the 9x9 normal matrix; a thin SVD of an 8x9
    // system would not expose it.
    let eigen = SymmetricEigen::new(a.transpose() * &a);
    let smallest = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map(|(i, _)| i)
        .ok_or(HomographyError::Degenerate)?;
    let h = eigen.eigenvectors.column(smallest);
    let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let td_inv = td.try_inverse().ok_or(HomographyError::Degenerate)?;
    let h = td_inv * normalized * ts;

    if !h.iter().all(|v| v.is_finite()) {
        return Err(HomographyError::Degenerate);
    }
    let scale = h[(2, 2)];
    Ok(if scale.abs() > 1e-12 { h / scale } else { h })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RansacConfig {
    pub iterations: usize,
    /// Max transfer error in pixels for a correspondence to count as inlier
    pub inlier_threshold: f64,
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            inlier_threshold: 4.0,
            min_inliers: 8,
            seed: 0x00c0_ffee,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RansacFit {
    pub homography: Matrix3<f64>,
    pub inliers: Vec<bool>,
    pub inlier_count: usize,
}

fn score(h: &Matrix3<f64>, src: &[[f64; 2]], dst: &[[f64; 2]], threshold: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(s, d)| transfer_error(h, *s, *d) < threshold)
        .collect()
}

fn sample_four(rng: &mut StdRng, n: usize) -> [usize; 4] {
    let mut picked = [usize::MAX; 4];
    let mut filled = 0;
    while filled < 4 {
        let candidate = rng.gen_range(0..n);
        if !picked[..filled].contains(&candidate) {
            picked[filled] = candidate;
            filled += 1;
        }
    }
    picked
}

/// Robust fit: best four-point hypothesis by inlier count, then a least
/// squares refit on its inliers.
pub fn fit_ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    config: &RansacConfig,
) -> Result<RansacFit, HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    let n = src.len();
    let needed = config.min_inliers.max(4);
    if n < needed {
        return Err(HomographyError::TooFewPoints { needed, got: n });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;

    for _ in 0..config.iterations {
        let idx = sample_four(&mut rng, n);
        let s: Vec<[f64; 2]> = idx.iter().map(|&i| src[i]).collect();
        let d: Vec<[f64; 2]> = idx.iter().map(|&i| dst[i]).collect();

        let Ok(h) = estimate(&s, &d) else {
            continue;
        };

        let mask = score(&h, src, dst, config.inlier_threshold);
        let count = mask.iter().filter(|m| **m).count();
        if best.as_ref().is_none_or(|b| count > b.2) {
            best = Some((h, mask, count));
            if count == n {
                break;
            }
        }
    }

    let (hypothesis, mask, count) = best.ok_or(HomographyError::Degenerate)?;
    if count < needed {
        return Err(HomographyError::InsufficientInliers {
            needed,
            found: count,
        });
    }

    let (s, d): (Vec<[f64; 2]>, Vec<[f64; 2]>) = src
        .iter()
        .zip(dst)
        .zip(&mask)
        .filter(|(_, m)| **m)
        .map(|((s, d), _)| (*s, *d))
        .unzip();

    // Keep the hypothesis if the refit explains fewer correspondences.
    let (homography, inliers) = match estimate(&s, &d) {
        Ok(refit) => {
            let refit_mask = score(&refit, src, dst, config.inlier_threshold);
            if refit_mask.iter().filter(|m| **m).count() >= count {
                (refit, refit_mask)
            } else {
                (hypothesis, mask)
            }
        }
        Err(_) => (hypothesis, mask),
    };

    let inlier_count = inliers.iter().filter(|m| **m).count();
    Ok(RansacFit {
        homography,
        inliers,
        inlier_count,
    })
}
