//! Steered BRIEF descriptors and intensity-centroid orientation.

use super::Descriptor;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::integral_image::integral_image;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Radius of the orientation patch.
pub const ORIENTATION_RADIUS: i32 = 15;

/// Test points are drawn inside this radius so a rotated 5x5 sample still
/// stays within the orientation patch.
const PATTERN_RADIUS: i32 = 13;

/// Half-size of the box filter applied around each test point.
const SAMPLE_HALF: i64 = 2;

/// Pixels a keypoint must keep from every edge.
pub const EDGE_BORDER: u32 = 16;

const PATTERN_SEED: u64 = 0x5eed_b41e;

/// 256 point-pair comparisons, generated once from a fixed seed so every
/// extractor in the process produces comparable descriptors.
#[derive(Debug, Clone)]
pub struct BriefPattern {
    pairs: Vec<[[f32; 2]; 2]>,
}

impl Default for BriefPattern {
    fn default() -> Self {
        Self::new()
    }
}

impl BriefPattern {
    pub fn new() -> Self {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let point = |rng: &mut StdRng| loop {
            let x = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            let y = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
                return [x as f32, y as f32];
            }
        };

        let mut pairs = Vec::with_capacity(256);
        while pairs.len() < 256 {
            let a = point(&mut rng);
            let b = point(&mut rng);
            if a != b {
                pairs.push([a, b]);
            }
        }
        Self { pairs }
    }

    /// Describe the patch around `(x, y)` rotated by `angle` radians.
    pub fn describe(&self, integral: &IntegralImage, x: u32, y: u32, angle: f32) -> Descriptor {
        let (sin, cos) = angle.sin_cos();
        let steer = |p: [f32; 2]| -> (i64, i64) {
            let rx = cos * p[0] - sin * p[1];
            let ry = sin * p[0] + cos * p[1];
            (x as i64 + rx.round() as i64, y as i64 + ry.round() as i64)
        };

        let mut descriptor = [0u8; 32];
        for (bit, [a, b]) in self.pairs.iter().enumerate() {
            let (ax, ay) = steer(*a);
            let (bx, by) = steer(*b);
            if integral.box_sum(ax, ay, SAMPLE_HALF) < integral.box_sum(bx, by, SAMPLE_HALF) {
                descriptor[bit / 8] |= 1 << (bit % 8);
            }
        }
        descriptor
    }
}

/// Summed-area table with a zero row and column in front.
#[derive(Debug, Clone)]
pub struct IntegralImage {
    sums: ImageBuffer<Luma<u64>, Vec<u64>>,
}

impl IntegralImage {
    pub fn new(image: &GrayImage) -> Self {
        Self {
            sums: integral_image::<_, u64>(image),
        }
    }

    /// Sum over the square of half-size `half` centered on `(x, y)`,
    /// clamped to the image.
    pub fn box_sum(&self, x: i64, y: i64, half: i64) -> u64 {
        let width = self.sums.width() as i64 - 1;
        let height = self.sums.height() as i64 - 1;
        let x0 = (x - half).clamp(0, width);
        let y0 = (y - half).clamp(0, height);
        let x1 = (x + half + 1).clamp(0, width);
        let y1 = (y + half + 1).clamp(0, height);

        let at = |x: i64, y: i64| self.sums.get_pixel(x as u32, y as u32)[0];
        at(x1, y1) + at(x0, y0) - at(x1, y0) - at(x0, y1)
    }
}

/// Orientation from the intensity centroid of the disk around `(x, y)`.
///
/// The caller guarantees the disk lies inside the image.
pub fn orientation(image: &GrayImage, x: u32, y: u32) -> f32 {
    let r = ORIENTATION_RADIUS;
    let mut m10 = 0i64;
    let mut m01 = 0i64;

    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let v = image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }

    (m01 as f32).atan2(m10 as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::hamming;

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 3 + y * 5) % 256) as u8]))
    }

    #[test]
    fn test_pattern_is_deterministic() {
        let a = BriefPattern::new();
        let b = BriefPattern::new();
        assert_eq!(a.pairs, b.pairs);
        assert_eq!(a.pairs.len(), 256);
        for [p, q] in &a.pairs {
            assert!(p[0] * p[0] + p[1] * p[1] <= 169.0);
            assert!(q[0] * q[0] + q[1] * q[1] <= 169.0);
        }
    }

    #[test]
    fn test_integral_box_sum() {
        let image = GrayImage::from_pixel(10, 10, Luma([2]));
        let integral = IntegralImage::new(&image);
        assert_eq!(integral.box_sum(5, 5, 2), 25 * 2);
        // Clamped at the corner: 3x3 remain.
        assert_eq!(integral.box_sum(0, 0, 2), 9 * 2);
        assert_eq!(integral.box_sum(9, 9, 2), 9 * 2);
        assert_eq!(integral.box_sum(40, 40, 2), 0);
    }

    #[test]
    fn test_orientation_points_to_bright_side() {
        let image = GrayImage::from_fn(64, 64, |x, _| Luma([if x > 32 { 200 } else { 10 }]));
        let angle = orientation(&image, 32, 32);
        assert!(angle.abs() < 1e-3, "angle {angle}");

        let image = GrayImage::from_fn(64, 64, |_, y| Luma([if y > 32 { 200 } else { 10 }]));
        let angle = orientation(&image, 32, 32);
        assert!((angle - std::f32::consts::FRAC_PI_2).abs() < 1e-3, "angle {angle}");
    }

    #[test]
    fn test_same_patch_same_descriptor() {
        let image = gradient(80, 80);
        let integral = IntegralImage::new(&image);
        let pattern = BriefPattern::new();

        let a = pattern.describe(&integral, 40, 40, 0.3);
        let b = pattern.describe(&integral, 40, 40, 0.3);
        assert_eq!(hamming(&a, &b), 0);
    }
}
