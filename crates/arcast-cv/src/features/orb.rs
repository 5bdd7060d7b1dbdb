//! Pure-Rust ORB-style extractor.

use super::brief::{self, BriefPattern, EDGE_BORDER, IntegralImage};
use super::fast::{self, Corner};
use super::{FeatureConfig, FeatureSet, Keypoint};
use crate::traits::FeatureExtractor;
use image::GrayImage;
use image::imageops::{self, FilterType};

/// FAST corners over a scale pyramid, described with steered BRIEF.
///
/// Keypoints from every level compete for the budget on score alone; ties
/// are broken by level then position so extraction is deterministic.
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    fast_threshold: u8,
    levels: usize,
    scale_factor: f32,
    pattern: BriefPattern,
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new(&FeatureConfig::default())
    }
}

struct Candidate {
    level: usize,
    corner: Corner,
}

impl OrbExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            fast_threshold: config.fast_threshold,
            levels: config.pyramid_levels.max(1),
            scale_factor: config.scale_factor.max(1.01),
            pattern: BriefPattern::new(),
        }
    }

    fn pyramid(&self, image: &GrayImage) -> Vec<(GrayImage, f32)> {
        let min_side = 2 * EDGE_BORDER + 8;
        let mut levels = vec![(image.clone(), 1.0f32)];

        for level in 1..self.levels {
            let scale = self.scale_factor.powi(level as i32);
            let width = (image.width() as f32 / scale).round() as u32;
            let height = (image.height() as f32 / scale).round() as u32;
            if width < min_side || height < min_side {
                break;
            }
            let resized = imageops::resize(image, width, height, FilterType::Triangle);
            levels.push((resized, scale));
        }

        levels
    }
}

impl FeatureExtractor for OrbExtractor {
    fn extract(&self, image: &GrayImage, max_features: usize) -> FeatureSet {
        let image_size = [image.width(), image.height()];
        if max_features == 0 {
            return FeatureSet::empty(image_size);
        }

        let pyramid = self.pyramid(image);

        let detect_level = |(level, (img, _)): (usize, &(GrayImage, f32))| {
            fast::detect(img, self.fast_threshold, EDGE_BORDER)
                .into_iter()
                .map(|corner| Candidate { level, corner })
                .collect::<Vec<_>>()
        };

        #[cfg(feature = "parallel")]
        let per_level: Vec<Vec<Candidate>> = {
            use rayon::prelude::*;
            pyramid.par_iter().enumerate().map(detect_level).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let per_level: Vec<Vec<Candidate>> = pyramid.iter().enumerate().map(detect_level).collect();

        let mut candidates: Vec<Candidate> = per_level.into_iter().flatten().collect();

        candidates.sort_by(|a, b| {
            b.corner
                .score
                .total_cmp(&a.corner.score)
                .then(a.level.cmp(&b.level))
                .then(a.corner.y.cmp(&b.corner.y))
                .then(a.corner.x.cmp(&b.corner.x))
        });
        candidates.truncate(max_features);

        let integrals: Vec<IntegralImage> =
            pyramid.iter().map(|(img, _)| IntegralImage::new(img)).collect();

        let mut set = FeatureSet::empty(image_size);
        for Candidate { level, corner } in candidates {
            let (img, scale) = &pyramid[level];
            let angle = brief::orientation(img, corner.x, corner.y);
            let descriptor = self.pattern.describe(&integrals[level], corner.x, corner.y, angle);

            set.keypoints.push(Keypoint {
                x: corner.x as f32 * scale,
                y: corner.y as f32 * scale,
                angle,
                score: corner.score,
                octave: level as u8,
            });
            set.descriptors.push(descriptor);
        }

        set
    }

    fn name(&self) -> &'static str {
        "orb"
    }
}
