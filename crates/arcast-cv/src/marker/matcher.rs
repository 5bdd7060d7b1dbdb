//! Descriptor matching and marker pose estimation

use super::{MarkerTarget, MatcherConfig, pose};
use crate::features::{Descriptor, FeatureSet, hamming};
use crate::homography::{self, RansacConfig};
use arcast_core::{CameraSettings, MarkerPose};
use tracing::debug;

/// A marker-to-frame descriptor correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorMatch {
    pub marker: usize,
    pub frame: usize,
    pub distance: u32,
}

/// Best and second-best distance from `query` into `train`.
fn two_nearest(query: &Descriptor, train: &[Descriptor]) -> Option<(usize, u32, u32)> {
    let mut best: Option<(usize, u32)> = None;
    let mut second = u32::MAX;

    for (j, candidate) in train.iter().enumerate() {
        let d = hamming(query, candidate);
        match best {
            Some((_, b)) if d >= b => second = second.min(d),
            _ => {
                if let Some((_, b)) = best {
                    second = b;
                }
                best = Some((j, d));
            }
        }
    }

    best.map(|(j, d)| (j, d, second))
}

/// Matches and pose-estimates markers in frames.
#[derive(Debug, Clone, Default)]
pub struct MarkerMatcher {
    config: MatcherConfig,
    camera: CameraSettings,
}

impl MarkerMatcher {
    pub fn new(config: MatcherConfig, camera: CameraSettings) -> Self {
        Self { config, camera }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Ratio-tested nearest neighbors from marker descriptors into the frame.
    pub fn match_descriptors(&self, marker: &[Descriptor], frame: &[Descriptor]) -> Vec<DescriptorMatch> {
        let mut matches = Vec::new();
        if frame.is_empty() {
            return matches;
        }

        for (i, query) in marker.iter().enumerate() {
            let Some((j, best, second)) = two_nearest(query, frame) else {
                continue;
            };
            if best > self.config.max_hamming {
                continue;
            }
            if second != u32::MAX && best as f32 >= self.config.ratio * second as f32 {
                continue;
            }
            if self.config.cross_check {
                let back = two_nearest(&frame[j], marker).map(|(k, _, _)| k);
                if back != Some(i) {
                    continue;
                }
            }
            matches.push(DescriptorMatch {
                marker: i,
                frame: j,
                distance: best,
            });
        }

        matches
    }

    /// Find `target` in a frame's features.
    ///
    /// `None` covers every no-match reason: unusable marker, too few
    /// correspondences or inliers, and degenerate poses.
    pub fn match_marker(
        &self,
        frame: &FeatureSet,
        target: &MarkerTarget,
        min_feature_confidence: f64,
    ) -> Option<MarkerPose> {
        if target.feature_count == 0 || target.features.is_empty() {
            debug!(role = %target.role, "marker has no features");
            return None;
        }
        if target.confidence < min_feature_confidence {
            debug!(role = %target.role, confidence = target.confidence, "marker confidence too low");
            return None;
        }

        let required = self.config.required_inliers(target.feature_count);
        if frame.len() < required {
            return None;
        }

        let matches = self.match_descriptors(&target.features.descriptors, &frame.descriptors);
        if matches.len() < required {
            debug!(role = %target.role, matches = matches.len(), required, "too few matches");
            return None;
        }

        let (src, dst): (Vec<[f64; 2]>, Vec<[f64; 2]>) = matches
            .iter()
            .map(|m| {
                let a = &target.features.keypoints[m.marker];
                let b = &frame.keypoints[m.frame];
                ([a.x as f64, a.y as f64], [b.x as f64, b.y as f64])
            })
            .unzip();

        let ransac = RansacConfig {
            iterations: self.config.ransac_iterations,
            inlier_threshold: self.config.ransac_threshold_px,
            min_inliers: required,
            seed: self.config.ransac_seed,
        };
        let fit = match homography::fit_ransac(&src, &dst, &ransac) {
            Ok(fit) => fit,
            Err(err) => {
                debug!(role = %target.role, %err, "no consistent homography");
                return None;
            }
        };
        if fit.inlier_count < required {
            return None;
        }

        let k = self
            .camera
            .intrinsics_for(frame.image_size[0], frame.image_size[1]);
        match pose::decompose(
            &fit.homography,
            target.features.image_size,
            &k,
            &self.config,
            fit.inlier_count,
        ) {
            Ok(pose) => {
                debug!(
                    role = %target.role,
                    inliers = fit.inlier_count,
                    depth = pose.translation.z,
                    "marker matched"
                );
                Some(pose)
            }
            Err(reason) => {
                debug!(role = %target.role, ?reason, "degenerate marker pose");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Keypoint, OrbExtractor};
    use crate::synthetic;
    use crate::traits::FeatureExtractor;
    use arcast_core::MarkerRole;
    use std::sync::Arc;

    fn descriptor(fill: u8) -> Descriptor {
        [fill; 32]
    }

    fn target_from(features: FeatureSet, feature_count: u32) -> MarkerTarget {
        MarkerTarget {
            role: MarkerRole::Detection,
            features: Arc::new(features),
            feature_count,
            confidence: feature_count as f64 / (feature_count as f64 + 100.0),
        }
    }

    #[test]
    fn test_ratio_test_rejects_ambiguous() {
        let matcher = MarkerMatcher::default();
        let marker = [descriptor(0b0000_0001)];
        // Two equally close candidates: ambiguous.
        let frame = [descriptor(0b0000_0011), descriptor(0b0000_0101)];
        assert!(matcher.match_descriptors(&marker, &frame).is_empty());

        // One clearly closer candidate.
        let frame = [descriptor(0b0000_0001), descriptor(0b1111_0000)];
        let matches = matcher.match_descriptors(&marker, &frame);
        assert_eq!(matches, vec![DescriptorMatch { marker: 0, frame: 0, distance: 0 }]);
    }

    #[test]
    fn test_hamming_cutoff() {
        let matcher = MarkerMatcher::default();
        let marker = [descriptor(0x00)];
        // 32 bytes of 0x0f: 128 bits differ, beyond the cutoff.
        let frame = [descriptor(0x0f)];
        assert!(matcher.match_descriptors(&marker, &frame).is_empty());
    }

    #[test]
    fn test_cross_check_requires_mutual_best() {
        let matcher = MarkerMatcher::new(
            MatcherConfig {
                cross_check: true,
                ratio: 1.0,
                ..Default::default()
            },
            CameraSettings::default(),
        );
        let marker = [descriptor(0x00), descriptor(0x01)];
        let frame = [descriptor(0x01)];
        let matches = matcher.match_descriptors(&marker, &frame);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].marker, 1);
    }

    #[test]
    fn test_zero_feature_marker_never_matches() {
        let matcher = MarkerMatcher::default();
        let extractor = OrbExtractor::default();
        let image = synthetic::random_blocks(200, 200, 10, 9);
        let features = extractor.extract(&image, 500);

        // Descriptors exist but the cached count says extraction failed.
        let target = target_from(features.clone(), 0);
        assert!(matcher.match_marker(&features, &target, 0.0).is_none());

        let empty = target_from(FeatureSet::empty([200, 200]), 0);
        assert!(matcher.match_marker(&features, &empty, 0.0).is_none());
        assert!(matcher.match_marker(&FeatureSet::default(), &empty, 0.0).is_none());
    }

    #[test]
    fn test_low_confidence_marker_never_matches() {
        let matcher = MarkerMatcher::default();
        let extractor = OrbExtractor::default();
        let features = extractor.extract(&synthetic::random_blocks(200, 200, 10, 9), 500);

        let target = target_from(features.clone(), 5);
        assert!(matcher.match_marker(&features, &target, 0.1).is_none());
    }

    #[test]
    fn test_too_few_frame_features() {
        let matcher = MarkerMatcher::default();
        let kp = Keypoint {
            x: 10.0,
            y: 10.0,
            angle: 0.0,
            score: 1.0,
            octave: 0,
        };
        let tiny = FeatureSet {
            keypoints: vec![kp; 3],
            descriptors: vec![descriptor(1); 3],
            image_size: [640, 480],
        };
        let marker = extractor_features();
        let target = target_from(marker, 500);
        assert!(matcher.match_marker(&tiny, &target, 0.1).is_none());
    }

    fn extractor_features() -> FeatureSet {
        OrbExtractor::default().extract(&synthetic::random_blocks(200, 200, 10, 21), 500)
    }
}
