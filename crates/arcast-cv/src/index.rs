//! Marker feature indexing
//!
//! Computes the feature counts cached on each marker image and keeps the
//! matching descriptors in memory, keyed by image content hash.

use crate::Result;
use crate::features::{FeatureConfig, FeatureSet, OrbExtractor};
use crate::frame::Frame;
use crate::marker::MarkerTarget;
use crate::traits::FeatureExtractor;
use crate::utils::ImageUtils;
use anyhow::Context;
use arcast_core::{ContentHash, MarkerImage, MarkerRole, MediaRef, MediaStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Why an image produced no usable features. Callers record these as a
/// feature count of zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionFailure {
    #[error("image could not be decoded: {0}")]
    Undecodable(String),
    #[error("image has no pixels")]
    EmptyImage,
    #[error("no keypoints found")]
    NoKeypoints,
}

/// Result of indexing one marker image.
#[derive(Debug, Clone)]
pub struct IndexedMarker {
    pub role: MarkerRole,
    pub content_hash: ContentHash,
    pub feature_count: u32,
    pub features: Arc<FeatureSet>,
}

type CacheKey = (ContentHash, MarkerRole);

pub struct FeatureIndex {
    extractor: Arc<dyn FeatureExtractor>,
    config: FeatureConfig,
    cache: RwLock<HashMap<CacheKey, Arc<FeatureSet>>>,
    /// Hash actually indexed for media whose stored hash was empty or stale
    aliases: RwLock<HashMap<(MediaRef, MarkerRole), ContentHash>>,
    extractions: AtomicUsize,
}

impl std::fmt::Debug for FeatureIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureIndex")
            .field("extractor", &self.extractor.name())
            .field("config", &self.config)
            .field("extractions", &self.extraction_count())
            .finish()
    }
}

impl Default for FeatureIndex {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

impl FeatureIndex {
    pub fn new(config: FeatureConfig) -> Self {
        let extractor = Arc::new(OrbExtractor::new(&config));
        Self::with_extractor(extractor, config)
    }

    pub fn with_extractor(extractor: Arc<dyn FeatureExtractor>, config: FeatureConfig) -> Self {
        Self {
            extractor,
            config,
            cache: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            extractions: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Number of marker extractions run so far. Frame extraction is not counted.
    pub fn extraction_count(&self) -> usize {
        self.extractions.load(Ordering::Relaxed)
    }

    /// Confidence in a marker indexed with `count` features, in [0, 1).
    pub fn confidence(&self, count: u32) -> f64 {
        let count = count as f64;
        count / (count + self.config.confidence_half_saturation.max(f64::EPSILON))
    }

    fn extract(&self, bytes: &[u8], target: usize) -> std::result::Result<FeatureSet, ExtractionFailure> {
        let image = ImageUtils::decode_grayscale(bytes)
            .map_err(|e| ExtractionFailure::Undecodable(format!("{e:#}")))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(ExtractionFailure::EmptyImage);
        }

        self.extractions.fetch_add(1, Ordering::Relaxed);
        let features = self.extractor.extract(&image, target);
        if features.is_empty() {
            return Err(ExtractionFailure::NoKeypoints);
        }
        Ok(features)
    }

    /// Number of features found when asking for up to `target`.
    pub fn extract_feature_count(
        &self,
        bytes: &[u8],
        target: usize,
    ) -> std::result::Result<u32, ExtractionFailure> {
        self.extract(bytes, target).map(|f| f.len() as u32)
    }

    /// Extract with the budget for `role` and remember the descriptors.
    pub fn index_marker(
        &self,
        bytes: &[u8],
        role: MarkerRole,
    ) -> std::result::Result<IndexedMarker, ExtractionFailure> {
        let content_hash = ContentHash::of(bytes);
        let features = Arc::new(self.extract(bytes, self.config.target_for(role))?);

        if let Ok(mut cache) = self.cache.write() {
            cache.insert((content_hash.clone(), role), features.clone());
        }
        debug!(%role, hash = %content_hash, count = features.len(), "marker indexed");

        Ok(IndexedMarker {
            role,
            content_hash,
            feature_count: features.len() as u32,
            features,
        })
    }

    pub fn cached(&self, hash: &ContentHash, role: MarkerRole) -> Option<Arc<FeatureSet>> {
        let cache = self.cache.read().ok()?;
        cache.get(&(hash.clone(), role)).cloned()
    }

    /// Descriptors for a stored marker, by its stored hash or, failing that,
    /// by the hash its media was last indexed under.
    fn lookup(&self, image: &MarkerImage, role: MarkerRole) -> Option<Arc<FeatureSet>> {
        if !image.content_hash.is_empty() {
            if let Some(features) = self.cached(&image.content_hash, role) {
                return Some(features);
            }
        }
        let alias = {
            let aliases = self.aliases.read().ok()?;
            aliases.get(&(image.media.clone(), role)).cloned()?
        };
        self.cached(&alias, role)
    }

    /// Matching target for a stored marker image.
    ///
    /// Returns `Ok(None)` for markers whose cached count is zero: those never
    /// match. Descriptors missing from the cache (e.g. after a restart) are
    /// rebuilt from the media store once; the cached count is authoritative.
    pub fn target(
        &self,
        image: &MarkerImage,
        role: MarkerRole,
        media: &dyn MediaStore,
    ) -> Result<Option<MarkerTarget>> {
        if !image.is_usable() {
            return Ok(None);
        }

        let features = match self.lookup(image, role) {
            Some(features) => features,
            None => {
                let bytes = media
                    .fetch(&image.media)
                    .with_context(|| format!("Failed to fetch marker {}", image.media))?;
                match self.index_marker(&bytes, role) {
                    Ok(indexed) => {
                        if indexed.content_hash != image.content_hash {
                            if !image.content_hash.is_empty() {
                                warn!(media = %image.media, "marker bytes changed since indexing");
                            }
                            if let Ok(mut aliases) = self.aliases.write() {
                                aliases.insert((image.media.clone(), role), indexed.content_hash);
                            }
                        }
                        indexed.features
                    }
                    Err(failure) => {
                        warn!(media = %image.media, %failure, "marker could not be re-indexed");
                        return Ok(None);
                    }
                }
            }
        };

        Ok(Some(MarkerTarget {
            role,
            features,
            feature_count: image.feature_count,
            confidence: self.confidence(image.feature_count),
        }))
    }

    /// Frame features with the same extractor and parameters as markers.
    pub fn extract_frame(&self, frame: &Frame) -> FeatureSet {
        self.extractor.extract(frame.gray(), self.config.frame_target)
    }
}
