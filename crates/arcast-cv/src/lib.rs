//! Arcast Computer Vision Library
//!
//! Marker feature indexing and matching, object detection gating, and the
//! frame and bounding-box types they share.

pub mod bbox;
pub mod features;
pub mod frame;
pub mod homography;
pub mod index;
pub mod marker;
pub mod object;
pub mod synthetic;
pub mod utils;

#[cfg(feature = "opencv")]
pub mod backend;

// Re-export commonly used types
pub use bbox::{BBox, BBoxCollection};
pub use features::{FeatureConfig, FeatureSet, OrbExtractor};
pub use frame::Frame;
pub use index::{ExtractionFailure, FeatureIndex, IndexedMarker};
pub use marker::{MarkerMatcher, MarkerTarget, MatcherConfig};
pub use object::{
    Detection, ModelHandle, ModelStatus, ModelUnavailable, ObjectGate, ObjectGateConfig,
    SelectionPolicy,
};

// Error handling
pub type Result<T> = anyhow::Result<T>;

/// Seams where extraction and detection backends plug in.
pub mod traits {
    use super::*;
    use image::GrayImage;

    /// Keypoint + binary descriptor extraction.
    ///
    /// Implementations must be deterministic: the same image and budget give
    /// the same feature set.
    pub trait FeatureExtractor: Send + Sync {
        fn extract(&self, image: &GrayImage, max_features: usize) -> FeatureSet;

        fn name(&self) -> &'static str;
    }

    /// A learned object detector run over a whole frame.
    pub trait ObjectModel: Send + Sync {
        fn infer(&self, frame: &Frame) -> Result<BBoxCollection>;

        fn name(&self) -> &str {
            "object-model"
        }
    }
}
