//! Arcast core domain
//!
//! Character configurations, GPS proximity, camera geometry and pose
//! composition. Nothing in this crate touches pixels; the vision side lives in
//! `arcast-cv`.

pub mod camera;
pub mod character;
pub mod error;
pub mod geo;
pub mod hash;
pub mod pose;
pub mod store;

pub use camera::{CameraIntrinsics, CameraSettings};
pub use character::{
    Anchor, CharacterConfig, CharacterId, DisplayMode, GeoAnchor, MarkerImage, MarkerRole,
    MarkerStrategy, MediaRef, ObjectStrategy, Offset3, Placement, Strategy,
};
pub use error::{ConfigValidationError, StoreError, ValidationErrors};
pub use geo::{DeviceFix, GeoFix, GeoPoint, GeoTrigger};
pub use hash::{ContentHash, needs_recompute};
pub use pose::{
    DeviceOrientation, GpsDepth, MarkerPose, ObjectHit, PoseConfig, PoseResolver,
    StrategyOutcome, Transform3D,
};
pub use store::{
    ConfigurationStore, FsMediaStore, MediaStore, MemoryConfigStore, MemoryMediaStore,
};
