//! Arcast: AR character activation
//!
//! Decides, frame by frame, which configured characters are visible and
//! where to place them. A character fires by GPS proximity, by a printed
//! marker seen in the camera frame, or by a detected object class.

pub mod catalog;
pub mod engine;
pub mod registry;
pub mod sensors;
pub mod settings;

pub use catalog::TomlConfigStore;
pub use engine::{
    ActivationEngine, CharacterOutcome, CharacterReport, CycleError, CycleReport, CycleStats,
    StrategyPolicy, Verdict,
};
pub use registry::{
    CharacterRegistry, Committed, MarkerUpload, RecalculationSummary, RegistryError,
    RegistryWarning,
};
pub use sensors::{FrameSource, RecordingSink, RenderSink, SensorSnapshot, StillSource};
pub use settings::{Settings, SettingsError};
