//! Object detection gating
//!
//! A learned detector runs once per frame behind a lazily loaded
//! [`ModelHandle`]; [`ObjectGate`] filters its output per character.

pub mod gate;

pub use gate::ObjectGate;

use crate::bbox::BBox;
use crate::traits::ObjectModel;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{info, warn};

/// A single detector output: class label, confidence and box.
pub type Detection = BBox;

/// Load state of the object model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    /// No load attempted yet
    Uninitialized,
    Ready,
    /// Load failed; never retried
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("object model '{model}' unavailable: {reason}")]
pub struct ModelUnavailable {
    pub model: String,
    pub reason: String,
}

type Loader = Box<dyn Fn() -> crate::Result<Arc<dyn ObjectModel>> + Send + Sync>;

/// Lazily initialized detector shared by every character and cycle.
///
/// The loader runs at most once, even under concurrent first use. Its
/// outcome is kept for the life of the handle, so a broken model costs one
/// failed load rather than one per frame.
pub struct ModelHandle {
    name: String,
    loader: Loader,
    cell: OnceLock<Result<Arc<dyn ObjectModel>, String>>,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl ModelHandle {
    pub fn new<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> crate::Result<Arc<dyn ObjectModel>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            loader: Box::new(loader),
            cell: OnceLock::new(),
        }
    }

    /// A handle around an already constructed model.
    pub fn ready(model: Arc<dyn ObjectModel>) -> Self {
        let name = model.name().to_string();
        let cell = OnceLock::new();
        let _ = cell.set(Ok(model));
        Self {
            name,
            loader: Box::new(|| Err(anyhow::anyhow!("model was provided preloaded"))),
            cell,
        }
    }

    /// A handle for deployments without an object model.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Err(reason.into()));
        Self {
            name: "none".to_string(),
            loader: Box::new(|| Err(anyhow::anyhow!("no object model configured"))),
            cell,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ModelStatus {
        match self.cell.get() {
            None => ModelStatus::Uninitialized,
            Some(Ok(_)) => ModelStatus::Ready,
            Some(Err(reason)) => ModelStatus::Failed(reason.clone()),
        }
    }

    /// The loaded model, loading it on first call.
    pub fn get(&self) -> Result<Arc<dyn ObjectModel>, ModelUnavailable> {
        let loaded = self.cell.get_or_init(|| match (self.loader)() {
            Ok(model) => {
                info!(model = %self.name, "object model loaded");
                Ok(model)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(model = %self.name, %reason, "object model failed to load");
                Err(reason)
            }
        });

        loaded.clone().map_err(|reason| ModelUnavailable {
            model: self.name.clone(),
            reason,
        })
    }
}

/// How one detection is chosen when several qualify.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    #[default]
    HighestConfidence,
    LargestArea,
    /// Nearest box center to the frame center
    ClosestToCenter,
}

impl SelectionPolicy {
    /// Orders `a` before `b` when `a` should win. Ties fall back to
    /// confidence, then area, then top-left position.
    fn compare(self, a: &Detection, b: &Detection, frame_size: [u32; 2]) -> Ordering {
        let center = [frame_size[0] as f64 / 2.0, frame_size[1] as f64 / 2.0];
        let distance = |d: &Detection| {
            let [x, y] = d.center();
            (x - center[0]).powi(2) + (y - center[1]).powi(2)
        };

        let primary = match self {
            SelectionPolicy::HighestConfidence => Ordering::Equal,
            SelectionPolicy::LargestArea => b.area().total_cmp(&a.area()),
            SelectionPolicy::ClosestToCenter => distance(a).total_cmp(&distance(b)),
        };

        primary
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| b.area().total_cmp(&a.area()))
            .then_with(|| a.y.total_cmp(&b.y))
            .then_with(|| a.x.total_cmp(&b.x))
    }

    pub fn select<'a>(&self, detections: &'a [Detection], frame_size: [u32; 2]) -> Option<&'a Detection> {
        detections
            .iter()
            .min_by(|a, b| self.compare(a, b, frame_size))
    }
}

/// Object gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectGateConfig {
    /// IoU above which same-class boxes are suppressed
    #[serde(default = "default_nms_iou")]
    pub nms_iou: f64,
    #[serde(default)]
    pub selection: SelectionPolicy,
    /// Raw detections kept per frame after NMS
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
}

fn default_nms_iou() -> f64 {
    0.45
}

fn default_max_detections() -> usize {
    100
}

impl Default for ObjectGateConfig {
    fn default() -> Self {
        Self {
            nms_iou: default_nms_iou(),
            selection: SelectionPolicy::default(),
            max_detections: default_max_detections(),
        }
    }
}
