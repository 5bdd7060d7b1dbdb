//! Per-frame detector run and strict per-character filtering.

use super::{Detection, ModelHandle, ModelStatus, ObjectGateConfig};
use crate::bbox::BBoxCollection;
use crate::frame::Frame;
use arcast_core::ObjectHit;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ObjectGate {
    model: ModelHandle,
    config: ObjectGateConfig,
    inferences: AtomicUsize,
}

impl ObjectGate {
    pub fn new(model: ModelHandle, config: ObjectGateConfig) -> Self {
        Self {
            model,
            config,
            inferences: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &ObjectGateConfig {
        &self.config
    }

    pub fn status(&self) -> ModelStatus {
        self.model.status()
    }

    /// Number of successful model invocations so far.
    pub fn inference_count(&self) -> usize {
        self.inferences.load(Ordering::Relaxed)
    }

    /// Run the model over the whole frame.
    ///
    /// An unavailable model or a failed inference yields an empty collection,
    /// which callers treat as "nothing detected".
    pub fn infer(&self, frame: &Frame) -> BBoxCollection {
        let model = match self.model.get() {
            Ok(model) => model,
            Err(unavailable) => {
                debug!(%unavailable, "skipping object detection");
                return BBoxCollection::new();
            }
        };

        let raw = match model.infer(frame) {
            Ok(raw) => raw,
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(model = model.name(), %reason, "inference failed");
                return BBoxCollection::new();
            }
        };
        self.inferences.fetch_add(1, Ordering::Relaxed);

        let (width, height) = (frame.width(), frame.height());
        let clipped: BBoxCollection = raw
            .into_iter()
            .filter(|b| b.confidence.is_finite())
            .map(|b| b.clipped(width, height))
            .filter(|b| b.area() > 0.0)
            .collect();

        let kept = clipped
            .apply_class_nms(self.config.nms_iou)
            .truncate(self.config.max_detections);
        debug!(detections = kept.len(), "object model ran");
        kept
    }

    /// Detections of exactly `target_class` with confidence at or above
    /// `threshold`, most confident first.
    pub fn filter(&self, raw: &BBoxCollection, target_class: &str, threshold: f64) -> Vec<Detection> {
        let mut matching = raw
            .clone()
            .filter_by_class(target_class)
            .filter_by_confidence(threshold);
        matching.sort_by_confidence();
        matching.into_iter().collect()
    }

    /// Infer and filter in one step.
    pub fn detect(&self, frame: &Frame, target_class: &str, threshold: f64) -> Vec<Detection> {
        self.filter(&self.infer(frame), target_class, threshold)
    }

    /// Pick one detection with the configured policy.
    pub fn select(&self, detections: &[Detection], frame_size: [u32; 2]) -> Option<ObjectHit> {
        self.config
            .selection
            .select(detections, frame_size)
            .map(|d| to_hit(d, frame_size))
    }
}

pub fn to_hit(detection: &Detection, frame_size: [u32; 2]) -> ObjectHit {
    ObjectHit {
        class: detection.class_id.clone(),
        confidence: detection.confidence,
        center_px: detection.center(),
        size_px: [detection.width, detection.height],
        frame_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::traits::ObjectModel;
    use image::GrayImage;
    use std::sync::Arc;

    struct Scripted(Vec<BBox>);

    impl ObjectModel for Scripted {
        fn infer(&self, _frame: &Frame) -> crate::Result<BBoxCollection> {
            Ok(BBoxCollection::from_vec(self.0.clone()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Failing;

    impl ObjectModel for Failing {
        fn infer(&self, _frame: &Frame) -> crate::Result<BBoxCollection> {
            anyhow::bail!("accelerator lost")
        }
    }

    fn gate(boxes: Vec<BBox>) -> ObjectGate {
        ObjectGate::new(
            ModelHandle::ready(Arc::new(Scripted(boxes))),
            ObjectGateConfig::default(),
        )
    }

    fn frame() -> Frame {
        Frame::from_gray(GrayImage::new(640, 480))
    }

    #[test]
    fn test_threshold_is_strict() {
        let below = gate(vec![BBox::new(10.0, 10.0, 50.0, 80.0, 0.42).with_class("bottle")]);
        assert!(below.detect(&frame(), "bottle", 0.5).is_empty());

        let above = gate(vec![BBox::new(10.0, 10.0, 50.0, 80.0, 0.51).with_class("bottle")]);
        let found = above.detect(&frame(), "bottle", 0.5);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence, 0.51);
    }

    #[test]
    fn test_other_classes_never_pass() {
        let gate = gate(vec![
            BBox::new(10.0, 10.0, 50.0, 80.0, 0.99).with_class("cup"),
            BBox::new(10.0, 10.0, 50.0, 80.0, 0.99).with_class("Bottle"),
            BBox::new(300.0, 10.0, 50.0, 80.0, 0.6).with_class("bottle"),
        ]);
        let found = gate.detect(&frame(), "bottle", 0.5);
        assert_eq!(found.len(), 1);
        assert!(found.iter().all(|d| d.class_id == "bottle" && d.confidence >= 0.5));
    }

    #[test]
    fn test_raw_output_is_suppressed_and_clipped() {
        let gate = gate(vec![
            BBox::new(100.0, 100.0, 50.0, 50.0, 0.9).with_class("bottle"),
            BBox::new(102.0, 102.0, 50.0, 50.0, 0.8).with_class("bottle"),
            BBox::new(620.0, 400.0, 100.0, 100.0, 0.7).with_class("bottle"),
            BBox::new(900.0, 900.0, 10.0, 10.0, 0.9).with_class("bottle"),
        ]);
        let raw = gate.infer(&frame());
        assert_eq!(raw.len(), 2);
        let edge = raw.iter().find(|b| b.confidence == 0.7).unwrap();
        assert_eq!((edge.width, edge.height), (20.0, 80.0));
        assert_eq!(gate.inference_count(), 1);
    }

    #[test]
    fn test_unavailable_model_yields_nothing() {
        let gate = ObjectGate::new(ModelHandle::unavailable("no weights"), ObjectGateConfig::default());
        assert!(gate.detect(&frame(), "bottle", 0.1).is_empty());
        assert_eq!(gate.inference_count(), 0);
        assert!(matches!(gate.status(), ModelStatus::Failed(_)));
    }

    #[test]
    fn test_inference_error_yields_nothing() {
        let gate = ObjectGate::new(ModelHandle::ready(Arc::new(Failing)), ObjectGateConfig::default());
        assert!(gate.infer(&frame()).is_empty());
        assert_eq!(gate.status(), ModelStatus::Ready);
    }

    #[test]
    fn test_select_builds_hit() {
        let gate = gate(vec![]);
        let detections = vec![
            BBox::new(100.0, 100.0, 40.0, 60.0, 0.6).with_class("cup"),
            BBox::new(10.0, 10.0, 20.0, 20.0, 0.9).with_class("cup"),
        ];
        let hit = gate.select(&detections, [640, 480]).unwrap();
        assert_eq!(hit.confidence, 0.9);
        assert_eq!(hit.center_px, [20.0, 20.0]);
        assert_eq!(hit.size_px, [20.0, 20.0]);
        assert_eq!(hit.frame_size, [640, 480]);
    }
}
