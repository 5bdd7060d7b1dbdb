//! Detector output boxes and the suppression/filter passes the object gate
//! runs over them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A labelled, scored box in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    pub class_id: String,
}

impl BBox {
    /// Unlabelled box with its top-left corner at `(x, y)`.
    pub fn new(x: f64, y: f64, width: f64, height: f64, confidence: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            class_id: String::new(),
        }
    }

    /// Build from center and size, the layout most detectors emit.
    pub fn from_center(cx: f64, cy: f64, width: f64, height: f64, confidence: f64) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height, confidence)
    }

    pub fn with_class(mut self, class_id: impl Into<String>) -> Self {
        self.class_id = class_id.into();
        self
    }

    /// Zero for boxes with negative extent.
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> [f64; 2] {
        [self.x + self.width / 2.0, self.y + self.height / 2.0]
    }

    /// Intersection over union; disjoint or degenerate pairs give 0.
    pub fn iou(&self, other: &BBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union <= 0.0 { 0.0 } else { intersection / union }
    }

    /// IoU strictly above `threshold`.
    pub fn overlaps(&self, other: &BBox, threshold: f64) -> bool {
        self.iou(other) > threshold
    }

    /// Clip to a `width` x `height` frame. Boxes entirely outside end up empty.
    pub fn clipped(&self, width: u32, height: u32) -> Self {
        let x1 = self.x.clamp(0.0, width as f64);
        let y1 = self.y.clamp(0.0, height as f64);
        let x2 = (self.x + self.width).clamp(0.0, width as f64);
        let y2 = (self.y + self.height).clamp(0.0, height as f64);
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            ..self.clone()
        }
    }
}

/// Boxes from one inference, consumed by value through each pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BBoxCollection {
    boxes: Vec<BBox>,
}

impl BBoxCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(boxes: Vec<BBox>) -> Self {
        Self { boxes }
    }

    pub fn push(&mut self, bbox: BBox) {
        self.boxes.push(bbox);
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Most confident first. The sort is stable, so equal scores keep
    /// their input order.
    pub fn sort_by_confidence(&mut self) {
        self.boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    }

    /// Keep the `n` most confident boxes.
    pub fn truncate(mut self, n: usize) -> Self {
        self.sort_by_confidence();
        self.boxes.truncate(n);
        self
    }

    /// Keep boxes scoring at or above `threshold`.
    pub fn filter_by_confidence(mut self, threshold: f64) -> Self {
        self.boxes.retain(|bbox| bbox.confidence >= threshold);
        self
    }

    /// Keep boxes whose label equals `class_id` exactly.
    pub fn filter_by_class(mut self, class_id: &str) -> Self {
        self.boxes.retain(|bbox| bbox.class_id == class_id);
        self
    }

    /// Greedy suppression: a box survives unless a more confident survivor
    /// overlaps it by more than `threshold` IoU.
    pub fn apply_nms(mut self, threshold: f64) -> Self {
        if self.boxes.is_empty() {
            return self;
        }

        self.sort_by_confidence();

        let mut keep = Vec::new();
        let mut suppressed = vec![false; self.boxes.len()];

        for i in 0..self.boxes.len() {
            if suppressed[i] {
                continue;
            }

            keep.push(self.boxes[i].clone());

            for j in (i + 1)..self.boxes.len() {
                if !suppressed[j] && self.boxes[i].overlaps(&self.boxes[j], threshold) {
                    suppressed[j] = true;
                }
            }
        }

        Self::from_vec(keep)
    }

    /// Suppression within each label only; overlapping boxes of different
    /// labels all survive.
    pub fn apply_class_nms(self, threshold: f64) -> Self {
        let mut by_class: BTreeMap<String, Vec<BBox>> = BTreeMap::new();
        for bbox in self.boxes {
            by_class.entry(bbox.class_id.clone()).or_default().push(bbox);
        }

        let mut collection: Self = by_class
            .into_values()
            .flat_map(|boxes| BBoxCollection::from_vec(boxes).apply_nms(threshold))
            .collect();
        collection.sort_by_confidence();
        collection
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BBox> {
        self.boxes.iter()
    }
}

impl IntoIterator for BBoxCollection {
    type Item = BBox;
    type IntoIter = std::vec::IntoIter<BBox>;

    fn into_iter(self) -> Self::IntoIter {
        self.boxes.into_iter()
    }
}

impl FromIterator<BBox> for BBoxCollection {
    fn from_iter<T: IntoIterator<Item = BBox>>(iter: T) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}
