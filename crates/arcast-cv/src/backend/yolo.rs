//! YOLO (v8 export layout) through OpenCV's dnn module.

use super::rgb_to_mat;
use crate::bbox::{BBox, BBoxCollection};
use crate::frame::Frame;
use crate::traits::ObjectModel;
use anyhow::{Context, bail};
use opencv::core::{CV_32F, Mat, Scalar, Size};
use opencv::dnn::{self, Net};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoloConfig {
    /// ONNX model file
    pub model_path: PathBuf,
    /// Class labels in model output order
    pub labels: Vec<String>,
    #[serde(default = "default_input_size")]
    pub input_size: i32,
    /// Raw scores below this are dropped before NMS
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

fn default_input_size() -> i32 {
    640
}

fn default_min_score() -> f32 {
    0.1
}

/// A YOLO network; rows of the output are `[cx, cy, w, h, class scores...]`
/// in input-image pixels.
pub struct OpenCvYoloModel {
    net: Mutex<Net>,
    config: YoloConfig,
}

impl OpenCvYoloModel {
    pub fn load(config: YoloConfig) -> crate::Result<Self> {
        let path = config.model_path.to_string_lossy().to_string();
        let net = dnn::read_net_from_onnx(&path)
            .with_context(|| format!("Failed to load ONNX model: {path}"))?;
        if net.empty()? {
            bail!("ONNX model {path} has no layers");
        }
        Ok(Self {
            net: Mutex::new(net),
            config,
        })
    }

    fn decode(&self, output: &Mat, frame_w: f64, frame_h: f64) -> crate::Result<BBoxCollection> {
        let data = output.data_typed::<f32>()?;
        let rows = 4 + self.config.labels.len();
        if rows == 4 || data.len() % rows != 0 {
            bail!("unexpected output size {} for {} labels", data.len(), self.config.labels.len());
        }
        let anchors = data.len() / rows;
        let sx = frame_w / self.config.input_size as f64;
        let sy = frame_h / self.config.input_size as f64;

        let mut boxes = BBoxCollection::new();
        for i in 0..anchors {
            let at = |row: usize| data[row * anchors + i];
            let (class, score) = (0..self.config.labels.len())
                .map(|c| (c, at(4 + c)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap_or((0, 0.0));
            if score < self.config.min_score {
                continue;
            }
            boxes.push(
                BBox::from_center(
                    at(0) as f64 * sx,
                    at(1) as f64 * sy,
                    at(2) as f64 * sx,
                    at(3) as f64 * sy,
                    score as f64,
                )
                .with_class(self.config.labels[class].clone()),
            );
        }
        Ok(boxes)
    }
}

impl ObjectModel for OpenCvYoloModel {
    fn infer(&self, frame: &Frame) -> crate::Result<BBoxCollection> {
        let input = rgb_to_mat(frame.rgb())?;
        let side = self.config.input_size;
        // Frame data is already RGB, so no channel swap.
        let blob = dnn::blob_from_image(
            &input,
            1.0 / 255.0,
            Size::new(side, side),
            Scalar::default(),
            false,
            false,
            CV_32F,
        )?;

        let output = {
            let mut net = self
                .net
                .lock()
                .map_err(|_| anyhow::anyhow!("model lock poisoned"))?;
            net.set_input(&blob, "", 1.0, Scalar::default())?;
            net.forward_single("")?
        };

        self.decode(&output, frame.width() as f64, frame.height() as f64)
    }

    fn name(&self) -> &str {
        "opencv-yolo"
    }
}
