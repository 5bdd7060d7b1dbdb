//! Sensor input and render output
//!
//! The capture loop and the renderer live outside the engine. A
//! [`FrameSource`] hands over one synchronized snapshot per cycle and a
//! [`RenderSink`] receives the verdicts.

use crate::engine::Verdict;
use arcast_core::{DeviceFix, DeviceOrientation};
use arcast_cv::Frame;

/// Camera frame and device pose, synchronized to one cycle.
#[derive(Debug, Clone)]
pub struct SensorSnapshot {
    pub frame: Frame,
    pub fix: DeviceFix,
    pub orientation: DeviceOrientation,
}

impl SensorSnapshot {
    pub fn new(frame: Frame, fix: DeviceFix, orientation: DeviceOrientation) -> Self {
        Self {
            frame,
            fix,
            orientation,
        }
    }
}

pub trait FrameSource {
    /// The next snapshot. An error skips the cycle.
    fn capture(&mut self) -> anyhow::Result<SensorSnapshot>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> anyhow::Result<SensorSnapshot>,
{
    fn capture(&mut self) -> anyhow::Result<SensorSnapshot> {
        self()
    }
}

/// Replays the same snapshot every cycle.
#[derive(Debug, Clone)]
pub struct StillSource(pub SensorSnapshot);

impl FrameSource for StillSource {
    fn capture(&mut self) -> anyhow::Result<SensorSnapshot> {
        Ok(self.0.clone())
    }
}

pub trait RenderSink {
    fn submit(&mut self, verdicts: &[Verdict]);
}

/// Keeps every submitted cycle in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub cycles: Vec<Vec<Verdict>>,
}

impl RenderSink for RecordingSink {
    fn submit(&mut self, verdicts: &[Verdict]) {
        self.cycles.push(verdicts.to_vec());
    }
}
