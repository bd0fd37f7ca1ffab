//! Synthetic capture backend: a built-in test-pattern camera.
//!
//! Lets the driver run with no physical camera attached (development,
//! demos, end-to-end tests). Frames are a moving RGB gradient paced to
//! roughly 30 fps.

use std::thread;
use std::time::Duration;

use super::device::{CaptureBackend, DeviceInfo, Frame, FrameSource, Resolution};
use crate::recovery::PipelineError;

const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Backend that discovers one synthetic device and streams a test pattern.
pub struct SyntheticBackend {
    devices: Vec<DeviceInfo>,
    max_resolution: Resolution,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self {
            devices: vec![DeviceInfo {
                id: "synthetic-0".to_string(),
                name: "Synthetic Test Pattern".to_string(),
            }],
            max_resolution: Resolution::HIGH,
        }
    }
}

impl SyntheticBackend {
    /// Backend advertising the given devices (tests use this to model
    /// arbitrary discovery results).
    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices,
            max_resolution: Resolution::HIGH,
        }
    }

    /// Limit the resolution this backend claims to support.
    pub fn with_max_resolution(mut self, max: Resolution) -> Self {
        self.max_resolution = max;
        self
    }
}

impl CaptureBackend for SyntheticBackend {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, PipelineError> {
        Ok(self.devices.clone())
    }

    fn request_permission(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn supports(&self, _device: &DeviceInfo, resolution: Resolution) -> bool {
        resolution.width <= self.max_resolution.width
            && resolution.height <= self.max_resolution.height
    }

    fn open(
        &self,
        device: &DeviceInfo,
        resolution: Resolution,
    ) -> Result<Box<dyn FrameSource>, PipelineError> {
        if !self.devices.iter().any(|d| d.id == device.id) {
            return Err(PipelineError::DeviceNotFound(device.id.clone()));
        }
        if !self.supports(device, resolution) {
            return Err(PipelineError::ConfigurationFailed(format!(
                "synthetic source does not support {}",
                resolution
            )));
        }
        Ok(Box::new(SyntheticSource {
            resolution,
            tick: 0,
        }))
    }
}

struct SyntheticSource {
    resolution: Resolution,
    tick: u64,
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Frame, PipelineError> {
        thread::sleep(FRAME_INTERVAL);
        let mut frame = Frame::black(self.resolution.width, self.resolution.height);
        let (w, h) = (self.resolution.width as usize, self.resolution.height as usize);
        let phase = (self.tick % 256) as u8;
        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * Frame::BYTES_PER_PIXEL;
                frame.data[i] = (x * 255 / w.max(1)) as u8;
                frame.data[i + 1] = (y * 255 / h.max(1)) as u8;
                frame.data[i + 2] = phase;
            }
        }
        self.tick += 1;
        Ok(frame)
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }
}
