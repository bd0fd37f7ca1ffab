//! Capture devices, frames and the backend seam.
//!
//! Discovery and frame delivery sit behind [`CaptureBackend`] so the session
//! manager can be driven by the real ffmpeg/AVFoundation backend in
//! production and by a synthetic backend in tests. Devices are matched by
//! stable identifier only; display names are for humans.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::process::{Child, Command, Stdio};

use crate::recovery::PipelineError;

/// Stable id of the virtual camera this system itself exposes. Selecting it
/// as an input would feed the camera its own output.
pub const VIRTUAL_DEVICE_ID: &str = "camstage-virtual";

/// A discoverable capture device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Stable identifier used for all matching.
    pub id: String,
    /// Human-readable name, display only.
    pub name: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id, self.name)
    }
}

impl DeviceInfo {
    /// True if this is our own virtual camera (excluded from selection).
    pub fn is_self(&self) -> bool {
        self.id == VIRTUAL_DEVICE_ID
    }
}

/// Capture resolution preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// 640x480, the safe fallback.
    pub const LOW: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    /// 1280x720, the default primary preset.
    pub const MEDIUM: Resolution = Resolution {
        width: 1280,
        height: 720,
    };

    /// 1920x1080.
    pub const HIGH: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };

    pub fn aspect(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A captured RGB24 frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data, 3 bytes per pixel, row-major.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub const BYTES_PER_PIXEL: usize = 3;

    /// A zeroed (black) frame of the given size.
    pub fn black(width: u32, height: u32) -> Self {
        Frame {
            data: vec![0; width as usize * height as usize * Self::BYTES_PER_PIXEL],
            width,
            height,
        }
    }
}

/// Source of live frames for an open capture session. Dropping the source
/// tears the underlying stream down and invalidates any in-flight reads.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, PipelineError>;
    fn resolution(&self) -> Resolution;
}

/// Device discovery plus session opening, pluggable per platform and test.
pub trait CaptureBackend: Send + Sync {
    /// Enumerate capture devices. Called rarely; the session manager caches.
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, PipelineError>;

    /// Blocking permission check/request for camera access.
    fn request_permission(&self) -> Result<(), PipelineError>;

    /// Whether `device` can deliver `resolution` natively.
    fn supports(&self, device: &DeviceInfo, resolution: Resolution) -> bool;

    /// Open a stream from `device` at `resolution`.
    fn open(
        &self,
        device: &DeviceInfo,
        resolution: Resolution,
    ) -> Result<Box<dyn FrameSource>, PipelineError>;
}

/// Real backend: device discovery and raw-frame capture through an ffmpeg
/// subprocess (AVFoundation on macOS).
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// Input format passed to ffmpeg.
    const INPUT_FORMAT: &'static str = "avfoundation";

    fn list_output(&self) -> Result<String, PipelineError> {
        let output = Command::new("ffmpeg")
            .args(["-f", Self::INPUT_FORMAT, "-list_devices", "true", "-i", ""])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                PipelineError::ConfigurationFailed(format!("failed to run ffmpeg: {}", e))
            })?;
        // ffmpeg prints the device list to stderr.
        Ok(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

impl CaptureBackend for FfmpegBackend {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, PipelineError> {
        Ok(parse_video_devices(&self.list_output()?))
    }

    fn request_permission(&self) -> Result<(), PipelineError> {
        let stderr = self.list_output()?;
        if stderr.contains("not authorized")
            || stderr.contains("Permission denied")
            || stderr.contains("denied")
        {
            return Err(PipelineError::PermissionDenied);
        }
        Ok(())
    }

    fn supports(&self, _device: &DeviceInfo, resolution: Resolution) -> bool {
        // AVFoundation negotiates/scales; anything up to 1080p is deliverable.
        resolution.width <= Resolution::HIGH.width && resolution.height <= Resolution::HIGH.height
    }

    fn open(
        &self,
        device: &DeviceInfo,
        resolution: Resolution,
    ) -> Result<Box<dyn FrameSource>, PipelineError> {
        let size = format!("{}x{}", resolution.width, resolution.height);
        let child = Command::new("ffmpeg")
            .args([
                "-f",
                Self::INPUT_FORMAT,
                "-framerate",
                "30",
                "-video_size",
                &size,
                "-i",
                &device.id,
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PipelineError::ConfigurationFailed("ffmpeg not found".to_string())
                } else {
                    PipelineError::ConfigurationFailed(format!("failed to spawn ffmpeg: {}", e))
                }
            })?;

        Ok(Box::new(FfmpegSource { child, resolution }))
    }
}

/// Raw-frame reader over an ffmpeg child process.
struct FfmpegSource {
    child: Child,
    resolution: Resolution,
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Frame, PipelineError> {
        let mut frame = Frame::black(self.resolution.width, self.resolution.height);
        let stdout = self.child.stdout.as_mut().ok_or_else(|| {
            PipelineError::SessionInterrupted("capture pipe closed".to_string())
        })?;
        stdout
            .read_exact(&mut frame.data)
            .map_err(|e| PipelineError::SessionInterrupted(format!("capture read failed: {}", e)))?;
        Ok(frame)
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Parse ffmpeg's device-list stderr into video devices.
///
/// Lines look like `[AVFoundation indev @ 0x...] [0] FaceTime HD Camera`;
/// the section header splits video from audio devices. Only video devices
/// matter here, and the bracketed index becomes the stable id.
pub fn parse_video_devices(stderr: &str) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();
    let mut in_video_section = false;

    for line in stderr.lines() {
        if line.contains("video devices:") {
            in_video_section = true;
            continue;
        }
        if line.contains("audio devices:") {
            in_video_section = false;
            continue;
        }
        if !in_video_section {
            continue;
        }
        if let Some(device) = parse_device_line(line) {
            devices.push(device);
        }
    }

    devices
}

fn parse_device_line(line: &str) -> Option<DeviceInfo> {
    let bracket_idx = line.find("] [")?;
    let after = &line[bracket_idx + 3..];
    let close = after.find(']')?;
    let id = after[..close].trim();
    // Numeric index only; anything else is not a device entry.
    id.parse::<usize>().ok()?;
    let name = after[close + 1..].trim_start_matches(' ').trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some(DeviceInfo {
        id: id.to_string(),
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_line_valid() {
        let device =
            parse_device_line("[AVFoundation indev @ 0x12345678] [0] FaceTime HD Camera").unwrap();
        assert_eq!(device.id, "0");
        assert_eq!(device.name, "FaceTime HD Camera");
    }

    #[test]
    fn test_parse_device_line_rejects_noise() {
        assert!(parse_device_line("random log line").is_none());
        assert!(parse_device_line("[indev] [x] Not a device index").is_none());
    }

    #[test]
    fn test_parse_video_devices_skips_audio_section() {
        let stderr = r#"
[AVFoundation indev @ 0x123] AVFoundation video devices:
[AVFoundation indev @ 0x123] [0] FaceTime HD Camera
[AVFoundation indev @ 0x123] [1] External USB Camera
[AVFoundation indev @ 0x123] AVFoundation audio devices:
[AVFoundation indev @ 0x123] [0] MacBook Pro Microphone
"#;
        let devices = parse_video_devices(stderr);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "FaceTime HD Camera");
        assert_eq!(devices[1].id, "1");
    }

    #[test]
    fn test_is_self() {
        let own = DeviceInfo {
            id: VIRTUAL_DEVICE_ID.to_string(),
            name: "Camstage Camera".to_string(),
        };
        let other = DeviceInfo {
            id: "0".to_string(),
            name: "FaceTime HD Camera".to_string(),
        };
        assert!(own.is_self());
        assert!(!other.is_self());
    }

    #[test]
    fn test_resolution_presets_and_aspect() {
        assert_eq!(Resolution::default(), Resolution::MEDIUM);
        assert_eq!(Resolution::HIGH.to_string(), "1920x1080");
        assert!((Resolution::MEDIUM.aspect() - 16.0 / 9.0).abs() < 1e-9);
        assert!((Resolution::LOW.aspect() - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_black_frame_size() {
        let frame = Frame::black(4, 2);
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        assert!(frame.data.iter().all(|&b| b == 0));
    }
}
