//! Frame ingestion sources.
//!
//! This module provides the camera-facing edge of the pipeline:
//! - `WebcamSource`: local V4L2 devices (feature: ingest-v4l2), with a
//!   synthetic fallback for `stub://` device paths
//! - `StubSource`: scripted source for tests and demos
//!
//! All sources produce owned [`Frame`]s that flow into the frame buffer.
//! The ingestion layer is responsible for:
//! - Stamping monotonic sequence numbers and capture timestamps
//! - Producing tightly packed RGB pixel data at the configured size
//!
//! Device-specific negotiation (resolution haggling, depth streams, sensor
//! options) stays behind `connect`; the pipeline only ever sees the
//! [`FrameSource`] contract.

mod stub;
mod webcam;

pub use stub::StubSource;
pub use webcam::{WebcamConfig, WebcamSource};

use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::DeviceError;

/// A camera device abstraction.
///
/// `next_frame` blocks up to a device-defined timeout and fails with
/// [`DeviceError`] on disconnect or timeout; both are fatal to the caller.
pub trait FrameSource: Send {
    /// Open the device and negotiate the stream. Must be called once
    /// before the first `next_frame`.
    fn connect(&mut self) -> Result<(), DeviceError>;

    /// Capture the next frame, blocking until one is available.
    fn next_frame(&mut self) -> Result<Frame, DeviceError>;

    /// Whether the source has produced a frame recently enough.
    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Per-source capture statistics.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Camera device kind, selected on the command line or in the config file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraKind {
    /// Synthetic frames, no hardware.
    Stub,
    /// Generic UVC webcam via V4L2.
    Webcam,
    /// Intel RealSense; the RGB stream is captured through the UVC/V4L2
    /// node the device exposes, so it shares the webcam path.
    RealSense,
}

impl std::str::FromStr for CameraKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stub" => Ok(CameraKind::Stub),
            "webcam" => Ok(CameraKind::Webcam),
            "realsense" => Ok(CameraKind::RealSense),
            other => Err(anyhow!(
                "unknown camera kind {:?} (expected stub, webcam or realsense)",
                other
            )),
        }
    }
}

impl std::fmt::Display for CameraKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CameraKind::Stub => "stub",
            CameraKind::Webcam => "webcam",
            CameraKind::RealSense => "realsense",
        };
        f.write_str(name)
    }
}

/// Build a frame source for the configured camera kind.
pub fn open_source(
    kind: CameraKind,
    device: &str,
    target_fps: u32,
    width: u32,
    height: u32,
) -> Result<Box<dyn FrameSource>> {
    let config = WebcamConfig {
        device: device.to_string(),
        target_fps,
        width,
        height,
    };
    match kind {
        CameraKind::Stub => {
            if !device.starts_with("stub://") {
                return Err(anyhow!(
                    "stub camera requires a stub:// device path, got {:?}",
                    device
                ));
            }
            Ok(Box::new(WebcamSource::new(config)?))
        }
        CameraKind::Webcam => Ok(Box::new(WebcamSource::new(config)?)),
        CameraKind::RealSense => {
            log::info!(
                "realsense capture reads the RGB UVC node at {}; depth streams are not used",
                device
            );
            Ok(Box::new(WebcamSource::new(config)?))
        }
    }
}

/// Generate synthetic pixel data for stub sources.
///
/// Simulates a scene with occasional changes: most frames repeat a static
/// pattern; every 50th frame the pattern shifts, like an object entering.
pub(crate) fn synthetic_pixels(width: u32, height: u32, frame_count: u64, scene_state: u8) -> Vec<u8> {
    let pixel_count = Frame::expected_len(width, height);
    let mut pixels = vec![0u8; pixel_count];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + frame_count + scene_state as u64) % 256) as u8;
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_kind_parses_known_values() {
        assert_eq!("stub".parse::<CameraKind>().unwrap(), CameraKind::Stub);
        assert_eq!("webcam".parse::<CameraKind>().unwrap(), CameraKind::Webcam);
        assert_eq!(
            "realsense".parse::<CameraKind>().unwrap(),
            CameraKind::RealSense
        );
        assert!("firewire".parse::<CameraKind>().is_err());
    }

    #[test]
    fn stub_kind_rejects_real_device_paths() {
        assert!(open_source(CameraKind::Stub, "/dev/video0", 10, 64, 64).is_err());
        assert!(open_source(CameraKind::Stub, "stub://camera", 10, 64, 64).is_ok());
    }

    #[test]
    fn synthetic_frames_have_expected_size() {
        let pixels = synthetic_pixels(64, 48, 1, 0);
        assert_eq!(pixels.len(), 64 * 48 * 3);
    }
}
