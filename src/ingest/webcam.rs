//! Webcam frame source.
//!
//! `WebcamSource` captures frames from a local V4L2 device node
//! (e.g. /dev/video0) when built with the `ingest-v4l2` feature, and falls
//! back to a synthetic generator for `stub://` device paths so the rest of
//! the pipeline can run without hardware.

use crate::frame::Frame;
use crate::ingest::{synthetic_pixels, FrameSource, SourceStats};
use crate::{now_ms, DeviceError};

/// Configuration for a webcam source.
#[derive(Clone, Debug)]
pub struct WebcamConfig {
    /// Device path (e.g. "/dev/video0") or "stub://..." for synthetic frames.
    pub device: String,
    /// Target frame rate requested from the device. Zero means "whatever
    /// the device delivers"; pacing happens in the capture loop.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            device: "stub://front_camera".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Webcam frame source.
///
/// Uses V4L2 for real devices, with a synthetic fallback for `stub://`
/// paths.
pub struct WebcamSource {
    backend: WebcamBackend,
}

enum WebcamBackend {
    Synthetic(SyntheticWebcam),
    #[cfg(feature = "ingest-v4l2")]
    Device(device::V4l2Webcam),
}

impl WebcamSource {
    pub fn new(config: WebcamConfig) -> anyhow::Result<Self> {
        if config.device.starts_with("stub://") {
            Ok(Self {
                backend: WebcamBackend::Synthetic(SyntheticWebcam::new(config)),
            })
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                Ok(Self {
                    backend: WebcamBackend::Device(device::V4l2Webcam::new(config)),
                })
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                anyhow::bail!("webcam capture requires the ingest-v4l2 feature")
            }
        }
    }
}

impl FrameSource for WebcamSource {
    fn connect(&mut self) -> Result<(), DeviceError> {
        match &mut self.backend {
            WebcamBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        match &mut self.backend {
            WebcamBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(source) => source.next_frame(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            WebcamBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            WebcamBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(source) => source.stats(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for hardware-free runs
// ----------------------------------------------------------------------------

struct SyntheticWebcam {
    config: WebcamConfig,
    frame_count: u64,
    /// Simulated "scene" state; shifts occasionally to look like motion.
    scene_state: u8,
}

impl SyntheticWebcam {
    fn new(config: WebcamConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn connect(&mut self) -> Result<(), DeviceError> {
        log::info!(
            "WebcamSource: connected to {} (synthetic)",
            self.config.device
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let pixels = synthetic_pixels(
            self.config.width,
            self.config.height,
            self.frame_count,
            self.scene_state,
        );
        Ok(Frame::new(
            self.frame_count,
            now_ms(),
            self.config.width,
            self.config.height,
            pixels,
        ))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production V4L2 source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
mod device {
    use ouroboros::self_referencing;
    use std::time::{Duration, Instant};

    use super::WebcamConfig;
    use crate::frame::Frame;
    use crate::ingest::SourceStats;
    use crate::{now_ms, DeviceError};

    pub(super) struct V4l2Webcam {
        config: WebcamConfig,
        state: Option<V4l2State>,
        frame_count: u64,
        last_frame_at: Option<Instant>,
        last_error: Option<String>,
        active_width: u32,
        active_height: u32,
    }

    #[self_referencing]
    struct V4l2State {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl V4l2Webcam {
        pub(super) fn new(config: WebcamConfig) -> Self {
            Self {
                active_width: config.width,
                active_height: config.height,
                config,
                state: None,
                frame_count: 0,
                last_frame_at: None,
                last_error: None,
            }
        }

        pub(super) fn connect(&mut self) -> Result<(), DeviceError> {
            use v4l::buffer::Type;
            use v4l::video::Capture;

            let mut device = v4l::Device::with_path(&self.config.device).map_err(|err| {
                DeviceError::Disconnected(format!(
                    "open v4l2 device {}: {}",
                    self.config.device, err
                ))
            })?;
            let mut format = device
                .format()
                .map_err(|err| DeviceError::Disconnected(format!("read v4l2 format: {}", err)))?;
            format.width = self.config.width;
            format.height = self.config.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");

            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!(
                        "WebcamSource: failed to set format on {}: {}",
                        self.config.device,
                        err
                    );
                    device.format().map_err(|err| {
                        DeviceError::Disconnected(format!(
                            "read v4l2 format after set failure: {}",
                            err
                        ))
                    })?
                }
            };

            if self.config.target_fps > 0 {
                let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
                if let Err(err) = device.set_params(&params) {
                    log::warn!(
                        "WebcamSource: failed to set fps on {}: {}",
                        self.config.device,
                        err
                    );
                }
            }

            self.active_width = format.width;
            self.active_height = format.height;
            self.last_error = None;

            let state = V4l2StateTryBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                },
            }
            .try_build()
            .map_err(|err| {
                let msg = format!("create v4l2 buffer stream: {}", err);
                self.last_error = Some(msg.clone());
                DeviceError::Disconnected(msg)
            })?;
            self.state = Some(state);

            log::info!(
                "WebcamSource: connected to {} ({}x{})",
                self.config.device,
                self.active_width,
                self.active_height
            );
            Ok(())
        }

        pub(super) fn next_frame(&mut self) -> Result<Frame, DeviceError> {
            use v4l::io::traits::CaptureStream;

            let Some(state) = self.state.as_mut() else {
                return Err(DeviceError::NotConnected);
            };
            let pixels = state
                .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
                .map_err(|err| {
                    let msg = format!("capture v4l2 frame: {}", err);
                    self.last_error = Some(msg.clone());
                    DeviceError::Disconnected(msg)
                })?;

            self.frame_count += 1;
            self.last_frame_at = Some(Instant::now());

            Ok(Frame::new(
                self.frame_count,
                now_ms(),
                self.active_width,
                self.active_height,
                pixels,
            ))
        }

        pub(super) fn is_healthy(&self) -> bool {
            if self.last_error.is_some() {
                return false;
            }
            let Some(last_frame_at) = self.last_frame_at else {
                return true;
            };
            last_frame_at.elapsed() <= self.health_grace()
        }

        pub(super) fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.frame_count,
                device: self.config.device.clone(),
            }
        }

        fn health_grace(&self) -> Duration {
            let base_ms = if self.config.target_fps == 0 {
                2_000
            } else {
                (1000 / self.config.target_fps).saturating_mul(6)
            };
            Duration::from_millis(base_ms.max(2_000) as u64)
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
