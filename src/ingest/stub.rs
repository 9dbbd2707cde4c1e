//! Scripted stub frame source.
//!
//! Produces synthetic frames without hardware, with an optional frame
//! limit. Used by integration tests to drive the pipeline deterministically
//! and by demo runs that need a camera-free daemon.

use crate::frame::Frame;
use crate::ingest::{synthetic_pixels, FrameSource, SourceStats};
use crate::pipeline::CancelToken;
use crate::{now_ms, DeviceError};

pub struct StubSource {
    width: u32,
    height: u32,
    frame_count: u64,
    limit: Option<u64>,
    cancel_on_last: Option<CancelToken>,
    scene_state: u8,
    connected: bool,
}

impl StubSource {
    /// Unlimited synthetic source.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
            limit: None,
            cancel_on_last: None,
            scene_state: 0,
            connected: false,
        }
    }

    /// Stop after `limit` frames. Without a cancel token, the frame after
    /// the last one fails with a device error, exercising the fatal path.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Cancel the given token when the last scripted frame is produced,
    /// so a capture loop that checks the token between frames shuts down
    /// cleanly instead of hitting the post-limit device error.
    pub fn cancel_when_exhausted(mut self, token: CancelToken) -> Self {
        self.cancel_on_last = Some(token);
        self
    }
}

impl FrameSource for StubSource {
    fn connect(&mut self) -> Result<(), DeviceError> {
        self.connected = true;
        log::info!("StubSource: connected ({}x{})", self.width, self.height);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        if let Some(limit) = self.limit {
            if self.frame_count >= limit {
                return Err(DeviceError::Disconnected(
                    "stub source exhausted".to_string(),
                ));
            }
        }

        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let pixels = synthetic_pixels(self.width, self.height, self.frame_count, self.scene_state);
        let frame = Frame::new(self.frame_count, now_ms(), self.width, self.height, pixels);

        if Some(self.frame_count) == self.limit {
            if let Some(token) = &self.cancel_on_last {
                token.cancel();
            }
        }

        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        match self.limit {
            Some(limit) => self.frame_count < limit,
            None => true,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: "stub://scripted".to_string(),
        }
    }
}
