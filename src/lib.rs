//! Sentry camera pipeline.
//!
//! This crate implements a real-time capture -> inference -> event pipeline
//! for a single camera:
//!
//! 1. A capture thread pulls frames from a [`FrameSource`] and pushes them
//!    into a bounded, latest-wins [`FrameBuffer`]. The camera is never
//!    blocked by inference; stale frames are dropped, not queued.
//! 2. The inference loop pops frames, runs a [`DetectorBackend`] over each
//!    one, and feeds the per-frame detections to the [`EventTracker`].
//! 3. The tracker debounces noisy detections into discrete events. Event
//!    starts and ends drive the [`Recorder`] (clip segments on disk), the
//!    [`EventStore`] (queryable event log), and the [`Notifier`] (alerts).
//!
//! # Module Structure
//!
//! - `frame`: Frame type and the bounded latest-wins buffer
//! - `ingest`: Frame sources (V4L2 webcams, synthetic stubs)
//! - `detect`: Detector backends (ONNX via tract, scripted stubs)
//! - `track`: Detection-to-event state machine
//! - `record`: Per-event clip segments
//! - `storage`: Persisted event log
//! - `notify`: MQTT / local alert dispatch
//! - `pipeline`: Thread orchestration and shutdown

use anyhow::{anyhow, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod record;
pub mod storage;
pub mod track;

pub use detect::{
    BoundingBox, Detection, DetectionSet, DetectorBackend, ScriptedDetection, StubBackend,
};
pub use frame::{Frame, FrameBuffer, PopResult};
pub use ingest::{CameraKind, FrameSource, SourceStats, StubSource, WebcamSource};
pub use notify::{LogTransport, MemoryTransport, Notifier, NotifierConfig, NotifyTransport};
pub use pipeline::{CancelToken, Pipeline, PipelineConfig, PipelineStats};
pub use record::{Recorder, RecorderConfig};
pub use storage::{EventStore, InMemoryEventStore, SqliteEventStore};
pub use track::{EventTracker, TrackerConfig};

/// Wall-clock milliseconds since the Unix epoch.
///
/// Clock-before-epoch is treated as zero rather than an error; event
/// timestamps are informational, not load-bearing.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// -------------------- Events --------------------

/// Opaque event identifier, random and unique per event.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        EventId(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A contiguous, debounced period during which one object class was judged
/// present. Open while `ended_at_ms` is `None`; at most one open event
/// exists per label at any time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub label: String,
    /// Wall-clock ms when the event was confirmed.
    pub started_at_ms: u64,
    /// Wall-clock ms when the event closed; `None` while open.
    pub ended_at_ms: Option<u64>,
    /// Sequence number of the first frame that contributed a detection.
    pub first_seq: u64,
    /// Sequence number of the last frame that contributed a detection.
    pub last_seq: u64,
    pub peak_confidence: f32,
    /// Frame with the highest-confidence detection, used as the
    /// representative snapshot in notifications.
    pub representative_seq: u64,
}

/// Lifecycle signals emitted by the tracker for one processed frame.
#[derive(Clone, Debug)]
pub enum EventUpdate {
    Started(Event),
    Ended(Event),
}

// -------------------- Label Discipline --------------------

/// A conforming label is a short lowercase identifier from the detector's
/// label table, e.g. "person", "car", "traffic_light".
///
/// Allowed: lowercase letters, digits and underscores, starting with a letter.
pub fn validate_label(label: &str) -> Result<()> {
    // Compile once for hot paths.
    static LABEL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = LABEL_RE.get_or_init(|| regex::Regex::new(r"^[a-z][a-z0-9_]{0,31}$").unwrap());

    if !re.is_match(label) {
        return Err(anyhow!(
            "label must match ^[a-z][a-z0-9_]{{0,31}}$, got {:?}",
            label
        ));
    }
    Ok(())
}

// -------------------- Fatal Error Types --------------------

/// Frame source failure. Always fatal to the pipeline: without frames
/// there is nothing to detect, so the controller shuts down in the same
/// orderly fashion as an explicit cancellation.
#[derive(Clone, Debug)]
pub enum DeviceError {
    /// Device refused to open or vanished mid-stream.
    Disconnected(String),
    /// No frame arrived within the device timeout.
    Timeout(Duration),
    /// `next_frame` was called before `connect`.
    NotConnected,
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::Disconnected(msg) => write!(f, "camera disconnected: {}", msg),
            DeviceError::Timeout(after) => {
                write!(f, "no frame within {} ms", after.as_millis())
            }
            DeviceError::NotConnected => write!(f, "frame source is not connected"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Detection engine failure. Fatal: a missing model or an input shape
/// mismatch will recur on every frame, so the pipeline cannot continue.
#[derive(Clone, Debug)]
pub enum ModelError {
    /// Weights could not be loaded or the model failed to build.
    WeightsUnavailable(String),
    /// Frame dimensions do not match the model input.
    ShapeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// Pixel buffer length is inconsistent with the frame dimensions.
    InvalidInput(String),
    /// The model ran but produced an unusable result.
    Inference(String),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::WeightsUnavailable(msg) => write!(f, "model unavailable: {}", msg),
            ModelError::ShapeMismatch { expected, actual } => write!(
                f,
                "frame size {}x{} does not match model input {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
            ModelError::InvalidInput(msg) => write!(f, "invalid model input: {}", msg),
            ModelError::Inference(msg) => write!(f, "inference failed: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_unique_hex() {
        let a = EventId::generate();
        let b = EventId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn label_allowlist() {
        assert!(validate_label("person").is_ok());
        assert!(validate_label("traffic_light").is_ok());
        assert!(validate_label("dog2").is_ok());

        assert!(validate_label("").is_err());
        assert!(validate_label("Person").is_err());
        assert!(validate_label("person car").is_err());
        assert!(validate_label("2person").is_err());
        assert!(validate_label("zone:front").is_err());
    }

    #[test]
    fn event_round_trips_through_json() {
        let ev = Event {
            id: EventId::generate(),
            label: "person".to_string(),
            started_at_ms: 1_700_000_000_000,
            ended_at_ms: None,
            first_seq: 10,
            last_seq: 42,
            peak_confidence: 0.91,
            representative_seq: 17,
        };
        let json = serde_json::to_string(&ev).expect("serialize");
        let back: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, ev.id);
        assert_eq!(back.label, "person");
        assert_eq!(back.ended_at_ms, None);
        assert_eq!(back.representative_seq, 17);
    }
}
