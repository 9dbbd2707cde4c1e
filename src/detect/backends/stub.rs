use std::collections::VecDeque;

use crate::detect::result::{BoundingBox, Detection, DetectionSet};
use crate::detect::DetectorBackend;
use crate::ModelError;

/// A scripted detection for the stub backend.
#[derive(Clone, Debug)]
pub struct ScriptedDetection {
    pub label: &'static str,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl ScriptedDetection {
    pub fn new(label: &'static str, confidence: f32) -> Self {
        Self {
            label,
            confidence,
            bbox: BoundingBox::new(100.0, 100.0, 50.0, 80.0),
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = bbox;
        self
    }
}

/// Stub backend for testing and model-free demo runs.
///
/// Plays back a script of per-call detection sets in order; once the script
/// is exhausted every further call yields an empty set. An empty script
/// means "never detect anything".
pub struct StubBackend {
    script: VecDeque<Vec<ScriptedDetection>>,
    expected: Option<(u32, u32)>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            expected: None,
            calls: 0,
        }
    }

    /// Queue one detection set per upcoming `detect` call.
    pub fn scripted(script: Vec<Vec<ScriptedDetection>>) -> Self {
        Self {
            script: script.into(),
            expected: None,
            calls: 0,
        }
    }

    /// Enforce an input shape, mirroring a real model's fixed input.
    pub fn with_expected_shape(mut self, width: u32, height: u32) -> Self {
        self.expected = Some((width, height));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        frame_seq: u64,
    ) -> Result<DetectionSet, ModelError> {
        if let Some(expected) = self.expected {
            if (width, height) != expected {
                return Err(ModelError::ShapeMismatch {
                    expected,
                    actual: (width, height),
                });
            }
        }
        let expected_len = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected_len {
            return Err(ModelError::InvalidInput(format!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            )));
        }

        self.calls += 1;
        let step = self.script.pop_front().unwrap_or_default();
        Ok(step
            .into_iter()
            .map(|s| Detection::new(s.label, s.confidence, s.bbox, frame_seq))
            .collect())
    }
}
