#![cfg(feature = "backend-tract")]

use std::path::Path;

use sha2::{Digest, Sha256};
use tract_onnx::prelude::*;

use crate::detect::labels::label_for_class;
use crate::detect::result::{BoundingBox, Detection, DetectionSet};
use crate::detect::DetectorBackend;
use crate::ModelError;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for ONNX object detection.
///
/// Loads a local model file with a fixed `1x3xHxW` input and decodes
/// YOLO-style output rows (`cx cy w h objectness class-scores...`) into
/// labeled pixel-space boxes. No network I/O, no writes beyond model load.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    weights_digest: String,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self, ModelError> {
        let model_path = model_path.as_ref();
        let weights = std::fs::read(model_path).map_err(|e| {
            ModelError::WeightsUnavailable(format!("read {}: {}", model_path.display(), e))
        })?;
        let weights_digest = hex::encode(Sha256::digest(&weights));

        let model = tract_onnx::onnx()
            .model_for_read(&mut &weights[..])
            .map_err(|e| {
                ModelError::WeightsUnavailable(format!(
                    "load {}: {}",
                    model_path.display(),
                    e
                ))
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .map_err(|e| ModelError::WeightsUnavailable(format!("set input fact: {}", e)))?
            .into_optimized()
            .map_err(|e| ModelError::WeightsUnavailable(format!("optimize model: {}", e)))?
            .into_runnable()
            .map_err(|e| ModelError::WeightsUnavailable(format!("build runnable model: {}", e)))?;

        log::info!(
            "loaded ONNX model {} ({}x{} input, sha256 {})",
            model_path.display(),
            width,
            height,
            weights_digest
        );

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            weights_digest,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// SHA-256 of the loaded weights file, hex encoded.
    pub fn weights_digest(&self) -> &str {
        &self.weights_digest
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor, ModelError> {
        if width != self.width || height != self.height {
            return Err(ModelError::ShapeMismatch {
                expected: (self.width, self.height),
                actual: (width, height),
            });
        }

        let expected_len = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected_len {
            return Err(ModelError::InvalidInput(format!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            )));
        }

        let width = width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn decode_output(&self, outputs: TVec<TValue>, frame_seq: u64) -> Result<DetectionSet, ModelError> {
        let output = outputs
            .first()
            .ok_or_else(|| ModelError::Inference("model produced no outputs".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| ModelError::Inference(format!("output tensor was not f32: {}", e)))?;

        // Accept [1, rows, cols] or [rows, cols]; cols = 4 box + 1 obj + classes.
        let shape = view.shape().to_vec();
        let (batched, rows, cols) = match shape.as_slice() {
            [1, rows, cols] => (true, *rows, *cols),
            [rows, cols] => (false, *rows, *cols),
            other => {
                return Err(ModelError::Inference(format!(
                    "unexpected output shape {:?}",
                    other
                )))
            }
        };
        if cols < 6 {
            return Err(ModelError::Inference(format!(
                "output rows too short ({} columns)",
                cols
            )));
        }

        let at = |row: usize, col: usize| -> f32 {
            if batched {
                view[[0, row, col]]
            } else {
                view[[row, col]]
            }
        };

        let mut candidates: Vec<Detection> = Vec::new();
        for row in 0..rows {
            let objectness = at(row, 4);
            if objectness < self.confidence_threshold {
                continue;
            }

            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for class in 0..(cols - 5) {
                let score = at(row, 5 + class);
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }

            let confidence = (objectness * best_score).clamp(0.0, 1.0);
            if confidence < self.confidence_threshold {
                continue;
            }
            let Some(label) = label_for_class(best_class) else {
                continue;
            };

            let cx = at(row, 0);
            let cy = at(row, 1);
            let w = at(row, 2);
            let h = at(row, 3);
            let bbox = BoundingBox::new(
                (cx - w / 2.0).max(0.0),
                (cy - h / 2.0).max(0.0),
                w.min(self.width as f32),
                h.min(self.height as f32),
            );

            candidates.push(Detection::new(label, confidence, bbox, frame_seq));
        }

        Ok(suppress_overlaps(candidates))
    }
}

/// Greedy per-label non-maximum suppression.
fn suppress_overlaps(mut candidates: Vec<Detection>) -> Vec<Detection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.label == candidate.label && k.bbox.iou(&candidate.bbox) > NMS_IOU_THRESHOLD
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        frame_seq: u64,
    ) -> Result<DetectionSet, ModelError> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| ModelError::Inference(format!("ONNX inference failed: {}", e)))?;
        self.decode_output(outputs, frame_seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &'static str, confidence: f32, x: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(x, 0.0, 10.0, 10.0), 1)
    }

    #[test]
    fn suppression_keeps_the_strongest_overlap() {
        let kept = suppress_overlaps(vec![
            det("person", 0.6, 0.0),
            det("person", 0.9, 1.0),
            det("person", 0.7, 100.0),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn suppression_is_per_label() {
        let kept = suppress_overlaps(vec![det("person", 0.9, 0.0), det("dog", 0.8, 0.0)]);
        assert_eq!(kept.len(), 2);
    }
}
