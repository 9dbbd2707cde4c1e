/// Axis-aligned bounding box in pixel coordinates, top-left anchored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Intersection-over-union with another box, in [0, 1].
    ///
    /// Degenerate boxes (zero area on both sides) yield 0.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

/// One labeled, scored box produced by a detector backend.
///
/// Read-only after production; the tracker never mutates detections.
#[derive(Clone, Debug)]
pub struct Detection {
    /// Label from the backend's fixed label table.
    pub label: &'static str,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Sequence number of the frame this detection came from.
    pub frame_seq: u64,
}

impl Detection {
    pub fn new(label: &'static str, confidence: f32, bbox: BoundingBox, frame_seq: u64) -> Self {
        Self {
            label,
            confidence,
            bbox,
            frame_seq,
        }
    }
}

/// All detections for one frame, in backend output order. May be empty.
pub type DetectionSet = Vec<Detection>;
