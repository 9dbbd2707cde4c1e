//! Fixed label table for detection backends.
//!
//! Class indices produced by a model map through this table; detections
//! whose index falls outside it are discarded at the backend boundary, so
//! everything downstream only ever sees labels from the fixed set.

/// COCO label set in training order, multi-word names underscored so every
/// entry passes [`crate::validate_label`].
pub const DEFAULT_LABELS: &[&str] = &[
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic_light",
    "fire_hydrant",
    "stop_sign",
    "parking_meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports_ball",
    "kite",
    "baseball_bat",
    "baseball_glove",
    "skateboard",
    "surfboard",
    "tennis_racket",
    "bottle",
    "wine_glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot_dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted_plant",
    "bed",
    "dining_table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell_phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy_bear",
    "hair_drier",
    "toothbrush",
];

/// Label for a model class index, or `None` for out-of-table indices.
pub fn label_for_class(index: usize) -> Option<&'static str> {
    DEFAULT_LABELS.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate_label;

    #[test]
    fn every_label_passes_the_allowlist() {
        for label in DEFAULT_LABELS {
            validate_label(label).unwrap_or_else(|e| panic!("{}: {}", label, e));
        }
    }

    #[test]
    fn class_index_lookup() {
        assert_eq!(label_for_class(0), Some("person"));
        assert_eq!(label_for_class(2), Some("car"));
        assert_eq!(label_for_class(79), Some("toothbrush"));
        assert_eq!(label_for_class(80), None);
    }
}
