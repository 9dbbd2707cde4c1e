mod backend;
mod backends;
mod labels;
mod result;

pub use backend::DetectorBackend;
pub use backends::stub::ScriptedDetection;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::{label_for_class, DEFAULT_LABELS};
pub use result::{BoundingBox, Detection, DetectionSet};
