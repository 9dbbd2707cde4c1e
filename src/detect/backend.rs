use crate::detect::result::DetectionSet;
use crate::ModelError;

/// Detector backend trait.
///
/// A backend wraps one loaded model instance and is driven from the
/// inference loop only: `detect` is never invoked concurrently with itself,
/// so implementations may keep mutable scratch state without locking.
///
/// The contract is a pure function from frame bytes to detections.
/// Swapping model families behind this trait must not require changes to
/// the tracker, recorder or notifier. Floating-point nondeterminism inside
/// the model is accepted noise, not a bug.
pub trait DetectorBackend: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Run detection on one frame of tightly packed RGB pixels.
    ///
    /// Fails with [`ModelError`] when the frame shape does not match the
    /// model input or the model cannot run; both are fatal to the caller
    /// since they will recur on every frame.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        frame_seq: u64,
    ) -> Result<DetectionSet, ModelError>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<(), ModelError> {
        Ok(())
    }
}
