//! Frame type and the bounded latest-wins frame buffer.
//!
//! The buffer is the only structure shared between the capture thread and
//! the inference loop. It decouples the camera's fixed frame rate from the
//! variable inference latency:
//!
//! - `push` never blocks. When the buffer is full the oldest frame is
//!   evicted; for real-time detection, staleness is worse than frame loss.
//! - `pop` blocks until a frame is available or the buffer is closed,
//!   in which case it returns [`PopResult::Cancelled`].
//!
//! Evictions are counted and surfaced as a metric, not an error.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// One captured frame. Tightly packed RGB, `width * height * 3` bytes.
///
/// A frame is exclusively owned by whichever stage currently holds it and
/// moves by value through the pipeline; it is never shared mutably.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Monotonic capture sequence number, starting at 1.
    pub seq: u64,
    /// Wall-clock capture time in ms since the Unix epoch.
    pub captured_at_ms: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(seq: u64, captured_at_ms: u64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            seq,
            captured_at_ms,
            width,
            height,
            pixels,
        }
    }

    /// Expected pixel buffer length for the frame dimensions.
    pub fn expected_len(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * 3
    }
}

/// Result of a blocking pop.
#[derive(Debug)]
pub enum PopResult {
    Frame(Frame),
    /// The buffer was closed and fully drained; no more frames will arrive.
    Cancelled,
}

struct BufferState {
    queue: VecDeque<Frame>,
    closed: bool,
    dropped: u64,
}

/// Bounded single-producer/single-consumer frame slot.
///
/// Holds at most `capacity` frames. A full push evicts the oldest frame,
/// so the consumer always sees the most recent `capacity` captures.
pub struct FrameBuffer {
    state: Mutex<BufferState>,
    available: Condvar,
    capacity: usize,
}

impl FrameBuffer {
    /// A capacity of zero is clamped to one; an unbounded buffer would turn
    /// inference lag into unbounded memory growth and detection delay.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                queue: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
                dropped: 0,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert a frame, evicting the oldest if full. Never blocks.
    ///
    /// Returns `true` when an older frame was dropped to make room.
    /// Pushes after `close` are discarded.
    pub fn push(&self, frame: Frame) -> bool {
        let mut state = self.state.lock().expect("frame buffer lock poisoned");
        if state.closed {
            return false;
        }
        let mut evicted = false;
        while state.queue.len() >= self.capacity {
            state.queue.pop_front();
            state.dropped += 1;
            evicted = true;
        }
        state.queue.push_back(frame);
        drop(state);
        self.available.notify_one();
        evicted
    }

    /// Block until a frame is available or the buffer is closed.
    ///
    /// Frames already queued at close time are still delivered; `Cancelled`
    /// is returned only once the queue is drained.
    pub fn pop(&self) -> PopResult {
        let mut state = self.state.lock().expect("frame buffer lock poisoned");
        loop {
            if let Some(frame) = state.queue.pop_front() {
                return PopResult::Frame(frame);
            }
            if state.closed {
                return PopResult::Cancelled;
            }
            state = self
                .available
                .wait(state)
                .expect("frame buffer lock poisoned");
        }
    }

    /// Signal the consumer that no more frames will arrive.
    ///
    /// Idempotent. Wakes any blocked `pop`.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("frame buffer lock poisoned");
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }

    /// Number of frames evicted by latest-wins pushes so far.
    pub fn dropped(&self) -> u64 {
        self.state.lock().expect("frame buffer lock poisoned").dropped
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("frame buffer lock poisoned")
            .queue
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
