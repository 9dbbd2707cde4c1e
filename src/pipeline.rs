//! Pipeline orchestration.
//!
//! Two long-lived threads share exactly one structure, the frame buffer:
//!
//! - the capture thread runs `FrameSource::next_frame` in a paced loop and
//!   pushes into the buffer, never waiting on inference;
//! - the inference loop (the thread that called [`Pipeline::run`]) pops
//!   frames, runs detection, feeds the tracker, and applies recorder,
//!   store and notifier side effects for each frame before pulling the
//!   next one.
//!
//! All tracker, recorder and store state is touched only from the
//! inference loop, so no locking exists beyond the buffer's own.
//!
//! Cancellation is a single token passed into both sides, set once. The
//! capture thread observes it between frames and closes the buffer on the
//! way out; the inference loop drains, flushes open events through their
//! `EventEnded`, finalizes recordings, and joins the capture thread.
//! Fatal device and model errors trigger the same orderly shutdown before
//! being propagated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::detect::DetectorBackend;
use crate::frame::{FrameBuffer, PopResult};
use crate::ingest::FrameSource;
use crate::notify::Notifier;
use crate::record::Recorder;
use crate::storage::EventStore;
use crate::track::EventTracker;
use crate::{now_ms, DeviceError, EventUpdate, ModelError};

/// Shared cancellation signal, set once.
///
/// Passed explicitly into everything that blocks; there is no ambient
/// global shutdown state.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Frame buffer capacity; small keeps detection lag bounded.
    pub buffer_capacity: usize,
    /// Capture pacing; zero disables pacing and captures flat out.
    pub target_fps: u32,
    pub health_log_interval: Duration,
    /// Event log retention window.
    pub retention: Duration,
    pub retention_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 2,
            target_fps: 10,
            health_log_interval: Duration::from_secs(5),
            retention: Duration::from_secs(60 * 60 * 24 * 7),
            retention_interval: Duration::from_secs(60),
        }
    }
}

/// Counters accumulated over one pipeline run.
#[derive(Clone, Debug, Default)]
pub struct PipelineStats {
    pub frames_captured: u64,
    /// Frames evicted from the buffer under load; expected, not an error.
    pub frames_dropped: u64,
    pub frames_inferred: u64,
    pub events_started: u64,
    pub events_ended: u64,
    pub recording_failures: u64,
    pub notification_failures: u64,
}

/// Owns the capture thread and the inference loop.
pub struct Pipeline {
    config: PipelineConfig,
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    tracker: EventTracker,
    recorder: Recorder,
    store: Box<dyn EventStore>,
    notifier: Notifier,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        tracker: EventTracker,
        recorder: Recorder,
        store: Box<dyn EventStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            config,
            source,
            detector,
            tracker,
            recorder,
            store,
            notifier,
        }
    }

    /// Run until the token is cancelled or a fatal error occurs.
    ///
    /// Shutdown is two-phase either way: signal, then join. Open events are
    /// flushed through `EventEnded` and open segments finalized before this
    /// returns, including on the error paths.
    pub fn run(self, cancel: CancelToken) -> Result<PipelineStats> {
        let Pipeline {
            config,
            mut source,
            mut detector,
            mut tracker,
            mut recorder,
            mut store,
            mut notifier,
        } = self;

        source
            .connect()
            .context("connect frame source")?;
        detector.warm_up().context("warm up detector")?;
        log::info!(
            "pipeline starting: detector={} buffer={} fps={}",
            detector.name(),
            config.buffer_capacity,
            config.target_fps
        );

        let buffer = Arc::new(FrameBuffer::with_capacity(config.buffer_capacity));
        let device_failure: Arc<Mutex<Option<DeviceError>>> = Arc::new(Mutex::new(None));

        let capture = {
            let buffer = buffer.clone();
            let cancel = cancel.clone();
            let device_failure = device_failure.clone();
            let target_fps = config.target_fps;
            thread::Builder::new()
                .name("capture".to_string())
                .spawn(move || capture_loop(source, buffer, cancel, device_failure, target_fps))
                .context("spawn capture thread")?
        };

        let mut stats = PipelineStats::default();
        let mut model_failure: Option<ModelError> = None;
        let mut last_health = Instant::now();
        let mut last_prune = Instant::now();

        loop {
            let frame = match buffer.pop() {
                PopResult::Frame(frame) => frame,
                PopResult::Cancelled => break,
            };

            let detections =
                match detector.detect(&frame.pixels, frame.width, frame.height, frame.seq) {
                    Ok(detections) => detections,
                    Err(e) => {
                        log::error!("fatal inference failure: {}", e);
                        model_failure = Some(e);
                        cancel.cancel();
                        break;
                    }
                };
            stats.frames_inferred += 1;

            let updates = tracker.observe(frame.seq, frame.captured_at_ms, &detections);
            apply_updates(
                &updates,
                &mut stats,
                &mut recorder,
                &mut *store,
                &mut notifier,
            );
            recorder.append_frame(&frame);

            if last_health.elapsed() >= config.health_log_interval {
                log::info!(
                    "pipeline health: inferred={} dropped={} open_events={} open_segments={}",
                    stats.frames_inferred,
                    buffer.dropped(),
                    tracker.open_event_count(),
                    recorder.open_segments()
                );
                last_health = Instant::now();
            }

            if last_prune.elapsed() >= config.retention_interval {
                if let Err(e) = store.enforce_retention(config.retention) {
                    log::warn!("event log retention failed: {:#}", e);
                }
                last_prune = Instant::now();
            }
        }

        // Flush: every open event gets its EventEnded and a finalized
        // segment, even when we are shutting down on an error.
        let flush_ms = now_ms();
        let updates = tracker.flush(flush_ms);
        apply_updates(
            &updates,
            &mut stats,
            &mut recorder,
            &mut *store,
            &mut notifier,
        );
        recorder.finalize_all(flush_ms);
        notifier.shutdown();

        stats.frames_captured = capture.join().unwrap_or_else(|_| {
            log::error!("capture thread panicked");
            0
        });
        stats.frames_dropped = buffer.dropped();
        stats.recording_failures = recorder.failures();
        stats.notification_failures = notifier.failures();

        log::info!(
            "pipeline stopped: captured={} inferred={} dropped={} events={}/{}",
            stats.frames_captured,
            stats.frames_inferred,
            stats.frames_dropped,
            stats.events_started,
            stats.events_ended
        );

        if let Some(e) = model_failure {
            return Err(e).context("detection engine failed");
        }
        let device_failure = device_failure
            .lock()
            .expect("device failure lock poisoned")
            .take();
        if let Some(e) = device_failure {
            return Err(e).context("frame source failed");
        }
        Ok(stats)
    }
}

fn apply_updates(
    updates: &[EventUpdate],
    stats: &mut PipelineStats,
    recorder: &mut Recorder,
    store: &mut dyn EventStore,
    notifier: &mut Notifier,
) {
    for update in updates {
        match update {
            EventUpdate::Started(event) => {
                stats.events_started += 1;
                log::info!(
                    "event started: {} {} (confidence {:.2})",
                    event.label,
                    event.id,
                    event.peak_confidence
                );
                recorder.on_event_started(event);
                let segment = recorder.segment_dir(&event.id).map(|p| p.to_path_buf());
                notifier.event_started(event, segment.as_deref());
            }
            EventUpdate::Ended(event) => {
                stats.events_ended += 1;
                log::info!("event ended: {} {}", event.label, event.id);
                recorder.on_event_ended(event);
                if let Err(e) = store.append_event(event) {
                    log::warn!("event log append failed for {}: {:#}", event.id, e);
                }
            }
        }
    }
}

/// Capture loop: pace to the target frame rate, push into the buffer,
/// observe the token between frames. A device failure is recorded and
/// triggers the same shutdown path as cancellation. Always closes the
/// buffer on exit so the inference loop unblocks.
fn capture_loop(
    mut source: Box<dyn FrameSource>,
    buffer: Arc<FrameBuffer>,
    cancel: CancelToken,
    device_failure: Arc<Mutex<Option<DeviceError>>>,
    target_fps: u32,
) -> u64 {
    let interval = if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(1) / target_fps
    };
    let mut captured = 0u64;
    let mut last_frame = Instant::now()
        .checked_sub(interval)
        .unwrap_or_else(Instant::now);

    while !cancel.is_cancelled() {
        let elapsed = last_frame.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
        last_frame = Instant::now();

        match source.next_frame() {
            Ok(frame) => {
                captured += 1;
                buffer.push(frame);
            }
            Err(e) => {
                log::error!("fatal capture failure: {}", e);
                *device_failure.lock().expect("device failure lock poisoned") = Some(e);
                cancel.cancel();
                break;
            }
        }
    }

    if captured > 0 && !source.is_healthy() {
        log::warn!("frame source unhealthy at shutdown: {:?}", source.stats());
    }
    buffer.close();
    captured
}
