//! End-to-end pipeline runs against scripted sources and detectors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use sentrycam::notify::{MemoryTransport, NotifierConfig};
use sentrycam::{
    CancelToken, Event, EventStore, EventTracker, InMemoryEventStore, Notifier, Pipeline,
    PipelineConfig, Recorder, RecorderConfig, ScriptedDetection, StubBackend, StubSource,
    TrackerConfig,
};

/// Store handle the test can still read after the pipeline takes ownership.
#[derive(Clone, Default)]
struct SharedStore {
    inner: Arc<Mutex<InMemoryEventStore>>,
}

impl SharedStore {
    fn events(&self) -> Vec<Event> {
        self.inner
            .lock()
            .expect("store lock")
            .list_events(100)
            .expect("list events")
    }
}

impl EventStore for SharedStore {
    fn append_event(&mut self, ev: &Event) -> Result<()> {
        self.inner.lock().expect("store lock").append_event(ev)
    }

    fn list_events(&mut self, limit: usize) -> Result<Vec<Event>> {
        self.inner.lock().expect("store lock").list_events(limit)
    }

    fn enforce_retention(&mut self, retention: Duration) -> Result<()> {
        self.inner
            .lock()
            .expect("store lock")
            .enforce_retention(retention)
    }
}

fn tracker_config() -> TrackerConfig {
    TrackerConfig {
        detect_threshold: 0.5,
        confirm_frames: 3,
        miss_tolerance: 2,
        cooldown_frames: 2,
        iou_threshold: 0.1,
    }
}

fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        // Roomy buffer and no pacing: every scripted frame is inferred,
        // which keeps the detector script aligned with frame numbers.
        buffer_capacity: 64,
        target_fps: 0,
        ..PipelineConfig::default()
    }
}

struct Harness {
    pipeline: Pipeline,
    cancel: CancelToken,
    store: SharedStore,
    transport: MemoryTransport,
    clip_dir: tempfile::TempDir,
}

/// Build a pipeline over `frames` stub frames with one scripted detection
/// set per frame. The source cancels the token after the last frame, so
/// `run` returns cleanly.
fn harness(frames: u64, script: Vec<Vec<ScriptedDetection>>) -> Harness {
    let clip_dir = tempfile::tempdir().expect("tempdir");
    let cancel = CancelToken::new();
    let store = SharedStore::default();
    let transport = MemoryTransport::new();

    let source = StubSource::new(16, 16)
        .with_limit(frames)
        .cancel_when_exhausted(cancel.clone());
    let detector = StubBackend::scripted(script);
    let recorder = Recorder::new(RecorderConfig {
        output_dir: clip_dir.path().to_path_buf(),
        jpeg_quality: 85,
    })
    .expect("recorder");
    let notifier = Notifier::new(
        NotifierConfig {
            retry_backoff: Duration::ZERO,
            ..NotifierConfig::default()
        },
        Box::new(transport.clone()),
    );

    let pipeline = Pipeline::new(
        pipeline_config(),
        Box::new(source),
        Box::new(detector),
        EventTracker::new(tracker_config()),
        recorder,
        Box::new(store.clone()),
        notifier,
    );

    Harness {
        pipeline,
        cancel,
        store,
        transport,
        clip_dir,
    }
}

fn person(confidence: f32) -> Vec<ScriptedDetection> {
    vec![ScriptedDetection::new("person", confidence)]
}

#[test]
fn detections_become_one_recorded_event() {
    // Person visible on frames 1-5, gone afterwards. With confirm 3,
    // tolerance 2 and cooldown 2 the event starts on frame 3 and ends on
    // frame 9, well before the 12-frame run is over.
    let mut script: Vec<Vec<ScriptedDetection>> = Vec::new();
    for _ in 0..5 {
        script.push(person(0.9));
    }
    for _ in 5..12 {
        script.push(vec![]);
    }

    let h = harness(12, script);
    let stats = h.pipeline.run(h.cancel.clone()).expect("pipeline run");

    assert_eq!(stats.frames_captured, 12);
    assert_eq!(stats.frames_inferred, 12);
    assert_eq!(stats.frames_dropped, 0);
    assert_eq!(stats.events_started, 1);
    assert_eq!(stats.events_ended, 1);
    assert_eq!(stats.recording_failures, 0);
    assert_eq!(stats.notification_failures, 0);

    // Exactly one event in the log, closed by the tracker, not the flush.
    let events = h.store.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.label, "person");
    assert!(event.ended_at_ms.is_some());
    assert_eq!(event.first_seq, 1);
    assert_eq!(event.last_seq, 5);

    // One alert, published to the label topic and the firehose.
    let messages = h.transport.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].0, "sentry/event/person");

    // One finalized segment: frames from confirmation (3) until the end
    // budget ran out (8), plus the manifest.
    let segment = h.clip_dir.path().join(format!("person_{}", event.id));
    assert!(segment.join("manifest.json").is_file());
    for seq in 3..=8 {
        assert!(
            segment.join(format!("frame_{:06}.jpg", seq)).is_file(),
            "missing frame {}",
            seq
        );
    }
    assert!(!segment.join("frame_000002.jpg").exists());
    assert!(!segment.join("frame_000009.jpg").exists());
}

#[test]
fn cancellation_flushes_the_open_event() {
    // Person visible on every frame; the event is still open when the
    // source cancels the run after frame 6.
    let script = (0..6).map(|_| person(0.9)).collect();
    let h = harness(6, script);
    let stats = h.pipeline.run(h.cancel.clone()).expect("pipeline run");

    assert_eq!(stats.events_started, 1);
    // Exactly one EventEnded is emitted during shutdown.
    assert_eq!(stats.events_ended, 1);

    let events = h.store.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].ended_at_ms.is_some(), "flush closes the event");

    // The interrupted segment is finalized, not discarded.
    let segment = h.clip_dir.path().join(format!("person_{}", events[0].id));
    assert!(segment.join("manifest.json").is_file());
    let manifest: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(segment.join("manifest.json")).expect("manifest"),
    )
    .expect("manifest json");
    assert_eq!(manifest["event"]["label"], "person");
    assert!(manifest["frames_written"].as_u64().unwrap() >= 1);
}

#[test]
fn flicker_below_confirmation_records_nothing() {
    // hit, miss, hit, miss... never reaches three consecutive hits.
    let mut script: Vec<Vec<ScriptedDetection>> = Vec::new();
    for i in 0..10 {
        if i % 2 == 0 {
            script.push(person(0.9));
        } else {
            script.push(vec![]);
        }
    }

    let h = harness(10, script);
    let stats = h.pipeline.run(h.cancel.clone()).expect("pipeline run");

    assert_eq!(stats.events_started, 0);
    assert_eq!(stats.events_ended, 0);
    assert!(h.store.events().is_empty());
    assert!(h.transport.messages().is_empty());
    // No segments were created.
    assert_eq!(
        std::fs::read_dir(h.clip_dir.path()).expect("read dir").count(),
        0
    );
}
