//! Detection-to-event state machine.
//!
//! Raw per-frame detections are noisy: a real object flickers in and out as
//! the model misfires, and a one-frame false positive is indistinguishable
//! from a real arrival. The tracker turns that stream into stable events by
//! debouncing both edges:
//!
//! - an object must be seen for `confirm_frames` consecutive frames before
//!   an event starts (a single miss cancels an unconfirmed candidate), and
//! - a confirmed event survives `miss_tolerance` misses and then a
//!   `cooldown_frames` grace window before it ends, so short occlusions do
//!   not split one presence into many short events.
//!
//! Tracking is keyed per object class, not per instance: simultaneous
//! same-class objects coalesce into one logical event, and at most one
//! event per label is open at any time.
//!
//! All state here is mutated from the inference loop only; the tracker
//! needs no internal locking.

use std::collections::BTreeMap;

use crate::detect::{BoundingBox, Detection};
use crate::{Event, EventId, EventUpdate};

/// Debounce and matching thresholds.
#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    /// Minimum confidence for a detection to count at all.
    pub detect_threshold: f32,
    /// Consecutive hits required before an event starts.
    pub confirm_frames: u32,
    /// Misses a confirmed event absorbs before it starts cooling.
    pub miss_tolerance: u32,
    /// Further misses absorbed while cooling before the event ends.
    pub cooldown_frames: u32,
    /// Minimum overlap for a detection to match a tracked object.
    pub iou_threshold: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            detect_threshold: 0.5,
            confirm_frames: 3,
            miss_tolerance: 10,
            cooldown_frames: 10,
            iou_threshold: 0.1,
        }
    }
}

/// Lifecycle of a tracked object. "Absent" is represented by the object
/// not existing at all; eviction is the transition back to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrackState {
    /// Seen but not yet confirmed. A single miss cancels the candidate.
    Pending,
    /// Confirmed, event open.
    Active,
    /// Grace window after too many misses, event still open.
    Cooling,
}

struct TrackedObject {
    state: TrackState,
    hits: u32,
    /// Consecutive misses, counted across Active and Cooling.
    misses: u32,
    bbox: BoundingBox,
    first_seq: u64,
    last_seq: u64,
    peak_confidence: f32,
    representative_seq: u64,
    /// Present once the object is confirmed.
    event: Option<Event>,
}

impl TrackedObject {
    fn new(det: &Detection) -> Self {
        Self {
            state: TrackState::Pending,
            hits: 1,
            misses: 0,
            bbox: det.bbox,
            first_seq: det.frame_seq,
            last_seq: det.frame_seq,
            peak_confidence: det.confidence,
            representative_seq: det.frame_seq,
            event: None,
        }
    }

    fn close_event(&mut self, ended_at_ms: u64) -> Option<Event> {
        let mut event = self.event.take()?;
        event.ended_at_ms = Some(ended_at_ms);
        event.last_seq = self.last_seq;
        event.peak_confidence = self.peak_confidence;
        event.representative_seq = self.representative_seq;
        Some(event)
    }
}

/// Per-class event state machines.
///
/// Must be fed frames in strictly increasing sequence order; the single
/// inference consumer guarantees that.
pub struct EventTracker {
    config: TrackerConfig,
    objects: BTreeMap<String, TrackedObject>,
}

impl EventTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            objects: BTreeMap::new(),
        }
    }

    /// Number of currently open events (confirmed objects).
    pub fn open_event_count(&self) -> usize {
        self.objects
            .values()
            .filter(|o| o.event.is_some())
            .count()
    }

    /// Process one frame's detections and return the lifecycle signals
    /// this frame produced.
    pub fn observe(
        &mut self,
        frame_seq: u64,
        timestamp_ms: u64,
        detections: &[Detection],
    ) -> Vec<EventUpdate> {
        let mut updates = Vec::new();
        let cfg = self.config;

        let candidates: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.confidence >= cfg.detect_threshold)
            .collect();

        // Pass 1: resolve each tracked object to a hit or a miss.
        let mut evict: Vec<String> = Vec::new();
        for (label, obj) in self.objects.iter_mut() {
            let matched = candidates
                .iter()
                .filter(|d| d.label == label.as_str() && d.bbox.iou(&obj.bbox) >= cfg.iou_threshold)
                .max_by(|a, b| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });

            match matched {
                Some(det) => {
                    obj.last_seq = frame_seq;
                    obj.bbox = det.bbox;
                    if det.confidence > obj.peak_confidence {
                        obj.peak_confidence = det.confidence;
                        obj.representative_seq = frame_seq;
                    }
                    match obj.state {
                        TrackState::Pending => {
                            obj.hits += 1;
                            if obj.hits >= cfg.confirm_frames {
                                updates.push(confirm(label, obj, frame_seq, timestamp_ms));
                            }
                        }
                        TrackState::Active => {
                            obj.misses = 0;
                        }
                        TrackState::Cooling => {
                            log::debug!("{}: resumed during cooldown", label);
                            obj.state = TrackState::Active;
                            obj.misses = 0;
                        }
                    }
                }
                None => match obj.state {
                    // An unconfirmed candidate does not survive a miss.
                    TrackState::Pending => evict.push(label.clone()),
                    TrackState::Active => {
                        obj.misses += 1;
                        if obj.misses >= cfg.miss_tolerance {
                            log::debug!("{}: cooling after {} misses", label, obj.misses);
                            obj.state = TrackState::Cooling;
                        }
                    }
                    TrackState::Cooling => {
                        obj.misses += 1;
                        let budget = cfg.miss_tolerance + cfg.cooldown_frames;
                        if obj.misses >= budget {
                            if let Some(event) = obj.close_event(timestamp_ms) {
                                log::debug!("{}: event {} ended", label, event.id);
                                updates.push(EventUpdate::Ended(event));
                            }
                            evict.push(label.clone());
                        }
                    }
                },
            }
        }
        for label in evict {
            self.objects.remove(&label);
        }

        // Pass 2: detections for labels with no tracked object seed new
        // candidates, strongest detection per label.
        let mut fresh: BTreeMap<&str, &Detection> = BTreeMap::new();
        for &det in &candidates {
            if self.objects.contains_key(det.label) {
                continue;
            }
            match fresh.get(det.label) {
                Some(existing) if existing.confidence >= det.confidence => {}
                _ => {
                    fresh.insert(det.label, det);
                }
            }
        }
        for (label, det) in fresh {
            let mut obj = TrackedObject::new(det);
            if obj.hits >= cfg.confirm_frames {
                updates.push(confirm(label, &mut obj, frame_seq, timestamp_ms));
            }
            self.objects.insert(label.to_string(), obj);
        }

        updates
    }

    /// Force-close all open events, e.g. on cancellation or a fatal device
    /// failure. Unconfirmed candidates are discarded silently.
    pub fn flush(&mut self, timestamp_ms: u64) -> Vec<EventUpdate> {
        let mut updates = Vec::new();
        for (label, obj) in self.objects.iter_mut() {
            if let Some(event) = obj.close_event(timestamp_ms) {
                log::debug!("{}: event {} flushed", label, event.id);
                updates.push(EventUpdate::Ended(event));
            }
        }
        self.objects.clear();
        updates
    }
}

fn confirm(
    label: &str,
    obj: &mut TrackedObject,
    frame_seq: u64,
    timestamp_ms: u64,
) -> EventUpdate {
    obj.state = TrackState::Active;
    obj.misses = 0;
    let event = Event {
        id: EventId::generate(),
        label: label.to_string(),
        started_at_ms: timestamp_ms,
        ended_at_ms: None,
        first_seq: obj.first_seq,
        last_seq: frame_seq,
        peak_confidence: obj.peak_confidence,
        representative_seq: obj.representative_seq,
    };
    log::debug!(
        "{}: event {} started (confirmed over {} frames)",
        label,
        event.id,
        obj.hits
    );
    obj.event = Some(event.clone());
    EventUpdate::Started(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;

    fn config() -> TrackerConfig {
        TrackerConfig {
            detect_threshold: 0.5,
            confirm_frames: 3,
            miss_tolerance: 2,
            cooldown_frames: 2,
            iou_threshold: 0.1,
        }
    }

    fn det(label: &'static str, confidence: f32, seq: u64) -> Detection {
        Detection::new(
            label,
            confidence,
            BoundingBox::new(100.0, 100.0, 50.0, 80.0),
            seq,
        )
    }

    fn det_at(label: &'static str, confidence: f32, seq: u64, x: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(x, 100.0, 50.0, 80.0), seq)
    }

    /// Drive the tracker with one optional detection per frame and collect
    /// every update. `None` entries are frames without the object.
    fn drive(tracker: &mut EventTracker, script: &[Option<f32>]) -> Vec<EventUpdate> {
        drive_from(tracker, 1, script)
    }

    fn drive_from(
        tracker: &mut EventTracker,
        start_seq: u64,
        script: &[Option<f32>],
    ) -> Vec<EventUpdate> {
        let mut updates = Vec::new();
        for (i, entry) in script.iter().enumerate() {
            let seq = start_seq + i as u64;
            let detections: Vec<Detection> =
                entry.iter().map(|c| det("person", *c, seq)).collect();
            updates.extend(tracker.observe(seq, seq * 1000, &detections));
        }
        updates
    }

    fn started(updates: &[EventUpdate]) -> Vec<&Event> {
        updates
            .iter()
            .filter_map(|u| match u {
                EventUpdate::Started(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn ended(updates: &[EventUpdate]) -> Vec<&Event> {
        updates
            .iter()
            .filter_map(|u| match u {
                EventUpdate::Ended(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn single_frame_blip_never_starts_an_event() {
        let mut tracker = EventTracker::new(config());
        let updates = drive(&mut tracker, &[Some(0.9), None]);
        assert!(updates.is_empty());
    }

    #[test]
    fn alternating_hits_and_misses_never_confirm() {
        // hit, miss, hit, miss, hit: never 3 consecutive hits.
        let mut tracker = EventTracker::new(config());
        let updates = drive(
            &mut tracker,
            &[Some(0.8), None, Some(0.8), None, Some(0.8)],
        );
        assert!(updates.is_empty());
    }

    #[test]
    fn below_threshold_detections_are_ignored() {
        let mut tracker = EventTracker::new(config());
        let updates = drive(&mut tracker, &[Some(0.4), Some(0.4), Some(0.4), Some(0.4)]);
        assert!(updates.is_empty());
    }

    #[test]
    fn three_consecutive_hits_start_exactly_one_event() {
        let mut tracker = EventTracker::new(config());
        let updates = drive(
            &mut tracker,
            &[Some(0.6), Some(0.6), Some(0.6), Some(0.6), Some(0.6)],
        );
        let started = started(&updates);
        assert_eq!(started.len(), 1);
        assert!(ended(&updates).is_empty());
        // Confirmed on the third frame.
        assert_eq!(started[0].last_seq, 3);
        assert_eq!(started[0].first_seq, 1);
        assert_eq!(started[0].started_at_ms, 3000);
        assert_eq!(tracker.open_event_count(), 1);
    }

    #[test]
    fn event_ends_after_miss_tolerance_plus_cooldown() {
        let mut tracker = EventTracker::new(config());
        // 3 hits confirm; then 4 misses: 2 tolerated in Active, 2 cooling.
        let updates = drive(
            &mut tracker,
            &[Some(0.6), Some(0.6), Some(0.6), None, None, None, None],
        );
        assert_eq!(started(&updates).len(), 1);
        let ended = ended(&updates);
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].id, started(&updates)[0].id);
        // Ended on frame 7, the fourth consecutive miss.
        assert_eq!(ended[0].ended_at_ms, Some(7000));
        // The last detection was on frame 3.
        assert_eq!(ended[0].last_seq, 3);
        assert_eq!(tracker.open_event_count(), 0);
    }

    #[test]
    fn short_gap_does_not_split_an_event() {
        // The documented scenario: threshold 0.5, confirm 3, tolerance 2,
        // cooldown 2. Hits at 0.6 on frames 1-3, misses on 4-5 (cooling
        // after the second), detection resumes at 0.7 on frame 6.
        let mut tracker = EventTracker::new(config());
        let updates = drive(
            &mut tracker,
            &[Some(0.6), Some(0.6), Some(0.6), None, None, Some(0.7)],
        );
        assert_eq!(started(&updates).len(), 1, "no second EventStarted");
        assert!(ended(&updates).is_empty(), "gap shorter than the budget");

        let first_id = started(&updates)[0].id.clone();

        // Close it out and confirm it is still the same event.
        let tail = drive_from(&mut tracker, 7, &[None, None, None, None]);
        let closed = ended(&tail);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, first_id);
        assert_eq!(closed[0].peak_confidence, 0.7);
        assert_eq!(closed[0].representative_seq, 6);
    }

    #[test]
    fn a_new_event_after_the_end_gets_a_new_id() {
        let mut tracker = EventTracker::new(config());
        let first = drive(
            &mut tracker,
            &[Some(0.6), Some(0.6), Some(0.6), None, None, None, None],
        );
        let second = drive_from(&mut tracker, 8, &[Some(0.6), Some(0.6), Some(0.6)]);
        assert_eq!(started(&second).len(), 1);
        assert_ne!(started(&first)[0].id, started(&second)[0].id);
    }

    #[test]
    fn labels_are_tracked_independently() {
        let mut tracker = EventTracker::new(config());
        let mut updates = Vec::new();
        for seq in 1..=3u64 {
            let detections = vec![det("person", 0.8, seq), det("dog", 0.7, seq)];
            updates.extend(tracker.observe(seq, seq * 1000, &detections));
        }
        // The dog disappears; the person stays.
        for seq in 4..=8u64 {
            let detections = vec![det("person", 0.8, seq)];
            updates.extend(tracker.observe(seq, seq * 1000, &detections));
        }

        let started: Vec<String> = started(&updates)
            .iter()
            .map(|e| e.label.clone())
            .collect();
        assert_eq!(started, vec!["dog".to_string(), "person".to_string()]);
        let ended = ended(&updates);
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].label, "dog");
        assert_eq!(tracker.open_event_count(), 1);
    }

    #[test]
    fn simultaneous_same_label_detections_coalesce() {
        // Two people in frame; per-class tracking yields one event.
        let mut tracker = EventTracker::new(config());
        let mut updates = Vec::new();
        for seq in 1..=4u64 {
            let detections = vec![
                det_at("person", 0.7, seq, 100.0),
                det_at("person", 0.9, seq, 105.0),
            ];
            updates.extend(tracker.observe(seq, seq * 1000, &detections));
        }
        let started = started(&updates);
        assert_eq!(started.len(), 1);
        // The strongest overlapping detection drives the track.
        assert_eq!(started[0].peak_confidence, 0.9);
    }

    #[test]
    fn far_away_same_label_detection_is_a_miss() {
        let mut tracker = EventTracker::new(config());
        drive(&mut tracker, &[Some(0.8), Some(0.8), Some(0.8)]);
        assert_eq!(tracker.open_event_count(), 1);

        // Same label, no overlap with the tracked box: a miss for the
        // object, and no second object because the label is occupied.
        let mut updates = Vec::new();
        for seq in 4..=7u64 {
            let detections = vec![det_at("person", 0.9, seq, 900.0)];
            updates.extend(tracker.observe(seq, seq * 1000, &detections));
        }
        // Four misses close the event (tolerance 2 + cooldown 2).
        assert_eq!(ended(&updates).len(), 1);
    }

    #[test]
    fn confirm_frames_of_one_starts_immediately() {
        let mut tracker = EventTracker::new(TrackerConfig {
            confirm_frames: 1,
            ..config()
        });
        let updates = tracker.observe(1, 1000, &[det("person", 0.8, 1)]);
        assert_eq!(started(&updates).len(), 1);
    }

    #[test]
    fn flush_closes_open_events_exactly_once() {
        let mut tracker = EventTracker::new(config());
        let updates = drive(&mut tracker, &[Some(0.8), Some(0.8), Some(0.8)]);
        assert_eq!(started(&updates).len(), 1);

        let flushed = tracker.flush(99_000);
        let closed = ended(&flushed);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].ended_at_ms, Some(99_000));
        assert_eq!(closed[0].id, started(&updates)[0].id);

        assert!(tracker.flush(100_000).is_empty());
        assert_eq!(tracker.open_event_count(), 0);
    }

    #[test]
    fn flush_discards_unconfirmed_candidates() {
        let mut tracker = EventTracker::new(config());
        drive(&mut tracker, &[Some(0.8), Some(0.8)]);
        assert!(tracker.flush(5000).is_empty());
    }

    #[test]
    fn cooling_event_flushes_too() {
        let mut tracker = EventTracker::new(config());
        // Confirm, then two misses to reach Cooling.
        drive(&mut tracker, &[Some(0.8), Some(0.8), Some(0.8), None, None]);
        let flushed = tracker.flush(42_000);
        assert_eq!(ended(&flushed).len(), 1);
    }
}
