//! Per-event clip segments.
//!
//! One directory per event, named `<label>_<event id>`, holding the frames
//! observed while the event was open as JPEG files plus a `manifest.json`
//! written when the segment is finalized. A segment without a manifest is
//! one that was interrupted before `sentryd` could close it.
//!
//! Write failures (disk full, permissions) are never fatal: they are
//! logged, counted, and the affected segment is abandoned while the
//! pipeline keeps running.

use std::collections::BTreeMap;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use serde::Serialize;

use crate::frame::Frame;
use crate::{Event, EventId};

/// Configuration for the clip recorder.
#[derive(Clone, Debug)]
pub struct RecorderConfig {
    /// Directory that receives one subdirectory per event.
    pub output_dir: PathBuf,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("clips"),
            jpeg_quality: 85,
        }
    }
}

#[derive(Serialize)]
struct SegmentManifest<'a> {
    event: &'a Event,
    frames_written: u64,
    finalized_at_ms: u64,
}

struct OpenSegment {
    dir: PathBuf,
    event: Event,
    frames_written: u64,
}

/// Writes clip segments bounded by event start/end.
///
/// All calls happen on the inference thread; the recorder keeps its open
/// segments in plain maps with no locking.
pub struct Recorder {
    config: RecorderConfig,
    open: BTreeMap<EventId, OpenSegment>,
    failures: u64,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("create clip directory {}", config.output_dir.display())
        })?;
        Ok(Self {
            config,
            open: BTreeMap::new(),
            failures: 0,
        })
    }

    /// Open a segment for a newly started event. Non-fatal on failure.
    pub fn on_event_started(&mut self, event: &Event) {
        let dir = self
            .config
            .output_dir
            .join(format!("{}_{}", event.label, event.id));
        if let Err(e) = fs::create_dir_all(&dir) {
            log::warn!("recording error: open segment {}: {}", dir.display(), e);
            self.failures += 1;
            return;
        }
        log::info!("recording {} to {}", event.label, dir.display());
        self.open.insert(
            event.id.clone(),
            OpenSegment {
                dir,
                event: event.clone(),
                frames_written: 0,
            },
        );
    }

    /// Append a frame to every open segment. Non-fatal on failure.
    pub fn append_frame(&mut self, frame: &Frame) {
        let quality = self.config.jpeg_quality;
        let mut failed: Vec<EventId> = Vec::new();
        for (id, segment) in self.open.iter_mut() {
            let path = segment.dir.join(format!("frame_{:06}.jpg", frame.seq));
            match write_jpeg(&path, frame, quality) {
                Ok(()) => segment.frames_written += 1,
                Err(e) => {
                    log::warn!("recording error: {}: {:#}", path.display(), e);
                    failed.push(id.clone());
                }
            }
        }
        // A segment that cannot be written is abandoned, not retried every
        // frame; only the orphaned segment is lost.
        for id in failed {
            self.open.remove(&id);
            self.failures += 1;
        }
    }

    /// Finalize the segment for a closed event. Non-fatal on failure.
    pub fn on_event_ended(&mut self, event: &Event) {
        let Some(mut segment) = self.open.remove(&event.id) else {
            // Segment may have been abandoned after a write failure.
            return;
        };
        segment.event = event.clone();
        self.finalize(segment, event.ended_at_ms.unwrap_or(0));
    }

    /// Finalize every still-open segment, e.g. on shutdown. An interrupted
    /// recording is closed out, never discarded.
    pub fn finalize_all(&mut self, ended_at_ms: u64) {
        let open = std::mem::take(&mut self.open);
        for (_, mut segment) in open {
            if segment.event.ended_at_ms.is_none() {
                segment.event.ended_at_ms = Some(ended_at_ms);
            }
            self.finalize(segment, ended_at_ms);
        }
    }

    fn finalize(&mut self, segment: OpenSegment, finalized_at_ms: u64) {
        let manifest = SegmentManifest {
            event: &segment.event,
            frames_written: segment.frames_written,
            finalized_at_ms,
        };
        let path = segment.dir.join("manifest.json");
        if let Err(e) = write_manifest(&path, &manifest) {
            log::warn!("recording error: {}: {:#}", path.display(), e);
            self.failures += 1;
            return;
        }
        log::info!(
            "finalized segment {} ({} frames)",
            segment.dir.display(),
            segment.frames_written
        );
    }

    /// Segment directory for an open event, if recording succeeded.
    pub fn segment_dir(&self, id: &EventId) -> Option<&Path> {
        self.open.get(id).map(|s| s.dir.as_path())
    }

    pub fn open_segments(&self) -> usize {
        self.open.len()
    }

    /// Number of recording failures since startup.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

fn write_jpeg(path: &Path, frame: &Frame, quality: u8) -> Result<()> {
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
    encoder.encode(
        &frame.pixels,
        frame.width,
        frame.height,
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(())
}

fn write_manifest(path: &Path, manifest: &SegmentManifest<'_>) -> Result<()> {
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), manifest)?;
    Ok(())
}
