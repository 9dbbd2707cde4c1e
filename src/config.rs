use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::CameraKind;
use crate::notify::NotifierConfig;
use crate::track::TrackerConfig;

const DEFAULT_DB_PATH: &str = "sentry.db";
const DEFAULT_CLIP_DIR: &str = "clips";
const DEFAULT_DEVICE: &str = "stub://front_camera";
const DEFAULT_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_BUFFER_CAPACITY: usize = 2;
const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24 * 7;

#[derive(Debug, Deserialize, Default)]
struct SentrydConfigFile {
    db_path: Option<String>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfigFile>,
    recorder: Option<RecorderConfigFile>,
    notifier: Option<NotifierConfigFile>,
    buffer: Option<BufferConfigFile>,
    retention: Option<RetentionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    kind: Option<String>,
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    model_path: Option<PathBuf>,
    detect_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    confirm_frames: Option<u32>,
    miss_tolerance: Option<u32>,
    cooldown_frames: Option<u32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RecorderConfigFile {
    clip_dir: Option<PathBuf>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifierConfigFile {
    mqtt_addr: Option<String>,
    topic_prefix: Option<String>,
    min_confidence: Option<f32>,
    labels: Option<Vec<String>>,
    max_retries: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct BufferConfigFile {
    capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct RetentionConfigFile {
    seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SentrydConfig {
    pub db_path: String,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub tracker: TrackerConfig,
    pub recorder: RecorderSettings,
    /// MQTT broker; notifications fall back to the daemon log when unset.
    pub mqtt_addr: Option<String>,
    pub notifier: NotifierConfig,
    pub buffer_capacity: usize,
    pub retention: Duration,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub kind: CameraKind,
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub model_path: Option<PathBuf>,
    pub detect_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub clip_dir: PathBuf,
    pub jpeg_quality: u8,
}

impl SentrydConfig {
    /// Load from the file named by `SENTRY_CONFIG` (if any), then apply
    /// environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTRY_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as `load`, with an explicit config file path taking precedence
    /// over `SENTRY_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentrydConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let camera = CameraSettings {
            kind: file
                .camera
                .as_ref()
                .and_then(|camera| camera.kind.as_deref())
                .map(|kind| kind.parse::<CameraKind>())
                .transpose()?
                .unwrap_or(CameraKind::Stub),
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.target_fps)
                .unwrap_or(DEFAULT_FPS),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_HEIGHT),
        };

        let detector = DetectorSettings {
            model_path: file.detector.as_ref().and_then(|d| d.model_path.clone()),
            detect_threshold: file
                .detector
                .as_ref()
                .and_then(|d| d.detect_threshold)
                .unwrap_or(0.5),
        };

        let tracker_defaults = TrackerConfig::default();
        let tracker = TrackerConfig {
            detect_threshold: detector.detect_threshold,
            confirm_frames: file
                .tracker
                .as_ref()
                .and_then(|t| t.confirm_frames)
                .unwrap_or(tracker_defaults.confirm_frames),
            miss_tolerance: file
                .tracker
                .as_ref()
                .and_then(|t| t.miss_tolerance)
                .unwrap_or(tracker_defaults.miss_tolerance),
            cooldown_frames: file
                .tracker
                .as_ref()
                .and_then(|t| t.cooldown_frames)
                .unwrap_or(tracker_defaults.cooldown_frames),
            iou_threshold: file
                .tracker
                .as_ref()
                .and_then(|t| t.iou_threshold)
                .unwrap_or(tracker_defaults.iou_threshold),
        };

        let recorder = RecorderSettings {
            clip_dir: file
                .recorder
                .as_ref()
                .and_then(|r| r.clip_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIP_DIR)),
            jpeg_quality: file
                .recorder
                .as_ref()
                .and_then(|r| r.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let notifier_defaults = NotifierConfig::default();
        let mqtt_addr = file.notifier.as_ref().and_then(|n| n.mqtt_addr.clone());
        let notifier = NotifierConfig {
            topic_prefix: file
                .notifier
                .as_ref()
                .and_then(|n| n.topic_prefix.clone())
                .unwrap_or(notifier_defaults.topic_prefix),
            min_confidence: file
                .notifier
                .as_ref()
                .and_then(|n| n.min_confidence)
                .unwrap_or(notifier_defaults.min_confidence),
            labels: file
                .notifier
                .as_ref()
                .and_then(|n| n.labels.clone())
                .unwrap_or_default(),
            max_retries: file
                .notifier
                .and_then(|n| n.max_retries)
                .unwrap_or(notifier_defaults.max_retries),
            retry_backoff: notifier_defaults.retry_backoff,
        };

        let buffer_capacity = file
            .buffer
            .and_then(|buffer| buffer.capacity)
            .unwrap_or(DEFAULT_BUFFER_CAPACITY);
        let retention = Duration::from_secs(
            file.retention
                .and_then(|retention| retention.seconds)
                .unwrap_or(DEFAULT_RETENTION_SECS),
        );

        Ok(Self {
            db_path,
            camera,
            detector,
            tracker,
            recorder,
            mqtt_addr,
            notifier,
            buffer_capacity,
            retention,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(kind) = std::env::var("SENTRY_CAMERA") {
            if !kind.trim().is_empty() {
                self.camera.kind = kind.trim().parse()?;
            }
        }
        if let Ok(device) = std::env::var("SENTRY_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(path) = std::env::var("SENTRY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("SENTRY_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("SENTRY_CLIP_DIR") {
            if !dir.trim().is_empty() {
                self.recorder.clip_dir = PathBuf::from(dir);
            }
        }
        if let Ok(addr) = std::env::var("SENTRY_MQTT_ADDR") {
            if !addr.trim().is_empty() {
                self.mqtt_addr = Some(addr);
            }
        }
        if let Ok(labels) = std::env::var("SENTRY_NOTIFY_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.notifier.labels = parsed;
            }
        }
        if let Ok(retention) = std::env::var("SENTRY_RETENTION_SECS") {
            let seconds: u64 = retention.parse().map_err(|_| {
                anyhow!("SENTRY_RETENTION_SECS must be an integer number of seconds")
            })?;
            self.retention = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.target_fps == 0 || self.camera.target_fps > 120 {
            return Err(anyhow!("camera target_fps must be between 1 and 120"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.detect_threshold) {
            return Err(anyhow!("detect_threshold must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.tracker.iou_threshold) {
            return Err(anyhow!("iou_threshold must be within 0..=1"));
        }
        if self.tracker.confirm_frames == 0 {
            return Err(anyhow!("confirm_frames must be at least 1"));
        }
        if !(1..=100).contains(&self.recorder.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if !(0.0..=1.0).contains(&self.notifier.min_confidence) {
            return Err(anyhow!("notifier min_confidence must be within 0..=1"));
        }
        for label in &self.notifier.labels {
            crate::validate_label(label)?;
        }
        if self.buffer_capacity == 0 {
            return Err(anyhow!("buffer capacity must be at least 1"));
        }
        if self.retention.as_secs() == 0 {
            return Err(anyhow!("retention must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SentrydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg = serde_json::from_str(&raw)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
