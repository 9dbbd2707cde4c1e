//! sentryd - sentry camera daemon
//!
//! This daemon:
//! 1. Captures frames from the configured camera on a dedicated thread
//! 2. Buffers them in a bounded latest-wins buffer (staleness loses)
//! 3. Runs object detection over each inferred frame
//! 4. Debounces detections into events via the per-class tracker
//! 5. Records one clip segment per event and appends it to the event log
//! 6. Publishes an alert for every event start
//!
//! Ctrl+C cancels the shared token; shutdown flushes open events and
//! finalizes any segment still being written.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use sentrycam::config::SentrydConfig;
use sentrycam::ingest::open_source;
use sentrycam::notify::{LogTransport, MqttTransport, NotifyTransport};
use sentrycam::{
    CancelToken, DetectorBackend, EventTracker, Notifier, Pipeline, PipelineConfig, Recorder,
    RecorderConfig, SqliteEventStore, StubBackend,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sentry camera daemon")]
struct Args {
    /// Camera kind: stub, webcam or realsense.
    #[arg(long, env = "SENTRY_CAMERA")]
    camera: Option<String>,

    /// Device path (e.g. /dev/video0, or stub://... for synthetic frames).
    #[arg(long, env = "SENTRY_DEVICE")]
    device: Option<String>,

    /// Config file path (JSON).
    #[arg(long, env = "SENTRY_CONFIG")]
    config: Option<PathBuf>,

    /// ONNX model weights; without them the scripted stub detector runs.
    #[arg(long, env = "SENTRY_MODEL_PATH")]
    model: Option<PathBuf>,

    /// Clip output directory.
    #[arg(long, env = "SENTRY_CLIP_DIR")]
    clip_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SentrydConfig::load_from(args.config.as_deref())?;
    if let Some(kind) = &args.camera {
        cfg.camera.kind = kind.parse()?;
    }
    if let Some(device) = &args.device {
        cfg.camera.device = device.clone();
    }
    if let Some(model) = &args.model {
        cfg.detector.model_path = Some(model.clone());
    }
    if let Some(dir) = &args.clip_dir {
        cfg.recorder.clip_dir = dir.clone();
    }

    log::info!(
        "sentryd starting: camera={} device={} {}x{}@{}fps",
        cfg.camera.kind,
        cfg.camera.device,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.target_fps
    );
    log::info!(
        "event log {} / clips {}",
        cfg.db_path,
        cfg.recorder.clip_dir.display()
    );

    let source = open_source(
        cfg.camera.kind,
        &cfg.camera.device,
        cfg.camera.target_fps,
        cfg.camera.width,
        cfg.camera.height,
    )?;
    let detector = build_detector(&cfg)?;
    let tracker = EventTracker::new(cfg.tracker);
    let recorder = Recorder::new(RecorderConfig {
        output_dir: cfg.recorder.clip_dir.clone(),
        jpeg_quality: cfg.recorder.jpeg_quality,
    })?;
    let store = Box::new(SqliteEventStore::open(&cfg.db_path)?);

    let transport: Box<dyn NotifyTransport> = match &cfg.mqtt_addr {
        Some(addr) => Box::new(MqttTransport::connect(
            addr,
            "sentryd",
            &cfg.notifier.topic_prefix,
        )?),
        None => {
            log::info!("no MQTT broker configured; notifications go to the log");
            Box::new(LogTransport::new())
        }
    };
    let notifier = Notifier::new(cfg.notifier.clone(), transport);

    let pipeline_config = PipelineConfig {
        buffer_capacity: cfg.buffer_capacity,
        target_fps: cfg.camera.target_fps,
        retention: cfg.retention,
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(
        pipeline_config,
        source,
        detector,
        tracker,
        recorder,
        store,
        notifier,
    );

    let cancel = CancelToken::new();
    let handler_cancel = cancel.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        handler_cancel.cancel();
    })
    .map_err(|e| anyhow!("failed to install Ctrl+C handler: {}", e))?;

    let stats = pipeline.run(cancel)?;
    log::info!(
        "sentryd exiting: {} events recorded, {} frames dropped, {} recording failures",
        stats.events_ended,
        stats.frames_dropped,
        stats.recording_failures
    );
    Ok(())
}

fn build_detector(cfg: &SentrydConfig) -> Result<Box<dyn DetectorBackend>> {
    match &cfg.detector.model_path {
        Some(path) => {
            #[cfg(feature = "backend-tract")]
            {
                let backend = sentrycam::detect::TractBackend::new(
                    path,
                    cfg.camera.width,
                    cfg.camera.height,
                )?
                .with_threshold(cfg.detector.detect_threshold);
                Ok(Box::new(backend))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                Err(anyhow!(
                    "model {} configured but sentryd was built without the backend-tract feature",
                    path.display()
                ))
            }
        }
        None => {
            log::warn!("no model configured; running the stub detector");
            Ok(Box::new(StubBackend::new()))
        }
    }
}
