use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use sentrycam::config::SentrydConfig;
use sentrycam::ingest::CameraKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTRY_CONFIG",
        "SENTRY_CAMERA",
        "SENTRY_DEVICE",
        "SENTRY_MODEL_PATH",
        "SENTRY_DB_PATH",
        "SENTRY_CLIP_DIR",
        "SENTRY_MQTT_ADDR",
        "SENTRY_NOTIFY_LABELS",
        "SENTRY_RETENTION_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_apply_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SentrydConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "sentry.db");
    assert_eq!(cfg.camera.kind, CameraKind::Stub);
    assert_eq!(cfg.camera.device, "stub://front_camera");
    assert_eq!(cfg.camera.target_fps, 10);
    assert_eq!(cfg.buffer_capacity, 2);
    assert_eq!(cfg.tracker.confirm_frames, 3);
    assert_eq!(cfg.tracker.miss_tolerance, 10);
    assert!(cfg.mqtt_addr.is_none());
    assert_eq!(cfg.retention, Duration::from_secs(60 * 60 * 24 * 7));

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "sentry_prod.db",
        "camera": {
            "kind": "webcam",
            "device": "/dev/video2",
            "target_fps": 15,
            "width": 800,
            "height": 600
        },
        "detector": {
            "model_path": "models/watch.onnx",
            "detect_threshold": 0.6
        },
        "tracker": {
            "confirm_frames": 5,
            "miss_tolerance": 8,
            "cooldown_frames": 4,
            "iou_threshold": 0.2
        },
        "recorder": {
            "clip_dir": "/var/lib/sentry/clips",
            "jpeg_quality": 90
        },
        "notifier": {
            "mqtt_addr": "127.0.0.1:1883",
            "topic_prefix": "cameras",
            "min_confidence": 0.7,
            "labels": ["person", "dog"],
            "max_retries": 5
        },
        "buffer": { "capacity": 3 },
        "retention": { "seconds": 43200 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SENTRY_CONFIG", file.path());
    std::env::set_var("SENTRY_DEVICE", "/dev/video7");
    std::env::set_var("SENTRY_RETENTION_SECS", "86400");
    std::env::set_var("SENTRY_NOTIFY_LABELS", "person, car");

    let cfg = SentrydConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "sentry_prod.db");
    assert_eq!(cfg.camera.kind, CameraKind::Webcam);
    // Environment wins over the file.
    assert_eq!(cfg.camera.device, "/dev/video7");
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.camera.width, 800);
    assert_eq!(cfg.camera.height, 600);
    assert_eq!(
        cfg.detector.model_path.as_deref(),
        Some(std::path::Path::new("models/watch.onnx"))
    );
    // The detector threshold feeds the tracker gate.
    assert_eq!(cfg.tracker.detect_threshold, 0.6);
    assert_eq!(cfg.tracker.confirm_frames, 5);
    assert_eq!(cfg.tracker.miss_tolerance, 8);
    assert_eq!(cfg.tracker.cooldown_frames, 4);
    assert_eq!(cfg.tracker.iou_threshold, 0.2);
    assert_eq!(
        cfg.recorder.clip_dir,
        std::path::PathBuf::from("/var/lib/sentry/clips")
    );
    assert_eq!(cfg.recorder.jpeg_quality, 90);
    assert_eq!(cfg.mqtt_addr.as_deref(), Some("127.0.0.1:1883"));
    assert_eq!(cfg.notifier.topic_prefix, "cameras");
    assert_eq!(cfg.notifier.min_confidence, 0.7);
    assert_eq!(cfg.notifier.labels, vec!["person", "car"]);
    assert_eq!(cfg.notifier.max_retries, 5);
    assert_eq!(cfg.buffer_capacity, 3);
    assert_eq!(cfg.retention, Duration::from_secs(86400));

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cases = [
        r#"{ "camera": { "target_fps": 0 } }"#,
        r#"{ "camera": { "width": 0 } }"#,
        r#"{ "detector": { "detect_threshold": 1.5 } }"#,
        r#"{ "tracker": { "confirm_frames": 0 } }"#,
        r#"{ "buffer": { "capacity": 0 } }"#,
        r#"{ "retention": { "seconds": 0 } }"#,
        r#"{ "notifier": { "labels": ["Not A Label"] } }"#,
        r#"{ "camera": { "kind": "thermal" } }"#,
    ];

    for json in cases {
        let mut file = NamedTempFile::new().expect("temp config");
        std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
        let result = SentrydConfig::load_from(Some(file.path()));
        assert!(result.is_err(), "config should be rejected: {}", json);
    }

    clear_env();
}
