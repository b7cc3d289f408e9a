use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use signcap::config::SigncapConfig;
use signcap::BackendKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SIGNCAP_CONFIG",
        "SIGNCAP_RELAY_ADDR",
        "SIGNCAP_UPSTREAM_URL",
        "SIGNCAP_UPSTREAM_TIMEOUT_SECS",
        "SIGNCAP_CAMERA_URL",
        "SIGNCAP_DETECTOR",
        "SIGNCAP_CLASSIFY_URL",
        "SIGNCAP_PREVIEW_DIR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "relay": { "addr": "0.0.0.0:9000", "max_body_bytes": 2048 },
        "upstream": {
            "url": "https://predict.example/api/predict",
            "image_field": "file",
            "timeout_secs": 12
        },
        "camera": { "url": "stub://moving", "target_fps": 15, "width": 320, "height": 240 },
        "detector": { "backend": "skin", "skin_stride": 2 },
        "tracker": { "stable_frames": 10 },
        "capture": { "countdown_start": 5, "cooldown_ms": 500, "jpeg_quality": 75 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SIGNCAP_CONFIG", file.path());
    std::env::set_var("SIGNCAP_UPSTREAM_TIMEOUT_SECS", "45");
    std::env::set_var("SIGNCAP_DETECTOR", "fixed_roi");
    std::env::set_var("SIGNCAP_PREVIEW_DIR", "/tmp/signcap-previews");

    let cfg = SigncapConfig::load().expect("load config");

    assert_eq!(cfg.relay.addr, "0.0.0.0:9000");
    assert_eq!(cfg.relay.max_body_bytes, 2048);
    assert_eq!(cfg.upstream.url, "https://predict.example/api/predict");
    assert_eq!(cfg.upstream.image_field, "file");
    assert_eq!(cfg.upstream.timeout_secs, 45);
    assert_eq!(cfg.camera.url, "stub://moving");
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!((cfg.camera.width, cfg.camera.height), (320, 240));
    assert_eq!(cfg.detector.backend, BackendKind::FixedRoi);
    assert_eq!(cfg.detector.skin_stride, 2);
    assert_eq!(cfg.tracker.stable_frames, 10);
    assert_eq!(cfg.orchestrator.countdown_start, 5);
    assert_eq!(cfg.orchestrator.tick, Duration::from_secs(1));
    assert_eq!(cfg.orchestrator.cooldown, Duration::from_millis(500));
    assert_eq!(cfg.session.jpeg_quality, 75);
    assert_eq!(
        cfg.session.preview_dir.as_deref(),
        Some(std::path::Path::new("/tmp/signcap-previews"))
    );

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [relay]
        addr = "127.0.0.1:9100"

        [client]
        classify_url = "http://127.0.0.1:9100"
        direct = true
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("SIGNCAP_RELAY_ADDR", "127.0.0.1:9200");

    let cfg = SigncapConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.relay.addr, "127.0.0.1:9200");
    assert_eq!(cfg.client.classify_url, "http://127.0.0.1:9100");
    assert!(cfg.client.direct);
    assert_eq!(cfg.upstream.image_field, "imagen");

    clear_env();
}

#[test]
fn defaults_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SigncapConfig::load().expect("load defaults");
    assert_eq!(cfg.relay.addr, "127.0.0.1:8787");
    assert_eq!(cfg.upstream.timeout_secs, 30);
    assert_eq!(cfg.camera.url, "stub://cycle");
    assert!(cfg.session.preview_dir.is_none());
}

#[test]
fn rejects_invalid_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SIGNCAP_UPSTREAM_TIMEOUT_SECS", "soon");
    assert!(SigncapConfig::load().is_err());
    clear_env();

    std::env::set_var("SIGNCAP_DETECTOR", "mediapipe");
    assert!(SigncapConfig::load().is_err());
    clear_env();

    std::env::set_var("SIGNCAP_UPSTREAM_TIMEOUT_SECS", "0");
    assert!(SigncapConfig::load().is_err());
    clear_env();

    std::env::set_var("SIGNCAP_CAMERA_URL", "rtsp://camera-1");
    assert!(SigncapConfig::load().is_err());
    clear_env();

    let missing = SigncapConfig::load_from(Some(std::path::Path::new("/nonexistent/signcap.json")));
    assert!(missing.is_err());
}
