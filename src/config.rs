use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;
use crate::detect::{BackendKind, DetectorSettings};
use crate::gateway::GatewaySettings;
use crate::geometry::NormalizedRoi;
use crate::ingest::{Camera, CameraConfig};
use crate::orchestrator::OrchestratorSettings;
use crate::session::SessionSettings;
use crate::tracker::TrackerSettings;

const DEFAULT_CLASSIFY_URL: &str = "http://127.0.0.1:8787";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SigncapConfigFile {
    relay: Option<RelayConfigFile>,
    upstream: Option<UpstreamConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfigFile>,
    capture: Option<CaptureConfigFile>,
    client: Option<ClientConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
    max_connections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct UpstreamConfigFile {
    url: Option<String>,
    image_field: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    roi: Option<NormalizedRoi>,
    skin_stride: Option<u32>,
    skin_min_coverage: Option<f32>,
    model_path: Option<PathBuf>,
    model_input_size: Option<u32>,
    presence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    padding: Option<f32>,
    stability_threshold: Option<f32>,
    stable_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    countdown_start: Option<u32>,
    tick_ms: Option<u64>,
    cooldown_ms: Option<u64>,
    max_dimension: Option<u32>,
    jpeg_quality: Option<u8>,
    preview_dir: Option<PathBuf>,
    preview_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClientConfigFile {
    classify_url: Option<String>,
    direct: Option<bool>,
}

/// How the `signcap` binary reaches a classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Relay origin (or full `/api/classify` URL).
    pub classify_url: String,
    /// Skip the relay and post straight to `upstream`.
    pub direct: bool,
}

#[derive(Debug, Clone)]
pub struct SigncapConfig {
    pub relay: ApiConfig,
    pub upstream: GatewaySettings,
    pub camera: CameraConfig,
    pub detector: DetectorSettings,
    pub tracker: TrackerSettings,
    pub orchestrator: OrchestratorSettings,
    pub session: SessionSettings,
    pub client: ClientSettings,
}

impl SigncapConfig {
    /// Defaults, then the file named by `SIGNCAP_CONFIG`, then `SIGNCAP_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("SIGNCAP_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Like [`load`](Self::load) with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SigncapConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SigncapConfigFile) -> Result<Self> {
        let relay_file = file.relay.unwrap_or_default();
        let relay_defaults = ApiConfig::default();
        let relay = ApiConfig {
            addr: relay_file.addr.unwrap_or(relay_defaults.addr),
            max_body_bytes: relay_file
                .max_body_bytes
                .unwrap_or(relay_defaults.max_body_bytes),
            max_connections: relay_file
                .max_connections
                .unwrap_or(relay_defaults.max_connections),
            file_field: relay_defaults.file_field,
        };

        let upstream_file = file.upstream.unwrap_or_default();
        let upstream_defaults = GatewaySettings::default();
        let upstream = GatewaySettings {
            url: upstream_file.url.unwrap_or(upstream_defaults.url),
            image_field: upstream_file
                .image_field
                .unwrap_or(upstream_defaults.image_field),
            timeout_secs: upstream_file
                .timeout_secs
                .unwrap_or(upstream_defaults.timeout_secs),
        };

        let camera_file = file.camera.unwrap_or_default();
        let camera_defaults = CameraConfig::default();
        let camera = CameraConfig {
            url: camera_file.url.unwrap_or(camera_defaults.url),
            target_fps: camera_file.target_fps.unwrap_or(camera_defaults.target_fps),
            width: camera_file.width.unwrap_or(camera_defaults.width),
            height: camera_file.height.unwrap_or(camera_defaults.height),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector_defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            backend: match detector_file.backend {
                Some(name) => name.parse()?,
                None => detector_defaults.backend,
            },
            roi: detector_file.roi.unwrap_or(detector_defaults.roi),
            skin_stride: detector_file
                .skin_stride
                .unwrap_or(detector_defaults.skin_stride),
            skin_min_coverage: detector_file
                .skin_min_coverage
                .unwrap_or(detector_defaults.skin_min_coverage),
            model_path: detector_file.model_path.or(detector_defaults.model_path),
            model_input_size: detector_file
                .model_input_size
                .unwrap_or(detector_defaults.model_input_size),
            presence_threshold: detector_file
                .presence_threshold
                .unwrap_or(detector_defaults.presence_threshold),
        };

        let tracker_file = file.tracker.unwrap_or_default();
        let tracker_defaults = TrackerSettings::default();
        let tracker = TrackerSettings {
            padding: tracker_file.padding.unwrap_or(tracker_defaults.padding),
            stability_threshold: tracker_file
                .stability_threshold
                .unwrap_or(tracker_defaults.stability_threshold),
            stable_frames: tracker_file
                .stable_frames
                .unwrap_or(tracker_defaults.stable_frames),
        };

        let capture_file = file.capture.unwrap_or_default();
        let orchestrator_defaults = OrchestratorSettings::default();
        let orchestrator = OrchestratorSettings {
            countdown_start: capture_file
                .countdown_start
                .unwrap_or(orchestrator_defaults.countdown_start),
            tick: capture_file
                .tick_ms
                .map(Duration::from_millis)
                .unwrap_or(orchestrator_defaults.tick),
            cooldown: capture_file
                .cooldown_ms
                .map(Duration::from_millis)
                .unwrap_or(orchestrator_defaults.cooldown),
        };
        let session_defaults = SessionSettings::default();
        let session = SessionSettings {
            max_dimension: capture_file
                .max_dimension
                .unwrap_or(session_defaults.max_dimension),
            jpeg_quality: capture_file
                .jpeg_quality
                .unwrap_or(session_defaults.jpeg_quality),
            preview_dir: capture_file.preview_dir.or(session_defaults.preview_dir),
            preview_size: capture_file
                .preview_size
                .unwrap_or(session_defaults.preview_size),
        };

        let client_file = file.client.unwrap_or_default();
        let client = ClientSettings {
            classify_url: client_file
                .classify_url
                .unwrap_or_else(|| DEFAULT_CLASSIFY_URL.to_string()),
            direct: client_file.direct.unwrap_or(false),
        };

        Ok(Self {
            relay,
            upstream,
            camera,
            detector,
            tracker,
            orchestrator,
            session,
            client,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("SIGNCAP_RELAY_ADDR") {
            self.relay.addr = addr;
        }
        if let Some(url) = env_value("SIGNCAP_UPSTREAM_URL") {
            self.upstream.url = url;
        }
        if let Some(timeout) = env_value("SIGNCAP_UPSTREAM_TIMEOUT_SECS") {
            self.upstream.timeout_secs = timeout.parse().map_err(|_| {
                anyhow!("SIGNCAP_UPSTREAM_TIMEOUT_SECS must be an integer number of seconds")
            })?;
        }
        if let Some(url) = env_value("SIGNCAP_CAMERA_URL") {
            self.camera.url = url;
        }
        if let Some(backend) = env_value("SIGNCAP_DETECTOR") {
            self.detector.backend = backend
                .parse::<BackendKind>()
                .context("SIGNCAP_DETECTOR")?;
        }
        if let Some(url) = env_value("SIGNCAP_CLASSIFY_URL") {
            self.client.classify_url = url;
        }
        if let Some(dir) = env_value("SIGNCAP_PREVIEW_DIR") {
            self.session.preview_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Check every section. Binaries call this again after applying their
    /// command-line overrides.
    pub fn validate(&self) -> Result<()> {
        let resolved = self
            .relay
            .addr
            .to_socket_addrs()
            .with_context(|| format!("relay.addr '{}' is not a listen address", self.relay.addr))?;
        if resolved.count() == 0 {
            return Err(anyhow!("relay.addr '{}' resolves to no address", self.relay.addr));
        }
        if self.relay.max_body_bytes == 0 {
            return Err(anyhow!("relay.max_body_bytes must be greater than zero"));
        }
        if self.relay.max_connections == 0 {
            return Err(anyhow!("relay.max_connections must be greater than zero"));
        }
        validate_http_url("upstream.url", &self.upstream.url)?;
        validate_http_url("client.classify_url", &self.client.classify_url)?;
        if self.upstream.timeout_secs == 0 {
            return Err(anyhow!("upstream.timeout_secs must be greater than zero"));
        }
        if self.upstream.image_field.trim().is_empty() {
            return Err(anyhow!("upstream.image_field must not be empty"));
        }

        Camera::new(self.camera.clone())?;
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }

        self.detector.roi.validate().context("detector.roi")?;
        if self.detector.skin_stride == 0 {
            return Err(anyhow!("detector.skin_stride must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.skin_min_coverage) {
            return Err(anyhow!("detector.skin_min_coverage must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.detector.presence_threshold) {
            return Err(anyhow!("detector.presence_threshold must be within 0..=1"));
        }
        if self.detector.backend == BackendKind::Tract && self.detector.model_path.is_none() {
            return Err(anyhow!("detector.model_path is required for the tract backend"));
        }

        if self.tracker.stable_frames == 0 {
            return Err(anyhow!("tracker.stable_frames must be greater than zero"));
        }
        let threshold = self.tracker.stability_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(anyhow!("tracker.stability_threshold must be positive"));
        }
        if !(0.0..=1.0).contains(&self.tracker.padding) {
            return Err(anyhow!("tracker.padding must be within 0..=1"));
        }

        if self.orchestrator.tick.is_zero() {
            return Err(anyhow!("capture.tick_ms must be greater than zero"));
        }
        if self.session.max_dimension == 0 {
            return Err(anyhow!("capture.max_dimension must be greater than zero"));
        }
        if !(1..=100).contains(&self.session.jpeg_quality) {
            return Err(anyhow!("capture.jpeg_quality must be within 1..=100"));
        }
        if self.session.preview_size == 0 {
            return Err(anyhow!("capture.preview_size must be greater than zero"));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value).map_err(|e| anyhow!("{} '{}': {}", field, value, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!("{} must be http or https, got {}", field, other)),
    }
}

fn read_config_file(path: &Path) -> Result<SigncapConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SigncapConfig::from_file(SigncapConfigFile::default()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.relay.addr, "127.0.0.1:8787");
        assert_eq!(cfg.upstream.image_field, "imagen");
        assert_eq!(cfg.upstream.timeout_secs, 30);
        assert_eq!(cfg.orchestrator.countdown_start, 3);
        assert_eq!(cfg.tracker.stable_frames, 15);
        assert_eq!(cfg.detector.backend, BackendKind::Skin);
        assert!(!cfg.client.direct);
    }

    #[test]
    fn parses_toml_sections() {
        let file: SigncapConfigFile = toml::from_str(
            r#"
            [upstream]
            url = "https://predict.example/api"
            image_field = "file"

            [detector]
            backend = "fixed_roi"
            roi = { x = 0.1, y = 0.1, width = 0.5, height = 0.5 }

            [capture]
            tick_ms = 250
            "#,
        )
        .unwrap();
        let cfg = SigncapConfig::from_file(file).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.upstream.image_field, "file");
        assert_eq!(cfg.detector.backend, BackendKind::FixedRoi);
        assert_eq!(cfg.detector.roi.width, 0.5);
        assert_eq!(cfg.orchestrator.tick, Duration::from_millis(250));
    }

    #[test]
    fn relay_addr_may_be_a_host_name() {
        let mut cfg = SigncapConfig::from_file(SigncapConfigFile::default()).unwrap();
        cfg.relay.addr = "localhost:8787".into();
        cfg.validate().unwrap();
    }

    #[test]
    fn presence_threshold_and_preview_size_come_from_the_file() {
        let file: SigncapConfigFile = serde_json::from_str(
            r#"{
                "relay": { "max_connections": 4 },
                "detector": { "presence_threshold": 0.7 },
                "capture": { "preview_size": 128 }
            }"#,
        )
        .unwrap();
        let cfg = SigncapConfig::from_file(file).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.relay.max_connections, 4);
        assert_eq!(cfg.detector.presence_threshold, 0.7);
        assert_eq!(cfg.session.preview_size, 128);
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = SigncapConfig::from_file(SigncapConfigFile::default()).unwrap();
        cfg.upstream.url = "ftp://predict".into();
        assert!(cfg.validate().is_err());

        let mut cfg = SigncapConfig::from_file(SigncapConfigFile::default()).unwrap();
        cfg.session.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SigncapConfig::from_file(SigncapConfigFile::default()).unwrap();
        cfg.camera.url = "rtsp://cam".into();
        assert!(cfg.validate().is_err());

        let mut cfg = SigncapConfig::from_file(SigncapConfigFile::default()).unwrap();
        cfg.relay.addr = "8787".into();
        assert!(cfg.validate().is_err());

        let mut cfg = SigncapConfig::from_file(SigncapConfigFile::default()).unwrap();
        cfg.detector.presence_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = SigncapConfig::from_file(SigncapConfigFile::default()).unwrap();
        cfg.relay.max_connections = 0;
        assert!(cfg.validate().is_err());

        let unknown: Result<SigncapConfigFile, _> = serde_json::from_str(r#"{"db_path": "x"}"#);
        assert!(unknown.is_err());
    }
}
