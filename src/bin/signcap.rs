//! signcap - hand-sign capture
//!
//! Runs the capture loop against a camera: tracks the hand, counts down once
//! it is held still, submits the crop and prints the returned label.
//! Press Enter to capture immediately. With `--still` it saves a single
//! frame of the detector region and exits.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use signcap::ui::{self, Ui};
use signcap::{build_classifier, build_session, Camera, SessionEvent, SigncapConfig};

/// Frames to wait for a warmed-up camera in `--still` mode.
const STILL_ATTEMPTS: u32 = 100;

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture hand signs and classify them")]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "SIGNCAP_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Camera source: stub://<scene>, http(s)://..., or /dev/videoN.
    #[arg(long, value_name = "URL")]
    camera: Option<String>,

    /// Detection backend: fixed_roi, skin or tract.
    #[arg(long, value_name = "NAME")]
    detector: Option<String>,

    /// Relay origin to classify through.
    #[arg(long, value_name = "URL")]
    classify_url: Option<String>,

    /// Post straight to the prediction service instead of the relay.
    #[arg(long)]
    direct: bool,

    /// Keep the latest capture in this directory.
    #[arg(long, value_name = "DIR")]
    preview_dir: Option<PathBuf>,

    /// Exit after this many classified captures.
    #[arg(long, value_name = "N")]
    max_captures: Option<u64>,

    /// Save one JPEG of the detector region to this file and exit.
    #[arg(long, value_name = "PATH")]
    still: Option<PathBuf>,

    /// Output mode: auto, plain or pretty.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SigncapConfig::load_from(args.config.as_deref())?;
    if let Some(camera) = args.camera {
        cfg.camera.url = camera;
    }
    if let Some(detector) = args.detector {
        cfg.detector.backend = detector.parse()?;
    }
    if let Some(url) = args.classify_url {
        cfg.client.classify_url = url;
    }
    if args.direct {
        cfg.client.direct = true;
    }
    if let Some(dir) = args.preview_dir {
        cfg.session.preview_dir = Some(dir);
    }
    cfg.validate()?;

    if let Some(path) = args.still {
        return save_still(&cfg, &path);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = stop.clone();
    ctrlc::set_handler(move || stop_signal.store(true, Ordering::SeqCst))
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let classifier = build_classifier(&cfg);
    let session = build_session(&cfg, classifier)?.spawn()?;

    if std::io::stdin().is_terminal() {
        let trigger = session.capture_trigger();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if line.is_err() || trigger.fire().is_err() {
                    break;
                }
            }
        });
    }

    let display = Ui::from_args(Some(args.ui.as_str()), std::io::stderr().is_terminal());
    let mut status = display.status_line();
    let mut classified = 0u64;
    let mut submitted_at = None;

    while !stop.load(Ordering::SeqCst) {
        let event = match session.events().recv_timeout(Duration::from_millis(200)) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match event {
            SessionEvent::Status { text, .. } => status.set(&text),
            SessionEvent::Captured {
                filename, preview, ..
            } => {
                submitted_at = Some(Instant::now());
                match preview {
                    Some(files) => status.result(&format!(
                        "captured {} (preview {})",
                        files.capture.display(),
                        files.square.display()
                    )),
                    None => status.result(&format!("captured {}", filename)),
                }
            }
            SessionEvent::Classified { classification, .. } => {
                let took = submitted_at
                    .take()
                    .map(|t| format!(" in {}", ui::format_duration(t.elapsed())))
                    .unwrap_or_default();
                let confidence = classification
                    .confidence
                    .map(|c| format!(" ({:.1}%)", c))
                    .unwrap_or_default();
                status.result(&format!(
                    "label: {}{}{}",
                    classification.label, confidence, took
                ));
                classified += 1;
                if args.max_captures.is_some_and(|max| classified >= max) {
                    break;
                }
            }
            SessionEvent::Failed { message, .. } => {
                submitted_at = None;
                status.result(&format!("error: {}", message));
            }
            SessionEvent::Stopped => break,
        }
    }

    status.finish("camera off");
    session.stop()?;
    Ok(())
}

fn save_still(cfg: &SigncapConfig, path: &Path) -> Result<()> {
    let mut camera = Camera::new(cfg.camera.clone())?;
    camera.start()?;
    for _ in 0..STILL_ATTEMPTS {
        if let Some(jpeg) = camera.capture_still(&cfg.detector.roi, cfg.session.jpeg_quality)? {
            std::fs::write(path, &jpeg)
                .with_context(|| format!("write still {}", path.display()))?;
            log::info!("saved {} ({} bytes)", path.display(), jpeg.len());
            return Ok(());
        }
        std::thread::sleep(cfg.camera.frame_interval());
    }
    Err(anyhow!(
        "camera {} delivered no ready frame after {} attempts",
        cfg.camera.url,
        STILL_ATTEMPTS
    ))
}
