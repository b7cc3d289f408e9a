//! Capture session: the per-frame loop tying camera, tracker, orchestrator,
//! renderer and classifier together.
//!
//! The loop owns every component and runs on its own thread. Network calls
//! happen on a short-lived worker thread per submission so the loop keeps
//! tracking while a request is in flight; the worker reports back over a
//! channel. Callers observe the session through [`SessionEvent`]s.
//!
//! A camera that keeps failing is restarted a few times; when it stays
//! down the session reports it as lost and stops.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{anyhow, Result};

use crate::error::CaptureError;
use crate::frame::Frame;
use crate::gateway::{Classification, Classifier};
use crate::ingest::Camera;
use crate::orchestrator::{CaptureOrchestrator, CaptureState, SubmitRequest};
use crate::render::{self, PreviewFiles, PreviewStore};
use crate::tracker::{HandState, HandTracker};

/// Failed reads in a row before the camera is restarted.
const MAX_FRAME_FAILURES: u32 = 30;
/// Restarts without a good frame before the camera counts as lost.
const MAX_RECONNECTS: u32 = 3;

#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Longest side of the submitted crop.
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    /// Where the latest capture is kept for preview; `None` keeps nothing on disk.
    pub preview_dir: Option<PathBuf>,
    /// Side of the square preview thumbnail.
    pub preview_size: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_dimension: render::DEFAULT_MAX_DIMENSION,
            jpeg_quality: render::DEFAULT_JPEG_QUALITY,
            preview_dir: None,
            preview_size: render::DEFAULT_PREVIEW_SIZE,
        }
    }
}

#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Emitted whenever the state or the user-facing status changes.
    Status {
        state: CaptureState,
        hand: HandState,
        text: String,
    },
    Captured {
        session_id: u64,
        filename: String,
        bytes: usize,
        preview: Option<PreviewFiles>,
        manual: bool,
    },
    Classified {
        session_id: u64,
        classification: Classification,
    },
    /// A submission failed, or the camera was lost (the session then stops).
    Failed {
        session_id: u64,
        kind: &'static str,
        message: String,
    },
    Stopped,
}

enum Command {
    Capture,
}

struct Outcome {
    session_id: u64,
    result: Result<Classification, CaptureError>,
}

pub struct CaptureSession {
    camera: Camera,
    tracker: HandTracker,
    orchestrator: CaptureOrchestrator,
    classifier: Arc<dyn Classifier>,
    settings: SessionSettings,
}

impl CaptureSession {
    pub fn new(
        camera: Camera,
        tracker: HandTracker,
        orchestrator: CaptureOrchestrator,
        classifier: Arc<dyn Classifier>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            camera,
            tracker,
            orchestrator,
            classifier,
            settings,
        }
    }

    /// Turn the camera on and start the loop thread.
    pub fn spawn(mut self) -> Result<SessionHandle> {
        let previews = match &self.settings.preview_dir {
            Some(dir) => Some(PreviewStore::new(
                dir,
                self.settings.preview_size,
                self.settings.jpeg_quality,
            )?),
            None => None,
        };
        self.camera.start()?;
        self.tracker.enable();
        self.orchestrator.start_camera();

        let (events_tx, events) = mpsc::channel();
        let (commands, commands_rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            let mut running = Running {
                session: self,
                previews,
                events: events_tx,
                commands: commands_rx,
                outcomes: mpsc::channel(),
                last_status: None,
                frame_failures: 0,
                reconnects: 0,
            };
            running.run(&shutdown_thread);
            running.shut_down();
        });

        Ok(SessionHandle {
            events,
            commands,
            shutdown,
            join: Some(join),
        })
    }
}

/// Handle to a running session. Dropping it stops the session.
pub struct SessionHandle {
    events: Receiver<SessionEvent>,
    commands: Sender<Command>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Capture the current hand right away, skipping the countdown.
    pub fn request_capture(&self) -> Result<()> {
        self.capture_trigger().fire()
    }

    /// Detached manual trigger, for use from another thread.
    pub fn capture_trigger(&self) -> CaptureTrigger {
        CaptureTrigger {
            commands: self.commands.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Ask the loop to wind down without waiting; `Stopped` follows.
    pub fn request_stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn stop(mut self) -> Result<()> {
        self.halt()
    }

    fn halt(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("capture session thread panicked"))?;
        }
        Ok(())
    }
}

pub struct CaptureTrigger {
    commands: Sender<Command>,
}

impl CaptureTrigger {
    pub fn fire(&self) -> Result<()> {
        self.commands
            .send(Command::Capture)
            .map_err(|_| anyhow!("capture session is not running"))
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Err(err) = self.halt() {
            log::error!("{}", err);
        }
    }
}

struct Running {
    session: CaptureSession,
    previews: Option<PreviewStore>,
    events: Sender<SessionEvent>,
    commands: Receiver<Command>,
    outcomes: (Sender<Outcome>, Receiver<Outcome>),
    last_status: Option<(CaptureState, bool, bool, String)>,
    /// Consecutive failed frame reads.
    frame_failures: u32,
    /// Reconnects since the last good frame.
    reconnects: u32,
}

impl Running {
    fn run(&mut self, shutdown: &AtomicBool) {
        let interval = self.session.camera.config().frame_interval();
        let mut manual_pending = false;
        log::info!(
            "capture session started (detector: {}, classifier: {})",
            self.session.tracker.backend_name(),
            self.session.classifier.name()
        );

        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();

            loop {
                match self.commands.try_recv() {
                    Ok(Command::Capture) => manual_pending = true,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            self.collect_outcomes();

            match self.session.camera.next_frame() {
                Ok(frame) => {
                    self.frame_failures = 0;
                    self.reconnects = 0;
                    let hand = self.session.tracker.process(&frame);
                    let mut request = self.session.orchestrator.update(&hand, Instant::now());
                    if request.is_none() && std::mem::take(&mut manual_pending) {
                        request = self.session.orchestrator.request_capture();
                        if request.is_none() {
                            log::info!("manual capture ignored: no hand in view");
                        }
                    }
                    if let Some(request) = request {
                        self.submit(&frame, request);
                    }
                    self.publish_status(hand);
                }
                Err(err) => {
                    self.frame_failures += 1;
                    log::debug!("frame read failed: {:#}", err);
                    let unhealthy = self.frame_failures >= MAX_FRAME_FAILURES
                        || !self.session.camera.is_healthy();
                    if unhealthy && !self.reconnect_camera(&err) {
                        break;
                    }
                }
            }

            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }

    fn submit(&mut self, frame: &Frame, request: SubmitRequest) {
        let settings = &self.session.settings;
        let artifact = match render::capture_artifact(
            frame,
            &request.bounding_box,
            settings.max_dimension,
            settings.jpeg_quality,
        ) {
            Ok(artifact) => artifact,
            Err(err) => {
                self.report_failure(
                    request.session_id,
                    CaptureError::Internal(format!("{:#}", err)),
                );
                self.session.orchestrator.finish_submission(Instant::now());
                return;
            }
        };

        let preview = match self.previews.as_mut() {
            Some(store) => match store.publish(frame, &artifact) {
                Ok(files) => Some(files),
                Err(err) => {
                    log::warn!("preview not saved: {:#}", err);
                    None
                }
            },
            None => None,
        };
        log::info!(
            "hand session {}: submitting {} ({}x{}, {} bytes)",
            request.session_id,
            artifact.filename,
            artifact.width,
            artifact.height,
            artifact.jpeg.len()
        );
        self.emit(SessionEvent::Captured {
            session_id: request.session_id,
            filename: artifact.filename.clone(),
            bytes: artifact.jpeg.len(),
            preview,
            manual: request.manual,
        });

        let classifier = self.session.classifier.clone();
        let outcomes = self.outcomes.0.clone();
        let session_id = request.session_id;
        std::thread::spawn(move || {
            let result = classifier.classify(&artifact.jpeg, &artifact.filename);
            // the session may be gone by now; its result is then dropped
            let _ = outcomes.send(Outcome { session_id, result });
        });
    }

    /// Restart the camera after repeated read failures. Returns `false` once
    /// the camera is considered lost.
    fn reconnect_camera(&mut self, last_error: &anyhow::Error) -> bool {
        let url = self.session.camera.config().url.clone();
        if self.reconnects >= MAX_RECONNECTS {
            self.report_camera_lost(format!(
                "{} gave no frame after {} reconnects: {:#}",
                url, self.reconnects, last_error
            ));
            return false;
        }
        self.reconnects += 1;
        log::warn!(
            "camera {} failing ({} reads, last: {:#}); reconnecting ({}/{})",
            url,
            self.frame_failures,
            last_error,
            self.reconnects,
            MAX_RECONNECTS
        );
        self.session.camera.stop();
        match self.session.camera.start() {
            Ok(()) => {
                self.frame_failures = 0;
                true
            }
            Err(err) => {
                self.report_camera_lost(format!("{}: {:#}", url, err));
                false
            }
        }
    }

    fn report_camera_lost(&self, detail: String) {
        let err = CaptureError::CameraLost(detail);
        log::error!("{}", err);
        self.emit(SessionEvent::Failed {
            session_id: self.session.tracker.state().session_id,
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    fn collect_outcomes(&mut self) {
        while let Ok(outcome) = self.outcomes.1.try_recv() {
            match outcome.result {
                Ok(classification) => {
                    log::info!(
                        "hand session {}: label {:?}",
                        outcome.session_id,
                        classification.label
                    );
                    self.emit(SessionEvent::Classified {
                        session_id: outcome.session_id,
                        classification,
                    });
                }
                Err(err) => self.report_failure(outcome.session_id, err),
            }
            self.session.orchestrator.finish_submission(Instant::now());
        }
    }

    fn report_failure(&self, session_id: u64, err: CaptureError) {
        log::warn!("hand session {}: {}", session_id, err);
        self.emit(SessionEvent::Failed {
            session_id,
            kind: err.kind(),
            message: failure_message(&err),
        });
    }

    fn publish_status(&mut self, hand: HandState) {
        let orchestrator = &self.session.orchestrator;
        let key = (
            orchestrator.state(),
            hand.hand_detected,
            hand.hand_stable,
            orchestrator.status_text(),
        );
        if self.last_status.as_ref() == Some(&key) {
            return;
        }
        self.emit(SessionEvent::Status {
            state: key.0,
            hand,
            text: key.3.clone(),
        });
        self.last_status = Some(key);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn shut_down(&mut self) {
        self.session.tracker.disable();
        self.session.orchestrator.stop_camera();
        let stats = self.session.camera.stats();
        self.session.camera.stop();
        if let Some(store) = self.previews.as_mut() {
            store.clear();
        }
        self.emit(SessionEvent::Stopped);
        log::info!(
            "capture session stopped ({} frames from {}, {} skipped by the detector)",
            stats.frames_captured,
            stats.source,
            self.session.tracker.skipped_frames()
        );
    }
}

/// User-facing text for a failed submission.
pub fn failure_message(err: &CaptureError) -> String {
    match err {
        CaptureError::UpstreamHttpError { status, payload } => payload
            .get("error")
            .and_then(|e| e.as_str())
            .map(|e| format!("{} (status {})", e, status))
            .unwrap_or_else(|| err.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_text_is_preferred() {
        let err = CaptureError::UpstreamHttpError {
            status: 502,
            payload: serde_json::json!({"error": "model offline"}),
        };
        assert_eq!(failure_message(&err), "model offline (status 502)");
        let err = CaptureError::UpstreamHttpError {
            status: 502,
            payload: serde_json::Value::Null,
        };
        assert_eq!(failure_message(&err), "prediction service returned status 502");
    }
}
