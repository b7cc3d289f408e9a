use std::io::Write;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use signcap::{
    build_backend, Camera, CameraConfig, CaptureError, CaptureOrchestrator, CaptureSession,
    CaptureState, Classification, Classifier, DetectorSettings, HandTracker,
    OrchestratorSettings, SessionEvent, SessionHandle, SessionSettings, TrackerSettings,
};

/// Answers every request with a fixed outcome and keeps the images it got.
struct FakeClassifier {
    calls: AtomicUsize,
    images: Mutex<Vec<(String, Vec<u8>)>>,
    fail: bool,
}

impl FakeClassifier {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            images: Mutex::new(Vec::new()),
            fail,
        })
    }
}

impl Classifier for FakeClassifier {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn classify(&self, image: &[u8], filename: &str) -> Result<Classification, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.images
            .lock()
            .unwrap()
            .push((filename.to_string(), image.to_vec()));
        if self.fail {
            return Err(CaptureError::UpstreamHttpError {
                status: 503,
                payload: serde_json::json!({"error": "model loading"}),
            });
        }
        Ok(Classification {
            label: "5".to_string(),
            confidence: Some(91.0),
            raw: serde_json::json!({"prediccion": "5"}),
        })
    }
}

fn session(
    url: &str,
    classifier: Arc<FakeClassifier>,
    preview_dir: Option<std::path::PathBuf>,
) -> SessionHandle {
    let camera = Camera::new(CameraConfig {
        url: url.to_string(),
        target_fps: 200,
        width: 320,
        height: 240,
    })
    .unwrap();
    let tracker = HandTracker::new(
        build_backend(&DetectorSettings::default()).unwrap(),
        TrackerSettings::default(),
    );
    let orchestrator = CaptureOrchestrator::new(OrchestratorSettings {
        countdown_start: 3,
        tick: Duration::from_millis(20),
        cooldown: Duration::from_millis(50),
    });
    CaptureSession::new(
        camera,
        tracker,
        orchestrator,
        classifier,
        SessionSettings {
            preview_dir,
            ..SessionSettings::default()
        },
    )
    .spawn()
    .unwrap()
}

/// Collect events until `done` matches one or the deadline passes.
fn wait_for(
    handle: &SessionHandle,
    within: Duration,
    mut done: impl FnMut(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + within;
    let mut seen = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match handle.events().recv_timeout(left) {
            Ok(event) => {
                let stop = done(&event);
                seen.push(event);
                if stop {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    seen
}

#[test]
fn still_hand_is_captured_and_classified_once() {
    let previews = tempfile::tempdir().unwrap();
    let classifier = FakeClassifier::new(false);
    let handle = session(
        "stub://still",
        classifier.clone(),
        Some(previews.path().to_path_buf()),
    );

    let events = wait_for(&handle, Duration::from_secs(10), |e| {
        matches!(e, SessionEvent::Classified { .. })
    });

    let counted = events.iter().any(|e| {
        matches!(
            e,
            SessionEvent::Status {
                state: CaptureState::Counting(_),
                ..
            }
        )
    });
    assert!(counted, "countdown never started: {:?}", events);

    let (captured_session, preview) = events
        .iter()
        .find_map(|e| match e {
            SessionEvent::Captured {
                session_id,
                preview,
                manual,
                ..
            } => {
                assert!(!manual);
                Some((*session_id, preview.clone()))
            }
            _ => None,
        })
        .expect("a capture");
    let preview = preview.expect("preview files");
    for path in [&preview.capture, &preview.square, &preview.overlay] {
        assert!(path.starts_with(previews.path()));
        assert!(path.exists(), "{} missing", path.display());
    }
    let square = image::open(&preview.square).expect("square preview");
    assert_eq!((square.width(), square.height()), (220, 220));
    let overlay = image::open(&preview.overlay).expect("overlay");
    assert_eq!((overlay.width(), overlay.height()), (320, 240));

    match events.last() {
        Some(SessionEvent::Classified {
            session_id,
            classification,
        }) => {
            assert_eq!(*session_id, captured_session);
            assert_eq!(classification.label, "5");
        }
        other => panic!("expected a classification, got {:?}", other),
    }

    // the same placement never triggers again
    let later = wait_for(&handle, Duration::from_millis(600), |_| false);
    assert!(!later
        .iter()
        .any(|e| matches!(e, SessionEvent::Captured { .. })));
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    let images = classifier.images.lock().unwrap().clone();
    let (filename, jpeg) = &images[0];
    assert!(filename.starts_with("hand-") && filename.ends_with(".jpg"));
    let decoded = image::load_from_memory(jpeg).expect("submitted crop is a JPEG");
    assert!(decoded.width() < 320 && decoded.height() < 240);
    assert!(decoded.width() > 0 && decoded.height() > 0);

    assert_eq!(std::fs::read(&preview.capture).unwrap(), *jpeg);

    handle.stop().unwrap();
    assert!(!preview.capture.exists());
    assert!(!preview.square.exists());
    assert!(!preview.overlay.exists());
}

#[test]
fn empty_scene_never_submits() {
    let classifier = FakeClassifier::new(false);
    let handle = session("stub://empty", classifier.clone(), None);

    let events = wait_for(&handle, Duration::from_millis(500), |_| false);
    assert!(events.iter().all(|e| !matches!(
        e,
        SessionEvent::Captured { .. } | SessionEvent::Classified { .. }
    )));
    match events.first() {
        Some(SessionEvent::Status { text, hand, .. }) => {
            assert!(!hand.hand_detected);
            assert_eq!(text, "Place your hand in the frame.");
        }
        other => panic!("expected a status first, got {:?}", other),
    }

    handle.request_capture().unwrap();
    let events = wait_for(&handle, Duration::from_millis(300), |_| false);
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::Captured { .. })));
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);

    handle.stop().unwrap();
}

#[test]
fn manual_capture_of_a_moving_hand() {
    let classifier = FakeClassifier::new(false);
    let handle = session("stub://moving", classifier.clone(), None);

    wait_for(&handle, Duration::from_secs(5), |e| {
        matches!(e, SessionEvent::Status { hand, .. } if hand.hand_detected)
    });
    handle.request_capture().unwrap();

    let events = wait_for(&handle, Duration::from_secs(5), |e| {
        matches!(e, SessionEvent::Classified { .. })
    });
    let manual = events.iter().find_map(|e| match e {
        SessionEvent::Captured { manual, .. } => Some(*manual),
        _ => None,
    });
    assert_eq!(manual, Some(true));
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    handle.stop().unwrap();
}

#[test]
fn failed_submission_is_reported_and_not_retried() {
    let classifier = FakeClassifier::new(true);
    let handle = session("stub://still", classifier.clone(), None);

    let events = wait_for(&handle, Duration::from_secs(10), |e| {
        matches!(e, SessionEvent::Failed { .. })
    });
    match events.last() {
        Some(SessionEvent::Failed { kind, message, .. }) => {
            assert_eq!(*kind, "upstream_http_error");
            assert!(message.contains("model loading"));
        }
        other => panic!("expected a failure, got {:?}", other),
    }

    let later = wait_for(&handle, Duration::from_millis(500), |_| false);
    assert!(later.iter().any(|e| matches!(
        e,
        SessionEvent::Status {
            state: CaptureState::WaitingForHand,
            ..
        }
    )));
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    handle.stop().unwrap();
}

#[test]
fn stopping_emits_stopped() {
    let classifier = FakeClassifier::new(false);
    let handle = session("stub://empty?warmup=5", classifier, None);
    assert!(handle.is_running());
    std::thread::sleep(Duration::from_millis(100));

    handle.request_stop();
    let events = wait_for(&handle, Duration::from_secs(2), |e| {
        matches!(e, SessionEvent::Stopped)
    });
    assert!(matches!(events.last(), Some(SessionEvent::Stopped)));
    assert!(handle.events().recv_timeout(Duration::from_millis(200)).is_err());
    handle.stop().unwrap();
}

/// MJPEG camera that serves a single frame, then closes and stops listening.
fn one_frame_camera() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/stream", listener.local_addr().unwrap());
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 80)
        .encode_image(&image::RgbImage::from_pixel(320, 240, image::Rgb([30, 30, 40])))
        .unwrap();
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _ = signcap::api::read_full_request(&mut stream, 1024);
        let mut reply = b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        reply.extend_from_slice(&jpeg);
        reply.extend_from_slice(b"\r\n");
        let _ = stream.write_all(&reply);
    });
    url
}

#[test]
fn lost_camera_is_reported_and_stops_the_session() {
    let classifier = FakeClassifier::new(false);
    let handle = session(&one_frame_camera(), classifier.clone(), None);

    let events = wait_for(&handle, Duration::from_secs(20), |e| {
        matches!(e, SessionEvent::Stopped)
    });
    let failure = events.iter().find_map(|e| match e {
        SessionEvent::Failed { kind, message, .. } => Some((*kind, message.clone())),
        _ => None,
    });
    let (kind, message) = failure.expect("camera loss is reported");
    assert_eq!(kind, "camera_lost");
    assert!(message.contains("/stream"), "{}", message);
    assert!(matches!(events.last(), Some(SessionEvent::Stopped)));

    let deadline = Instant::now() + Duration::from_secs(2);
    while handle.is_running() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!handle.is_running());
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    handle.stop().unwrap();
}
