//! Per-frame hand tracking.
//!
//! The tracker turns backend detections into a padded pixel bounding box,
//! a stability signal and a hand session counter. It never fails: frames
//! that are not ready or whose detection errors out are absorbed here and
//! the next frame simply tries again.

use crate::detect::{Detection, DetectorBackend};
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::geometry::{self, BoundingBoxPx, NormalizedRoi};

/// Tracker output for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandState {
    pub hand_detected: bool,
    pub hand_stable: bool,
    pub bounding_box: Option<BoundingBoxPx>,
    /// `0` until the first hand appears; +1 on every absent -> present edge.
    pub session_id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerSettings {
    /// Padding around the landmark envelope, as a fraction of its size.
    pub padding: f32,
    /// Maximum movement of the box centre (normalized) that still counts as still.
    pub stability_threshold: f32,
    /// Consecutive still frames needed before the hand is stable.
    pub stable_frames: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            padding: 0.12,
            stability_threshold: 0.01,
            stable_frames: 15,
        }
    }
}

pub struct HandTracker {
    backend: Box<dyn DetectorBackend>,
    settings: TrackerSettings,
    enabled: bool,
    state: HandState,
    last_centroid: Option<(f32, f32)>,
    still_frames: u32,
    skipped_frames: u64,
}

impl HandTracker {
    /// New trackers start disabled.
    pub fn new(backend: Box<dyn DetectorBackend>, settings: TrackerSettings) -> Self {
        Self {
            backend,
            settings,
            enabled: false,
            state: HandState::default(),
            last_centroid: None,
            still_frames: 0,
            skipped_frames: 0,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn enable(&mut self) {
        if !self.enabled {
            self.reset();
            self.enabled = true;
        }
    }

    /// Stop tracking and forget everything, including the session counter.
    pub fn disable(&mut self) {
        self.reset();
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> HandState {
        self.state
    }

    /// Frames whose detection failed and were skipped.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    /// Process one frame and return the updated state.
    pub fn process(&mut self, frame: &Frame) -> HandState {
        if !self.enabled {
            return HandState::default();
        }
        if !frame.is_ready() {
            log::trace!("frame {}: {}", frame.sequence, CaptureError::DeviceNotReady);
            self.lose_hand();
            return self.state;
        }

        match self.backend.detect(frame) {
            Err(err) => {
                self.skipped_frames += 1;
                log::debug!(
                    "frame {}: {}",
                    frame.sequence,
                    CaptureError::DetectionTransientFailure(format!("{:#}", err))
                );
            }
            Ok(None) => self.lose_hand(),
            Ok(Some(Detection::Landmarks(points))) => {
                self.observe_landmarks(&points, frame.width(), frame.height())
            }
            Ok(Some(Detection::Region(roi))) => {
                self.last_centroid = Some(roi.center());
                self.mark_present(roi.to_pixels(frame.width(), frame.height()), true);
            }
        }
        self.state
    }

    fn observe_landmarks(&mut self, points: &[geometry::Landmark], width: u32, height: u32) {
        let Some(envelope) = NormalizedRoi::envelope(points) else {
            self.lose_hand();
            return;
        };
        let region = envelope.padded(self.settings.padding).clamped();
        // stability follows the box, not the landmark count inside it
        let center = region.center();

        self.still_frames = match self.last_centroid {
            Some(prev) if geometry::distance(prev, center) < self.settings.stability_threshold => {
                self.still_frames.saturating_add(1)
            }
            _ => 0,
        };
        self.last_centroid = Some(center);

        let stable = self.still_frames >= self.settings.stable_frames;
        self.mark_present(region.to_pixels(width, height), stable);
    }

    fn mark_present(&mut self, bounding_box: Option<BoundingBoxPx>, stable: bool) {
        if !self.state.hand_detected {
            self.state.session_id += 1;
            log::debug!("hand session {} started", self.state.session_id);
        }
        self.state.hand_detected = true;
        self.state.hand_stable = stable;
        self.state.bounding_box = bounding_box;
    }

    fn lose_hand(&mut self) {
        self.state.hand_detected = false;
        self.state.hand_stable = false;
        self.state.bounding_box = None;
        self.last_centroid = None;
        self.still_frames = 0;
    }

    fn reset(&mut self) {
        self.lose_hand();
        self.state = HandState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FixedRoiBackend;
    use crate::geometry::Landmark;
    use anyhow::{anyhow, Result};
    use std::collections::VecDeque;

    /// Replays a fixed list of detection outcomes, then reports no hand.
    struct Scripted {
        outcomes: VecDeque<Result<Option<Detection>>>,
    }

    impl DetectorBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Option<Detection>> {
            self.outcomes.pop_front().unwrap_or(Ok(None))
        }
    }

    fn hand_at(cx: f32, cy: f32) -> Result<Option<Detection>> {
        Ok(Some(Detection::Landmarks(vec![
            Landmark::new(cx - 0.1, cy - 0.1),
            Landmark::new(cx + 0.1, cy + 0.1),
        ])))
    }

    fn tracker(outcomes: Vec<Result<Option<Detection>>>) -> HandTracker {
        let mut t = HandTracker::new(
            Box::new(Scripted {
                outcomes: outcomes.into(),
            }),
            TrackerSettings::default(),
        );
        t.enable();
        t
    }

    fn frame() -> Frame {
        Frame::from_rgb(vec![0u8; 100 * 100 * 3], 100, 100, 1).unwrap()
    }

    #[test]
    fn empty_frames_never_detect() {
        let mut t = tracker((0..30).map(|_| Ok(None)).collect());
        for _ in 0..30 {
            let s = t.process(&frame());
            assert!(!s.hand_detected);
            assert!(!s.hand_stable);
            assert!(s.bounding_box.is_none());
        }
        let mut t = tracker(vec![Ok(Some(Detection::Landmarks(vec![])))]);
        assert!(!t.process(&frame()).hand_detected);
    }

    #[test]
    fn session_increments_once_per_appearance() {
        let mut script: Vec<_> = (0..5).map(|_| hand_at(0.5, 0.5)).collect();
        script.push(Ok(None));
        script.extend((0..3).map(|_| hand_at(0.5, 0.5)));
        let mut t = tracker(script);

        for _ in 0..5 {
            assert_eq!(t.process(&frame()).session_id, 1);
        }
        let gone = t.process(&frame());
        assert!(!gone.hand_detected);
        assert_eq!(gone.session_id, 1);
        for _ in 0..3 {
            assert_eq!(t.process(&frame()).session_id, 2);
        }
    }

    #[test]
    fn stability_needs_fifteen_still_frames() {
        let mut t = tracker((0..16).map(|_| hand_at(0.5, 0.5)).collect());
        for i in 0..15 {
            let s = t.process(&frame());
            assert!(s.hand_detected);
            assert!(!s.hand_stable, "stable too early at frame {}", i);
        }
        assert!(t.process(&frame()).hand_stable);
    }

    #[test]
    fn one_jump_resets_the_counter() {
        let mut script: Vec<_> = (0..10).map(|_| hand_at(0.5, 0.5)).collect();
        script.push(hand_at(0.52, 0.5));
        script.extend((0..15).map(|_| hand_at(0.52, 0.5)));
        let mut t = tracker(script);

        for _ in 0..11 {
            assert!(!t.process(&frame()).hand_stable);
        }
        for _ in 0..14 {
            assert!(!t.process(&frame()).hand_stable);
        }
        assert!(t.process(&frame()).hand_stable);
    }

    #[test]
    fn small_drift_stays_stable() {
        let script: Vec<_> = (0..20)
            .map(|i| hand_at(0.5 + 0.005 * (i % 2) as f32, 0.5))
            .collect();
        let mut t = tracker(script);
        let last = (0..20).map(|_| t.process(&frame())).last().unwrap();
        assert!(last.hand_stable);
    }

    #[test]
    fn interior_points_do_not_break_stability() {
        // same envelope every frame, extra points inside it on every other frame
        let script: Vec<_> = (0..20)
            .map(|i| {
                let mut points = vec![Landmark::new(0.2, 0.2), Landmark::new(0.6, 0.6)];
                if i % 2 == 1 {
                    points.extend([
                        Landmark::new(0.25, 0.25),
                        Landmark::new(0.3, 0.25),
                        Landmark::new(0.25, 0.3),
                        Landmark::new(0.3, 0.3),
                    ]);
                }
                Ok(Some(Detection::Landmarks(points)))
            })
            .collect();
        let mut t = tracker(script);
        let states: Vec<_> = (0..20).map(|_| t.process(&frame())).collect();
        assert!(states.iter().all(|s| s.bounding_box == states[0].bounding_box));
        assert!(!states[14].hand_stable);
        assert!(states[15].hand_stable);
        assert!(states[19].hand_stable);
    }

    #[test]
    fn bounding_box_is_padded_and_in_pixels() {
        let mut t = tracker(vec![hand_at(0.5, 0.5)]);
        let bbox = t.process(&frame()).bounding_box.unwrap();
        // envelope 0.4..0.6, padded by 12% of 0.2 on each side
        assert_eq!(
            bbox,
            BoundingBoxPx {
                x: 38,
                y: 38,
                width: 24,
                height: 24
            }
        );
    }

    #[test]
    fn detection_errors_skip_the_frame() {
        let mut t = tracker(vec![
            hand_at(0.5, 0.5),
            Err(anyhow!("inference hiccup")),
            hand_at(0.5, 0.5),
        ]);
        let first = t.process(&frame());
        let skipped = t.process(&frame());
        assert_eq!(first, skipped);
        assert_eq!(t.skipped_frames(), 1);
        assert_eq!(t.process(&frame()).session_id, 1);
    }

    #[test]
    fn unready_frames_drop_the_hand() {
        let mut t = tracker(vec![hand_at(0.5, 0.5), hand_at(0.5, 0.5)]);
        assert!(t.process(&frame()).hand_detected);
        assert!(!t.process(&Frame::not_ready(2)).hand_detected);
        assert_eq!(t.process(&frame()).session_id, 2);
    }

    #[test]
    fn disable_resets_everything() {
        let mut t = tracker((0..20).map(|_| hand_at(0.5, 0.5)).collect());
        for _ in 0..16 {
            t.process(&frame());
        }
        assert!(t.state().hand_stable);

        t.disable();
        assert_eq!(t.state(), HandState::default());
        assert_eq!(t.process(&frame()), HandState::default());

        t.enable();
        let s = t.process(&frame());
        assert_eq!(s.session_id, 1);
        assert!(!s.hand_stable);
    }

    #[test]
    fn fixed_region_is_always_detected_and_stable() {
        let mut t = HandTracker::new(
            Box::new(FixedRoiBackend::default()),
            TrackerSettings::default(),
        );
        t.enable();
        assert!(!t.process(&Frame::not_ready(1)).hand_detected);
        let s = t.process(&Frame::from_rgb(vec![0u8; 640 * 480 * 3], 640, 480, 2).unwrap());
        assert!(s.hand_detected && s.hand_stable);
        assert_eq!(s.session_id, 1);
        assert_eq!(s.bounding_box.unwrap().width, 384);
    }
}
