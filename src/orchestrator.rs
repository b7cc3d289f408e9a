//! Capture orchestration.
//!
//! `CaptureOrchestrator` decides when to capture. It is a plain state
//! machine driven by the caller: feed it the tracker state and the current
//! instant on every frame, act on the returned `SubmitRequest`, and report
//! back with `finish_submission` once the classifier answered.
//!
//! ```text
//! Idle --start--> WaitingForHand --stable, new session--> Counting(3)
//! Counting(n) --1s--> Counting(n-1) ... Counting(0) --> Submitting
//! Counting(_) --hand lost/unstable--> WaitingForHand
//! Submitting --finish (+cooldown)--> WaitingForHand
//! any --stop--> Idle
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use crate::geometry::BoundingBoxPx;
use crate::tracker::HandState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    /// Camera off.
    Idle,
    WaitingForHand,
    /// Seconds left before capture.
    Counting(u32),
    Submitting,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "idle"),
            CaptureState::WaitingForHand => write!(f, "waiting for hand"),
            CaptureState::Counting(n) => write!(f, "counting ({})", n),
            CaptureState::Submitting => write!(f, "submitting"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// First countdown value.
    pub countdown_start: u32,
    /// Interval between countdown steps.
    pub tick: Duration,
    /// Quiet period after a submission before a new countdown may start.
    pub cooldown: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            countdown_start: 3,
            tick: Duration::from_secs(1),
            cooldown: Duration::from_secs(2),
        }
    }
}

/// Emitted exactly once per capture; the caller crops and submits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitRequest {
    pub session_id: u64,
    pub bounding_box: BoundingBoxPx,
    pub manual: bool,
}

/// Countdown ticker. Each `poll` consumes the ticks that are due.
#[derive(Clone, Copy, Debug)]
pub struct Countdown {
    remaining: u32,
    next_tick: Instant,
    tick: Duration,
}

impl Countdown {
    pub fn start(from: u32, tick: Duration, now: Instant) -> Self {
        Self {
            remaining: from,
            next_tick: now + tick,
            tick,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Advance to `now`; returns the remaining count.
    pub fn poll(&mut self, now: Instant) -> u32 {
        while self.remaining > 0 && now >= self.next_tick {
            self.remaining -= 1;
            self.next_tick += self.tick;
        }
        self.remaining
    }
}

pub struct CaptureOrchestrator {
    settings: OrchestratorSettings,
    state: CaptureState,
    countdown: Option<Countdown>,
    /// Session already captured; blocks re-triggering on the same placement.
    captured_session: Option<u64>,
    cooldown_until: Option<Instant>,
    hand: HandState,
    submissions: u64,
}

impl CaptureOrchestrator {
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self {
            settings,
            state: CaptureState::Idle,
            countdown: None,
            captured_session: None,
            cooldown_until: None,
            hand: HandState::default(),
            submissions: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Total submissions requested since construction.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    pub fn start_camera(&mut self) {
        if self.state == CaptureState::Idle {
            self.transition(CaptureState::WaitingForHand);
        }
    }

    /// Back to `Idle`, dropping countdown, captured marker and cooldown.
    pub fn stop_camera(&mut self) {
        self.countdown = None;
        self.captured_session = None;
        self.cooldown_until = None;
        self.hand = HandState::default();
        self.transition(CaptureState::Idle);
    }

    /// Advance with the latest tracker output.
    pub fn update(&mut self, hand: &HandState, now: Instant) -> Option<SubmitRequest> {
        self.hand = *hand;
        match self.state {
            CaptureState::Idle | CaptureState::Submitting => None,
            CaptureState::WaitingForHand => {
                if self.may_start_countdown(now) {
                    self.countdown = Some(Countdown::start(
                        self.settings.countdown_start,
                        self.settings.tick,
                        now,
                    ));
                    self.transition(CaptureState::Counting(self.settings.countdown_start));
                    // a zero-length countdown fires right away
                    return self.advance_countdown(now);
                }
                None
            }
            CaptureState::Counting(_) => {
                if !(hand.hand_detected && hand.hand_stable) {
                    log::debug!("hand moved or left; countdown aborted");
                    self.countdown = None;
                    self.transition(CaptureState::WaitingForHand);
                    return None;
                }
                self.advance_countdown(now)
            }
        }
    }

    /// Capture now, skipping the countdown. Needs a detected hand with a box
    /// and is ignored while a submission is in flight or the camera is off.
    pub fn request_capture(&mut self) -> Option<SubmitRequest> {
        match self.state {
            CaptureState::WaitingForHand | CaptureState::Counting(_) => {}
            _ => return None,
        }
        if !self.hand.hand_detected {
            return None;
        }
        let bounding_box = self.hand.bounding_box?;
        self.countdown = None;
        Some(self.begin_submission(bounding_box, true))
    }

    /// The classifier answered (success or failure).
    pub fn finish_submission(&mut self, now: Instant) {
        if self.state != CaptureState::Submitting {
            return;
        }
        if !self.settings.cooldown.is_zero() {
            self.cooldown_until = Some(now + self.settings.cooldown);
        }
        self.transition(CaptureState::WaitingForHand);
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// One-line status for display.
    pub fn status_text(&self) -> String {
        match self.state {
            CaptureState::Idle => "Turn the camera on.".to_string(),
            CaptureState::Submitting => "Sending and processing...".to_string(),
            CaptureState::Counting(n) => format!("Hold your hand still... photo in {}s", n),
            CaptureState::WaitingForHand if !self.hand.hand_detected => {
                "Place your hand in the frame.".to_string()
            }
            CaptureState::WaitingForHand if !self.hand.hand_stable => {
                "Hold your hand still to capture.".to_string()
            }
            CaptureState::WaitingForHand => "Stable hand detected.".to_string(),
        }
    }

    fn may_start_countdown(&self, now: Instant) -> bool {
        let hand = &self.hand;
        hand.hand_detected
            && hand.hand_stable
            && hand.bounding_box.is_some()
            && self.captured_session != Some(hand.session_id)
            && !self.in_cooldown(now)
    }

    fn advance_countdown(&mut self, now: Instant) -> Option<SubmitRequest> {
        let remaining = self.countdown.as_mut()?.poll(now);
        if remaining > 0 {
            if self.state != CaptureState::Counting(remaining) {
                self.transition(CaptureState::Counting(remaining));
            }
            return None;
        }
        self.countdown = None;
        let Some(bounding_box) = self.hand.bounding_box else {
            self.transition(CaptureState::WaitingForHand);
            return None;
        };
        Some(self.begin_submission(bounding_box, false))
    }

    fn begin_submission(&mut self, bounding_box: BoundingBoxPx, manual: bool) -> SubmitRequest {
        let session_id = self.hand.session_id;
        self.captured_session = Some(session_id);
        self.submissions += 1;
        self.transition(CaptureState::Submitting);
        SubmitRequest {
            session_id,
            bounding_box,
            manual,
        }
    }

    fn transition(&mut self, next: CaptureState) {
        if self.state != next {
            log::debug!("capture state: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}
