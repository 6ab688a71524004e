//! Wake phrase gated speech capture
//!
//! The controller turns a stream of recognition events into discrete user
//! questions ([`Turn`]s). It holds no state of its own: every operation takes
//! the owned [`Session`] and returns the side effects the caller must carry
//! out (start the device, arm a timer, submit a turn, ...).
//!
//! ```text
//!            start                    wake phrase heard
//!   Idle ───────────────▶ AwaitingWake ─────────────────▶ Capturing
//!    ▲                        │ timeout / stop / error         │
//!    └────────────────────────┘                                │
//!    └──────────────── end of speech / stop (emit turn) ───────┘
//! ```
//!
//! With the wake phrase disabled, `start` goes straight to `Capturing`.

use std::time::Duration;

use uuid::Uuid;

use super::device::{DeviceErrorKind, UtteranceEvent};
use super::wake_word::WakePhrase;
use crate::Error;
use crate::health::BackendStatus;
use crate::notify::Notification;
use crate::voice::SpeechCapability;

/// Listening mode of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Not listening
    #[default]
    Idle,
    /// Listening for the wake phrase
    AwaitingWake,
    /// Wake phrase heard, capturing the question
    Capturing,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingWake => write!(f, "awaiting-wake"),
            Self::Capturing => write!(f, "capturing"),
        }
    }
}

/// Identifies one armed wake timeout; expiries of older timers are ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// A finalized user question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: Uuid,
    pub text: String,
}

impl Turn {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
        }
    }
}

/// State of a capture session
#[derive(Debug, Default)]
pub struct Session {
    mode: CaptureMode,
    accumulated: String,
    interim: String,
    wake_timeout: Option<TimerToken>,
    next_token: u64,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mode
    #[must_use]
    pub const fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Final text captured so far
    #[must_use]
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Latest interim text, for display only
    #[must_use]
    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Token of the armed wake timeout, if any
    #[must_use]
    pub const fn wake_timeout(&self) -> Option<TimerToken> {
        self.wake_timeout
    }

    fn enter(&mut self, mode: CaptureMode) {
        tracing::debug!(from = %self.mode, to = %mode, "capture mode changed");
        self.mode = mode;
        self.accumulated.clear();
        self.interim.clear();
    }

    fn append_final(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.accumulated.is_empty() {
            self.accumulated.push(' ');
        }
        self.accumulated.push_str(text);
    }

    fn arm_timer(&mut self) -> TimerToken {
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.wake_timeout = Some(token);
        token
    }
}

/// Side effect requested by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start the speech device
    StartDevice,
    /// Stop the speech device
    StopDevice,
    /// Stop and start the device again, keeping the session
    RestartDevice,
    /// Call [`SpeechCaptureController::on_wake_timeout`] with `token` after `after`
    ArmWakeTimeout { token: TimerToken, after: Duration },
    /// Forget the timer with this token
    CancelWakeTimeout(TimerToken),
    /// New transient transcript for display
    Interim(String),
    /// Submit this question
    EmitTurn(Turn),
    /// Tell the user
    Notify(Notification),
}

/// Conditions checked before capture may start
#[derive(Debug, Clone)]
pub struct StartGate {
    /// An answer is still being fetched
    pub answer_pending: bool,
    /// Result of the last backend health check
    pub backend: BackendStatus,
}

impl StartGate {
    /// Gate with nothing pending and a ready backend
    #[must_use]
    pub const fn open() -> Self {
        Self {
            answer_pending: false,
            backend: BackendStatus::Ready,
        }
    }
}

/// Capture options
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Wake phrase, or `None` to capture immediately on start
    pub wake_phrase: Option<WakePhrase>,
    /// How long to wait for the wake phrase
    pub wake_timeout: Duration,
}

/// Speech capture state machine
#[derive(Debug, Clone)]
pub struct SpeechCaptureController {
    options: CaptureOptions,
    capability: SpeechCapability,
}

impl SpeechCaptureController {
    #[must_use]
    pub const fn new(options: CaptureOptions, capability: SpeechCapability) -> Self {
        Self {
            options,
            capability,
        }
    }

    /// Configured options
    #[must_use]
    pub const fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Begin listening
    ///
    /// No-op unless idle with no answer pending. An unready backend or
    /// missing recognizer is reported once for this attempt and the session
    /// stays idle.
    pub fn start(&self, session: &mut Session, gate: &StartGate) -> Vec<Effect> {
        if session.mode != CaptureMode::Idle {
            tracing::debug!(mode = %session.mode, "start ignored, already listening");
            return Vec::new();
        }
        if gate.answer_pending {
            tracing::debug!("start rejected, answer pending");
            return Vec::new();
        }

        if let BackendStatus::Misconfigured(reason) = &gate.backend {
            tracing::warn!(reason, "capture blocked by backend configuration");
            return vec![Effect::Notify(Notification::from_error(
                "Configuration Error",
                &Error::Config(reason.clone()),
            ))];
        }

        if !self.capability.is_available() {
            tracing::warn!("capture blocked, no speech recognizer available");
            return vec![Effect::Notify(Notification::from_error(
                "Speech Recognition Unavailable",
                &Error::Config("speech recognition is not supported here".to_string()),
            ))];
        }

        match &self.options.wake_phrase {
            Some(wake) => {
                session.enter(CaptureMode::AwaitingWake);
                let token = session.arm_timer();
                tracing::info!(wake_phrase = wake.phrase(), "listening for wake phrase");
                vec![
                    Effect::StartDevice,
                    Effect::ArmWakeTimeout {
                        token,
                        after: self.options.wake_timeout,
                    },
                ]
            }
            None => {
                session.enter(CaptureMode::Capturing);
                tracing::info!("capturing question");
                vec![Effect::StartDevice]
            }
        }
    }

    /// Force the session to idle
    ///
    /// Emits a turn if text was captured.
    pub fn stop(&self, session: &mut Session) -> Vec<Effect> {
        match session.mode {
            CaptureMode::Idle => Vec::new(),
            CaptureMode::AwaitingWake => Self::leave_awaiting_wake(session),
            CaptureMode::Capturing => Self::finish_capture(session),
        }
    }

    /// Process one batch of recognition results
    pub fn on_utterance(&self, session: &mut Session, event: &UtteranceEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut interim = String::new();

        for segment in &event.segments {
            if !segment.is_final {
                interim.push_str(&segment.text);
                continue;
            }

            match session.mode {
                CaptureMode::Idle => {}
                CaptureMode::Capturing => session.append_final(&segment.text),
                CaptureMode::AwaitingWake => {
                    let Some(wake) = &self.options.wake_phrase else {
                        continue;
                    };
                    if !wake.matches(&segment.text) {
                        tracing::trace!(text = %segment.text, "no wake phrase");
                        continue;
                    }

                    tracing::info!(text = %segment.text, "wake phrase detected");
                    if let Some(token) = session.wake_timeout.take() {
                        effects.push(Effect::CancelWakeTimeout(token));
                    }
                    session.enter(CaptureMode::Capturing);
                    if let Some(rest) = wake.remainder(&segment.text) {
                        session.append_final(rest);
                    }
                }
            }
        }

        if session.mode == CaptureMode::Idle {
            tracing::trace!("utterance ignored while idle");
            return effects;
        }

        session.interim = interim.trim().to_string();
        effects.push(Effect::Interim(session.interim.clone()));
        effects
    }

    /// The device reported the end of speech
    pub fn on_end_of_speech(&self, session: &mut Session) -> Vec<Effect> {
        match session.mode {
            CaptureMode::Idle => Vec::new(),
            CaptureMode::AwaitingWake => {
                tracing::debug!("speech ended before wake phrase, restarting device");
                session.interim.clear();
                vec![Effect::RestartDevice]
            }
            CaptureMode::Capturing => Self::finish_capture(session),
        }
    }

    /// The device reported an error
    pub fn on_device_error(&self, session: &mut Session, kind: &DeviceErrorKind) -> Vec<Effect> {
        if !kind.is_fatal() {
            tracing::debug!(error = %kind, "transient device error ignored");
            return Vec::new();
        }

        tracing::warn!(error = %kind, mode = %session.mode, "speech device failed");
        let mut effects = match session.mode {
            CaptureMode::Idle => Vec::new(),
            CaptureMode::AwaitingWake => Self::leave_awaiting_wake(session),
            CaptureMode::Capturing => {
                session.enter(CaptureMode::Idle);
                vec![Effect::StopDevice]
            }
        };
        effects.push(Effect::Notify(Notification::from_error(
            "Speech Recognition Error",
            &Error::Device(kind.clone()),
        )));
        effects
    }

    /// A wake timeout fired
    pub fn on_wake_timeout(&self, session: &mut Session, token: TimerToken) -> Vec<Effect> {
        if session.mode != CaptureMode::AwaitingWake || session.wake_timeout != Some(token) {
            tracing::trace!(?token, "stale wake timeout ignored");
            return Vec::new();
        }

        tracing::info!("wake phrase not heard, going idle");
        session.wake_timeout = None;
        session.enter(CaptureMode::Idle);
        vec![Effect::StopDevice]
    }

    fn leave_awaiting_wake(session: &mut Session) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(token) = session.wake_timeout.take() {
            effects.push(Effect::CancelWakeTimeout(token));
        }
        session.enter(CaptureMode::Idle);
        effects.push(Effect::StopDevice);
        effects
    }

    fn finish_capture(session: &mut Session) -> Vec<Effect> {
        let text = session.accumulated.trim().to_string();
        session.enter(CaptureMode::Idle);

        let mut effects = vec![Effect::StopDevice];
        if text.is_empty() {
            tracing::debug!("capture ended without a question");
        } else {
            tracing::info!(question = %text, "question captured");
            effects.push(Effect::EmitTurn(Turn::new(text)));
        }
        effects
    }
}
