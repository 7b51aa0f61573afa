//! Session state machine
//!
//! [`transition`] is pure: it maps the current state and one event to the
//! next state plus an ordered list of effects. The runner is the only place
//! effects touch devices, timers or the transport.
//!
//! Each state guards a fixed set of timers ([`guarded_timers`]). Leaving a
//! state cancels every timer it guarded that the next state does not, so a
//! timer can never fire for a condition that was already resolved.

use super::timers::TimerKind;
use super::SessionNotice;
use crate::vad::{VadEvent, VadMode};
use crate::VoxError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Listening,
    UserSpeaking,
    Processing,
    AiSpeaking,
    Error { reason: String },
}

impl SessionState {
    /// Whether a conversation is in progress (channel open, devices held)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Listening
                | SessionState::UserSpeaking
                | SessionState::Processing
                | SessionState::AiSpeaking
        )
    }

    /// Whether a new session may be opened from here
    pub fn can_open(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Error { .. })
    }

    /// How the VAD engine runs in this state
    pub fn vad_mode(&self) -> VadMode {
        match self {
            SessionState::Listening => VadMode::Listening,
            SessionState::UserSpeaking => VadMode::Segment,
            SessionState::AiSpeaking => VadMode::Playback,
            _ => VadMode::Paused,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Listening => write!(f, "listening"),
            SessionState::UserSpeaking => write!(f, "user_speaking"),
            SessionState::Processing => write!(f, "processing"),
            SessionState::AiSpeaking => write!(f, "ai_speaking"),
            SessionState::Error { .. } => write!(f, "error"),
        }
    }
}

/// Inputs to the state machine
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    OpenRequested,
    ChannelReady,
    Vad(VadEvent),
    TimerFired(TimerKind),
    /// Close the open segment now, as voice-end would
    CommitRequested,
    Transcript(String),
    ReplyText(String),
    /// One binary frame of reply audio
    ReplyAudio(Vec<u8>),
    /// Non-fatal error reported by the remote agent
    ServerError(String),
    PlaybackDrained,
    TransportError(String),
    TransportClosed,
    DeviceFailed(String),
    EndRequested,
}

/// Side effects, applied by the runner in order
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    OpenTransport,
    CloseTransport,
    SendEndSession,
    AcquireMicrophone,
    ReleaseMicrophone,
    SetVadMode(VadMode),
    OpenSegment,
    /// Close the open segment and transmit it unless degenerate
    FlushSegment,
    InterruptPlayback,
    /// Queue one reply payload for playback
    EnqueueReply(Vec<u8>),
    /// Whether binary frames still belong to the current reply
    AcceptReplyAudio(bool),
    ArmTimer(TimerKind),
    CancelTimer(TimerKind),
    CancelAllTimers,
    Notify(SessionNotice),
}

/// Timers that may be armed while in `state`
pub fn guarded_timers(state: &SessionState) -> &'static [TimerKind] {
    match state {
        SessionState::Listening => &[TimerKind::Inactivity, TimerKind::LongSilence],
        SessionState::UserSpeaking => &[
            TimerKind::Inactivity,
            TimerKind::SilenceConfirm,
            TimerKind::MaxSpeaking,
        ],
        SessionState::Processing | SessionState::AiSpeaking => &[TimerKind::Inactivity],
        _ => &[],
    }
}

/// Compute the next state and its effects
pub fn transition(state: &SessionState, event: Event) -> (SessionState, Vec<Effect>) {
    use Effect::*;
    use SessionState as S;

    let (next, effects) = match (state, event) {
        (S::Idle | S::Error { .. }, Event::OpenRequested) => (S::Connecting, vec![OpenTransport]),

        (S::Connecting, Event::ChannelReady) => (
            S::Listening,
            vec![
                AcquireMicrophone,
                SetVadMode(VadMode::Listening),
                ArmTimer(TimerKind::Inactivity),
                ArmTimer(TimerKind::LongSilence),
            ],
        ),

        // Listening: energy edges hold off the long-silence window
        (S::Listening, Event::Vad(VadEvent::VoiceStart)) => (S::UserSpeaking, start_segment()),
        (S::Listening, Event::Vad(VadEvent::Rise)) => {
            (S::Listening, vec![CancelTimer(TimerKind::LongSilence)])
        }
        (S::Listening, Event::Vad(VadEvent::Fall)) => {
            (S::Listening, vec![ArmTimer(TimerKind::LongSilence)])
        }
        (S::Listening, Event::TimerFired(TimerKind::LongSilence)) => {
            (S::Listening, vec![ArmTimer(TimerKind::LongSilence)])
        }

        // UserSpeaking: silence after the last fall closes the segment
        (S::UserSpeaking, Event::Vad(VadEvent::Fall)) => {
            (S::UserSpeaking, vec![ArmTimer(TimerKind::SilenceConfirm)])
        }
        (S::UserSpeaking, Event::Vad(VadEvent::Rise)) => {
            (S::UserSpeaking, vec![CancelTimer(TimerKind::SilenceConfirm)])
        }
        (
            S::UserSpeaking,
            Event::TimerFired(TimerKind::SilenceConfirm | TimerKind::MaxSpeaking)
            | Event::CommitRequested,
        ) => (
            S::Processing,
            vec![FlushSegment, SetVadMode(VadMode::Paused)],
        ),

        (S::Processing, Event::ReplyText(text)) => (
            S::AiSpeaking,
            vec![
                Notify(SessionNotice::Reply(text)),
                AcceptReplyAudio(true),
                SetVadMode(VadMode::Playback),
            ],
        ),
        (S::Processing, Event::ServerError(message)) => (
            S::Listening,
            vec![
                Notify(SessionNotice::ServerError(message)),
                SetVadMode(VadMode::Listening),
                ArmTimer(TimerKind::LongSilence),
            ],
        ),

        (S::AiSpeaking, Event::Vad(VadEvent::BargeIn)) => {
            let mut effects = vec![InterruptPlayback];
            effects.extend(start_segment());
            (S::UserSpeaking, effects)
        }
        (S::AiSpeaking, Event::PlaybackDrained) => (
            S::Listening,
            vec![
                SetVadMode(VadMode::Listening),
                ArmTimer(TimerKind::Inactivity),
                ArmTimer(TimerKind::LongSilence),
            ],
        ),
        (S::AiSpeaking, Event::ReplyText(text)) => (
            S::AiSpeaking,
            vec![Notify(SessionNotice::Reply(text)), AcceptReplyAudio(true)],
        ),
        // The reply failed part way, e.g. synthesis broke after reply_text
        (S::AiSpeaking, Event::ServerError(message)) => (
            S::Listening,
            vec![
                Notify(SessionNotice::ServerError(message)),
                InterruptPlayback,
                AcceptReplyAudio(false),
                SetVadMode(VadMode::Listening),
                ArmTimer(TimerKind::LongSilence),
            ],
        ),

        // Frames of the current reply play even after the queue ran dry
        (S::AiSpeaking, Event::ReplyAudio(payload)) => {
            (S::AiSpeaking, vec![EnqueueReply(payload)])
        }
        (S::Listening | S::Processing, Event::ReplyAudio(payload)) => (
            S::AiSpeaking,
            vec![SetVadMode(VadMode::Playback), EnqueueReply(payload)],
        ),

        (s, Event::Transcript(text)) if s.is_active() => {
            (s.clone(), vec![Notify(SessionNotice::Transcript(text))])
        }
        // A user already talking again keeps the turn
        (s, Event::ServerError(message)) if s.is_active() => {
            (s.clone(), vec![Notify(SessionNotice::ServerError(message))])
        }

        (S::Connecting, Event::EndRequested) => (S::Idle, end_session(false)),
        (s, Event::EndRequested | Event::TimerFired(TimerKind::Inactivity)) if s.is_active() => {
            (S::Idle, end_session(true))
        }
        (S::Error { .. }, Event::EndRequested) => (S::Idle, teardown()),

        (s, Event::DeviceFailed(reason)) if s.is_active() || *s == S::Connecting => {
            // The channel is still healthy, so the server is told first
            let mut effects = vec![SendEndSession];
            effects.extend(teardown());
            effects.push(Notify(SessionNotice::Fatal(VoxError::AudioDeviceError(
                reason.clone(),
            ))));
            (S::Error { reason }, effects)
        }
        (s, Event::TransportError(reason)) if s.is_active() || *s == S::Connecting => {
            let mut effects = teardown();
            effects.push(Notify(SessionNotice::Fatal(VoxError::TransportError(
                reason.clone(),
            ))));
            (S::Error { reason }, effects)
        }
        (s, Event::TransportClosed) if s.is_active() || *s == S::Connecting => {
            let mut effects = teardown();
            effects.push(Notify(SessionNotice::Ended));
            (S::Idle, effects)
        }

        // Stale timers, late VAD edges, messages for a finished session
        (s, _) => (s.clone(), Vec::new()),
    };

    let effects = cancel_superseded(state, &next, effects);
    (next, effects)
}

/// Effects of opening a new segment
fn start_segment() -> Vec<Effect> {
    vec![
        Effect::OpenSegment,
        Effect::SetVadMode(VadMode::Segment),
        Effect::ArmTimer(TimerKind::Inactivity),
        Effect::ArmTimer(TimerKind::MaxSpeaking),
        Effect::AcceptReplyAudio(false),
    ]
}

/// Stop everything the session holds; every step is idempotent
fn teardown() -> Vec<Effect> {
    vec![
        Effect::CancelAllTimers,
        Effect::SetVadMode(VadMode::Paused),
        Effect::InterruptPlayback,
        Effect::AcceptReplyAudio(false),
        Effect::ReleaseMicrophone,
        Effect::CloseTransport,
    ]
}

fn end_session(announce: bool) -> Vec<Effect> {
    let mut effects = Vec::new();
    if announce {
        effects.push(Effect::SendEndSession);
    }
    effects.extend([
        Effect::CloseTransport,
        Effect::ReleaseMicrophone,
        Effect::InterruptPlayback,
        Effect::AcceptReplyAudio(false),
        Effect::CancelAllTimers,
        Effect::SetVadMode(VadMode::Paused),
        Effect::Notify(SessionNotice::Ended),
    ]);
    effects
}

/// Prepend cancellation of timers guarded by `from` but not by `to`
fn cancel_superseded(from: &SessionState, to: &SessionState, effects: Vec<Effect>) -> Vec<Effect> {
    if effects.contains(&Effect::CancelAllTimers) {
        return effects;
    }
    let keep = guarded_timers(to);
    let mut out: Vec<Effect> = guarded_timers(from)
        .iter()
        .filter(|kind| !keep.contains(kind))
        .map(|kind| Effect::CancelTimer(*kind))
        .collect();
    out.extend(effects);
    out
}
