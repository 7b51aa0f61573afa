//! Voice session coordinator
//!
//! - [`machine`]: pure `(state, event) -> (state, effects)` transition function
//! - [`timers`]: the four named cancellable timers
//! - [`runner`]: the event loop owning devices, transport and timers
//!
//! A UI talks to a running session only through [`SessionHandle`]: it sends
//! [`SessionCommand`]s and receives [`SessionNotice`]s.

pub mod machine;
pub mod runner;
pub mod timers;

pub use machine::{transition, Effect, Event, SessionState};
pub use runner::SessionRunner;
pub use timers::{TimerKind, TimerSet};

use crate::{Result, VoxError};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// One conversation, from open request to teardown
#[derive(Clone, Debug)]
pub struct Session {
    pub id: Uuid,
    pub voice_id: u64,
    pub state: SessionState,
    /// True while the conversation loop runs (listening through ai_speaking)
    pub active: bool,
    pub last_voice_at: Option<Instant>,
    pub speech_started_at: Option<Instant>,
    /// Voice name announced by the agent
    pub voice_name: Option<String>,
    /// Server-issued session token
    pub session_token: Option<String>,
    pub started_at: DateTime<Utc>,
    pub segments_sent: u32,
}

impl Session {
    pub fn new(voice_id: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            voice_id,
            state: SessionState::Idle,
            active: false,
            last_voice_at: None,
            speech_started_at: None,
            voice_name: None,
            session_token: None,
            started_at: Utc::now(),
            segments_sent: 0,
        }
    }

    /// Record the state the machine moved to
    pub fn set_state(&mut self, state: SessionState) {
        self.active = state.is_active();
        self.state = state;
    }
}

/// Notifications for the UI
#[derive(Clone, Debug, PartialEq)]
pub enum SessionNotice {
    StateChanged(SessionState),
    /// The agent accepted the session
    Ready {
        voice: String,
        session_token: Option<String>,
    },
    Transcript(String),
    Reply(String),
    /// Non-fatal error reported by the agent
    ServerError(String),
    /// A speech segment was transmitted
    SegmentSent { bytes: usize, duration: Duration },
    /// The session failed; shown to the user
    Fatal(VoxError),
    /// The session returned to idle
    Ended,
}

/// Requests from the UI
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    Open { voice_id: u64 },
    End,
    /// Close the open segment now
    Commit,
    /// End any session and stop the runner
    Shutdown,
}

/// Handle for controlling a session runner
pub struct SessionHandle {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    notice_rx: mpsc::UnboundedReceiver<SessionNotice>,
}

impl SessionHandle {
    pub(crate) fn new(
        command_tx: mpsc::UnboundedSender<SessionCommand>,
        notice_rx: mpsc::UnboundedReceiver<SessionNotice>,
    ) -> Self {
        Self {
            command_tx,
            notice_rx,
        }
    }

    /// Send a command to the runner
    pub fn send_command(&self, command: SessionCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|e| VoxError::ChannelError(format!("Failed to send command: {}", e)))
    }

    pub fn open(&self, voice_id: u64) -> Result<()> {
        self.send_command(SessionCommand::Open { voice_id })
    }

    pub fn end(&self) -> Result<()> {
        self.send_command(SessionCommand::End)
    }

    pub fn commit(&self) -> Result<()> {
        self.send_command(SessionCommand::Commit)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send_command(SessionCommand::Shutdown)
    }

    /// A sender that can outlive the handle (e.g. for a Ctrl-C task)
    pub fn command_sender(&self) -> mpsc::UnboundedSender<SessionCommand> {
        self.command_tx.clone()
    }

    /// Wait for the next notice; `None` once the runner stopped
    pub async fn next_notice(&mut self) -> Option<SessionNotice> {
        self.notice_rx.recv().await
    }

    /// Try to receive a notice without waiting
    pub fn try_next_notice(&mut self) -> Option<SessionNotice> {
        self.notice_rx.try_recv().ok()
    }
}
