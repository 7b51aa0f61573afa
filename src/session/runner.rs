//! Session runner
//!
//! Owns every device, the transport, the timers and the component state of
//! one client, and applies the effects computed by [`transition`]. All inputs
//! are multiplexed on a single task, so effects never interleave.
//!
//! The runner is not `Send` (audio streams are thread-bound); drive
//! [`SessionRunner::run`] on a current-thread runtime or a `LocalSet`.

use super::machine::{transition, Effect, Event, SessionState};
use super::timers::TimerSet;
use super::{Session, SessionCommand, SessionHandle, SessionNotice};
use crate::audio::device::{AudioFrame, AudioPlayer, CaptureDevice};
use crate::audio::encoder::{negotiate_format, NativeEncoderProbe};
use crate::audio::meter::LevelMeter;
use crate::capture::{FlushOutcome, SegmentBlob, SegmentCapture};
use crate::config::VoiceConfig;
use crate::playback::{Advance, PlaybackItem, PlaybackOutcome, PlaybackQueue, PlaybackReport};
use crate::transport::{
    ClientMessage, Connector, Endpoint, EventSink, ServerMessage, TransportEvent, TransportHandle,
};
use crate::vad::VadEngine;
use crate::Result;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Captured frames buffered between the audio callback and the runner
const FRAME_QUEUE_DEPTH: usize = 256;

pub struct SessionRunner {
    config: VoiceConfig,
    session: Session,

    mic: Box<dyn CaptureDevice>,
    player: Box<dyn AudioPlayer>,
    connector: Box<dyn Connector>,

    vad: VadEngine,
    meter: Option<LevelMeter>,
    capture: SegmentCapture,
    queue: PlaybackQueue,
    /// Whether binary frames belong to the reply currently announced
    accepting_reply_audio: bool,
    timers: TimerSet,

    transport: Option<TransportHandle>,
    /// Id of the current connection; events from older ones are dropped
    connection: u64,

    /// Events raised while applying effects, handled before any new input
    pending: VecDeque<Event>,

    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    notice_tx: mpsc::UnboundedSender<SessionNotice>,
    frame_tx: mpsc::Sender<AudioFrame>,
    frame_rx: mpsc::Receiver<AudioFrame>,
    transport_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    transport_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    report_rx: mpsc::UnboundedReceiver<PlaybackReport>,
}

impl SessionRunner {
    /// Create a runner and the handle that controls it
    pub fn new(
        config: VoiceConfig,
        mic: Box<dyn CaptureDevice>,
        mut player: Box<dyn AudioPlayer>,
        connector: Box<dyn Connector>,
    ) -> Result<(Self, SessionHandle)> {
        config.validate()?;
        let format = negotiate_format(&config.capture.formats, &NativeEncoderProbe)?;
        info!("Capturing segments as {}", format.mime_type());

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        player.attach(report_tx)?;

        let runner = Self {
            vad: VadEngine::new(&config.vad),
            meter: None,
            capture: SegmentCapture::new(config.capture.clone(), format),
            queue: PlaybackQueue::new(config.playback.backlog_warning),
            accepting_reply_audio: false,
            timers: TimerSet::new(),
            session: Session::new(config.server.voice_id.unwrap_or_default()),
            config,
            mic,
            player,
            connector,
            transport: None,
            connection: 0,
            pending: VecDeque::new(),
            command_rx,
            notice_tx,
            frame_tx,
            frame_rx,
            transport_tx,
            transport_rx,
            report_rx,
        };

        Ok((runner, SessionHandle::new(command_tx, notice_rx)))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> &SessionState {
        &self.session.state
    }

    /// Run until shutdown is requested or every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        info!("Session runner started");

        let mut ticker = time::interval(self.config.vad.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.timers.next_deadline();

            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => {
                        info!("Session runner shutdown requested");
                        self.dispatch(Event::EndRequested);
                        break;
                    }
                    Some(command) => self.on_command(command),
                },
                Some((connection, event)) = self.transport_rx.recv() => {
                    self.on_transport(connection, event);
                }
                Some(report) = self.report_rx.recv() => self.on_playback_report(report),
                Some(frame) = self.frame_rx.recv() => self.on_frame(frame),
                _ = ticker.tick() => self.on_tick(),
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.on_timers();
                }
            }
        }

        self.mic.release();
        self.player.stop();
        info!("Session runner stopped");
        Ok(())
    }

    // === Inputs ===

    fn on_command(&mut self, command: SessionCommand) {
        debug!("Command: {:?}", command);
        match command {
            SessionCommand::Open { voice_id } => {
                if !self.session.state.can_open() {
                    warn!("Session already open ({}), ignoring open request", self.session.state);
                    return;
                }
                self.session = Session::new(voice_id);
                info!("Opening session {} with voice {}", self.session.id, voice_id);
                self.dispatch(Event::OpenRequested);
            }
            SessionCommand::End => self.dispatch(Event::EndRequested),
            SessionCommand::Commit => self.dispatch(Event::CommitRequested),
            SessionCommand::Shutdown => self.dispatch(Event::EndRequested),
        }
    }

    fn on_transport(&mut self, connection: u64, event: TransportEvent) {
        if connection != self.connection {
            trace!("Dropping event from stale connection {}: {:?}", connection, event);
            return;
        }

        match event {
            TransportEvent::Ready => self.dispatch(Event::ChannelReady),
            TransportEvent::Message(ServerMessage::SessionReady { voice, session_token }) => {
                info!("Agent ready with voice {}", voice);
                self.session.voice_name = Some(voice.clone());
                self.session.session_token = session_token.clone();
                self.notify(SessionNotice::Ready {
                    voice,
                    session_token,
                });
            }
            TransportEvent::Message(ServerMessage::Transcript { text }) => {
                self.dispatch(Event::Transcript(text))
            }
            TransportEvent::Message(ServerMessage::ReplyText { text }) => {
                self.dispatch(Event::ReplyText(text))
            }
            TransportEvent::Message(ServerMessage::Error { message }) => {
                warn!("Agent reported: {}", message);
                self.dispatch(Event::ServerError(message))
            }
            TransportEvent::Message(ServerMessage::Unknown) => {
                debug!("Ignoring unknown control message");
            }
            TransportEvent::Binary(bytes) => self.on_reply_audio(bytes),
            TransportEvent::Error(reason) => {
                error!("Transport failed: {}", reason);
                self.dispatch(Event::TransportError(reason))
            }
            TransportEvent::Closed => self.dispatch(Event::TransportClosed),
        }
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        if !self.mic.is_acquired() {
            return;
        }
        let now = Instant::now();
        if let Some(meter) = &self.meter {
            meter.push(&frame);
        }
        if self.capture.poll_rearm(now) {
            debug!("Recorder re-armed");
        }
        self.capture.push(frame);
    }

    fn on_tick(&mut self) {
        let Some(meter) = &self.meter else {
            return;
        };
        let now = Instant::now();
        let level_db = meter.level_db();
        for event in self.vad.process(level_db, now) {
            trace!("VAD {:?} at {:.1} dBFS", event, level_db);
            self.dispatch(Event::Vad(event));
        }
    }

    fn on_timers(&mut self) {
        let now = Instant::now();
        while let Some(kind) = self.timers.take_expired(now) {
            debug!("Timer fired: {}", kind);
            self.dispatch(Event::TimerFired(kind));
        }
    }

    fn on_reply_audio(&mut self, bytes: Vec<u8>) {
        if !self.accepting_reply_audio {
            debug!(
                "Dropping {} bytes of stale reply audio in {}",
                bytes.len(),
                self.session.state
            );
            return;
        }
        self.dispatch(Event::ReplyAudio(bytes));
    }

    fn on_playback_report(&mut self, report: PlaybackReport) {
        match self.queue.complete(&report) {
            Advance::Stale => {}
            Advance::Next(item) => self.start_playback(item),
            Advance::Drained => self.dispatch(Event::PlaybackDrained),
        }
    }

    /// Hand `item` to the player, skipping items it refuses outright
    fn start_playback(&mut self, mut item: PlaybackItem) {
        loop {
            let ticket = item.ticket;
            let Err(e) = self.player.play(ticket, item.payload) else {
                return;
            };
            let report = PlaybackReport {
                ticket,
                outcome: PlaybackOutcome::DecodeFailed(e.to_string()),
            };
            match self.queue.complete(&report) {
                Advance::Next(next) => item = next,
                Advance::Drained => {
                    self.dispatch(Event::PlaybackDrained);
                    return;
                }
                Advance::Stale => return,
            }
        }
    }

    // === Transitions ===

    /// Feed one event through the machine, then everything it raised
    fn dispatch(&mut self, event: Event) {
        self.pending.push_back(event);
        while let Some(event) = self.pending.pop_front() {
            self.step(event);
        }
    }

    fn step(&mut self, event: Event) {
        let previous = self.session.state.clone();
        let trace_event = match &event {
            Event::ReplyAudio(bytes) => format!("ReplyAudio({} bytes)", bytes.len()),
            other => format!("{:?}", other),
        };
        let (next, effects) = transition(&previous, event);

        if next != previous {
            info!("Session {} -> {} on {}", previous, next, trace_event);
            self.session.set_state(next.clone());
            self.notify(SessionNotice::StateChanged(next));
        } else if effects.is_empty() {
            trace!("{} ignored in {}", trace_event, previous);
        }

        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        let now = Instant::now();
        match &effect {
            Effect::EnqueueReply(bytes) => trace!("Effect: EnqueueReply({} bytes)", bytes.len()),
            other => trace!("Effect: {:?}", other),
        }

        match effect {
            Effect::OpenTransport => self.open_transport(),
            Effect::CloseTransport => {
                if let Some(transport) = self.transport.take() {
                    transport.close();
                    info!("Transport closed");
                }
            }
            Effect::SendEndSession => {
                if let Some(transport) = &self.transport {
                    if let Err(e) = transport.send_control(ClientMessage::EndSession) {
                        debug!("end_session not delivered: {}", e);
                    }
                }
            }
            Effect::AcquireMicrophone => self.acquire_microphone(),
            Effect::ReleaseMicrophone => {
                self.mic.release();
                self.capture.reset();
                self.meter = None;
                while self.frame_rx.try_recv().is_ok() {}
            }
            Effect::SetVadMode(mode) => self.vad.set_mode(mode),
            Effect::OpenSegment => {
                self.capture.open(now);
                self.session.speech_started_at = Some(now);
                self.session.last_voice_at = Some(now);
            }
            Effect::FlushSegment => self.flush_segment(now),
            Effect::InterruptPlayback => {
                if self.queue.is_playing() {
                    self.player.stop();
                }
                let dropped = self.queue.interrupt();
                if dropped > 0 {
                    info!("Playback interrupted, {} reply item(s) discarded", dropped);
                }
            }
            Effect::EnqueueReply(payload) => {
                if let Some(item) = self.queue.enqueue(payload, now) {
                    self.start_playback(item);
                }
            }
            Effect::AcceptReplyAudio(accept) => self.accepting_reply_audio = accept,
            Effect::ArmTimer(kind) => {
                self.timers.arm(kind, now + kind.duration(&self.config.timers));
            }
            Effect::CancelTimer(kind) => self.timers.cancel(kind),
            Effect::CancelAllTimers => self.timers.cancel_all(),
            Effect::Notify(notice) => self.notify(notice),
        }
    }

    fn open_transport(&mut self) {
        self.connection += 1;
        let result = Endpoint::new(&self.config.server, self.session.voice_id).and_then(|endpoint| {
            let events = EventSink::new(self.connection, self.transport_tx.clone());
            self.connector.connect(&endpoint, events)
        });
        match result {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => {
                error!("Failed to open transport: {}", e);
                self.pending.push_back(Event::TransportError(e.to_string()));
            }
        }
    }

    fn acquire_microphone(&mut self) {
        match self.mic.acquire(self.frame_tx.clone()) {
            Ok(format) => {
                self.meter = Some(LevelMeter::new(format.sample_rate, self.config.vad.window_ms));
                self.capture.set_sample_rate(format.sample_rate);
                self.capture.arm();
            }
            Err(e) => {
                error!("Microphone unavailable: {}", e);
                self.pending.push_back(Event::DeviceFailed(e.to_string()));
            }
        }
    }

    fn flush_segment(&mut self, now: Instant) {
        match self.capture.flush(now, self.session.active) {
            Ok(FlushOutcome::Ready(blob)) => self.send_segment(blob),
            Ok(FlushOutcome::TooSmall { bytes }) => {
                debug!("Dropping {}-byte segment below the minimum size", bytes);
            }
            Ok(FlushOutcome::Empty) => debug!("Segment was empty, nothing to send"),
            Err(e) => warn!("Failed to assemble segment: {}", e),
        }
    }

    fn send_segment(&mut self, blob: SegmentBlob) {
        let Some(transport) = &self.transport else {
            warn!("No transport, dropping segment");
            return;
        };
        let bytes = blob.bytes.len();
        match transport.send_audio(blob.bytes) {
            Ok(()) => {
                self.session.segments_sent += 1;
                info!(
                    "Sent segment #{} ({} bytes, {:.2}s {})",
                    self.session.segments_sent,
                    bytes,
                    blob.duration.as_secs_f32(),
                    blob.format
                );
                self.notify(SessionNotice::SegmentSent {
                    bytes,
                    duration: blob.duration,
                });
            }
            Err(e) => self.pending.push_back(Event::TransportError(e.to_string())),
        }
    }

    fn notify(&self, notice: SessionNotice) {
        if self.notice_tx.send(notice).is_err() {
            trace!("No one is listening for notices");
        }
    }
}
