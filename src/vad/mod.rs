//! Energy-based voice activity detection
//!
//! The engine turns a stream of level samples (dBFS, one per sampling tick)
//! into discrete events. It only reports edges and debounced onsets; the
//! silence windows that close a segment or flag a long silence are session
//! timers armed from these edges.

use crate::config::VadConfig;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// What the engine is listening for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VadMode {
    /// Sampling continues but no events are emitted
    #[default]
    Paused,
    /// Waiting for the user to start talking
    Listening,
    /// A speech segment is open
    Segment,
    /// A reply is playing; only barge-in is reported
    Playback,
}

impl std::fmt::Display for VadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VadMode::Paused => write!(f, "paused"),
            VadMode::Listening => write!(f, "listening"),
            VadMode::Segment => write!(f, "segment"),
            VadMode::Playback => write!(f, "playback"),
        }
    }
}

/// Event emitted from one level sample
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VadEvent {
    /// Level crossed above the threshold
    Rise,
    /// Level dropped back below the threshold
    Fall,
    /// Level stayed above the threshold for the debounce window
    VoiceStart,
    /// Energy detected while a reply is playing
    BargeIn,
}

/// Threshold detector with a debounce window
pub struct VadEngine {
    threshold_db: f32,
    debounce: Duration,
    barge_in: bool,
    mode: VadMode,
    /// Start of the current above-threshold run
    rise_at: Option<Instant>,
    /// Onset already reported for the current run
    onset_reported: bool,
    last_level_db: f32,
}

impl VadEngine {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            threshold_db: config.threshold_db,
            debounce: config.debounce(),
            barge_in: config.barge_in,
            mode: VadMode::Paused,
            rise_at: None,
            onset_reported: false,
            last_level_db: f32::NEG_INFINITY,
        }
    }

    pub fn mode(&self) -> VadMode {
        self.mode
    }

    /// Whether the last sample was above threshold
    pub fn is_above(&self) -> bool {
        self.rise_at.is_some()
    }

    pub fn last_level_db(&self) -> f32 {
        self.last_level_db
    }

    /// Switch mode without interrupting the sampling cadence
    ///
    /// Entering `Segment` keeps the current run so an ongoing utterance is
    /// not re-detected; every other switch forgets it, so energy that was
    /// already present must cross the threshold again to be reported.
    pub fn set_mode(&mut self, mode: VadMode) {
        if self.mode == mode {
            return;
        }
        trace!("VAD mode {} -> {}", self.mode, mode);
        if mode != VadMode::Segment {
            self.rise_at = None;
            self.onset_reported = false;
        }
        self.mode = mode;
    }

    /// Process one level sample taken at `now`
    pub fn process(&mut self, level_db: f32, now: Instant) -> Vec<VadEvent> {
        self.last_level_db = level_db;
        let above = level_db > self.threshold_db;
        let mut events = Vec::new();

        match (self.rise_at, above) {
            (None, true) => {
                self.rise_at = Some(now);
                self.onset_reported = false;
                match self.mode {
                    VadMode::Listening | VadMode::Segment => events.push(VadEvent::Rise),
                    VadMode::Playback if self.barge_in => {
                        self.onset_reported = true;
                        events.push(VadEvent::BargeIn);
                    }
                    _ => {}
                }
            }
            (Some(_), false) => {
                self.rise_at = None;
                self.onset_reported = false;
                if matches!(self.mode, VadMode::Listening | VadMode::Segment) {
                    events.push(VadEvent::Fall);
                }
            }
            _ => {}
        }

        if let (Some(rise_at), VadMode::Listening) = (self.rise_at, self.mode) {
            if !self.onset_reported && now.duration_since(rise_at) >= self.debounce {
                self.onset_reported = true;
                events.push(VadEvent::VoiceStart);
            }
        }

        events
    }
}
