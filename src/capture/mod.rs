//! Segment capture
//!
//! Owns the recording side of a session: accumulates captured frames while
//! a speech segment is open and turns a closed segment into one upload blob.

use crate::audio::device::AudioFrame;
use crate::audio::encoder::{encode_segment, ContainerFormat};
use crate::audio::resampler::resample_mono;
use crate::config::CaptureConfig;
use crate::Result;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Recorder lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    /// Frames are discarded
    Disarmed,
    /// Frames are accumulated (into the open segment or the pre-roll)
    Armed,
    /// Waiting out the pause after a flush
    Rearming { at: Instant },
}

/// The speech segment currently being recorded
#[derive(Debug)]
pub struct ActiveSegment {
    chunks: Vec<AudioFrame>,
    started_at: Instant,
}

impl ActiveSegment {
    pub fn new(started_at: Instant) -> Self {
        Self {
            chunks: Vec::new(),
            started_at,
        }
    }

    pub fn push(&mut self, chunk: AudioFrame) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn chunks(&self) -> &[AudioFrame] {
        &self.chunks
    }

    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// All chunks joined in capture order
    pub fn into_samples(self) -> Vec<f32> {
        self.chunks.concat()
    }
}

/// A closed segment ready for the transport
#[derive(Clone, Debug)]
pub struct SegmentBlob {
    pub bytes: Vec<u8>,
    pub format: ContainerFormat,
    pub duration: Duration,
}

/// Result of closing a segment
#[derive(Debug)]
pub enum FlushOutcome {
    /// Nothing was captured
    Empty,
    /// Below the minimum useful size; treated as noise
    TooSmall { bytes: usize },
    /// Ready to transmit
    Ready(SegmentBlob),
}

/// Segment capture controller
pub struct SegmentCapture {
    config: CaptureConfig,
    format: ContainerFormat,
    sample_rate: u32,
    state: RecorderState,
    pre_roll: VecDeque<AudioFrame>,
    pre_roll_samples: usize,
    segment: Option<ActiveSegment>,
}

impl SegmentCapture {
    pub fn new(config: CaptureConfig, format: ContainerFormat) -> Self {
        Self {
            config,
            format,
            sample_rate: 16_000,
            state: RecorderState::Disarmed,
            pre_roll: VecDeque::new(),
            pre_roll_samples: 0,
            segment: None,
        }
    }

    /// Adopt the sample rate of the acquired device
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.pre_roll_samples =
            (sample_rate as u64 * self.config.pre_roll_ms / 1000) as usize;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Armed
    }

    pub fn segment(&self) -> Option<&ActiveSegment> {
        self.segment.as_ref()
    }

    pub fn has_open_segment(&self) -> bool {
        self.segment.is_some()
    }

    /// Start accumulating frames
    pub fn arm(&mut self) {
        if self.state != RecorderState::Armed {
            debug!("Recorder armed");
        }
        self.state = RecorderState::Armed;
    }

    /// Open a segment on voice-start
    ///
    /// Idempotent: an already open segment keeps accumulating. The pre-roll
    /// captured just before the onset becomes the head of the new segment.
    pub fn open(&mut self, now: Instant) {
        self.arm();
        if self.segment.is_some() {
            return;
        }
        let mut segment = ActiveSegment::new(now);
        for chunk in self.pre_roll.drain(..) {
            segment.push(chunk);
        }
        debug!("Segment opened with {} pre-roll samples", segment.sample_count());
        self.segment = Some(segment);
    }

    /// Feed one captured frame
    pub fn push(&mut self, frame: AudioFrame) {
        if self.state != RecorderState::Armed {
            return;
        }
        match self.segment.as_mut() {
            Some(segment) => segment.push(frame),
            None => self.push_pre_roll(frame),
        }
    }

    fn push_pre_roll(&mut self, frame: AudioFrame) {
        if self.pre_roll_samples == 0 {
            return;
        }
        self.pre_roll.push_back(frame);
        let mut total: usize = self.pre_roll.iter().map(Vec::len).sum();
        while total > self.pre_roll_samples {
            match self.pre_roll.pop_front() {
                Some(oldest) => total -= oldest.len(),
                None => break,
            }
        }
    }

    /// Close the open segment and assemble it into one blob
    ///
    /// The recorder stops; with `keep_listening` it re-arms after the
    /// configured delay (see [`SegmentCapture::poll_rearm`]).
    pub fn flush(&mut self, now: Instant, keep_listening: bool) -> Result<FlushOutcome> {
        let segment = self.segment.take();
        self.pre_roll.clear();
        self.state = if keep_listening {
            RecorderState::Rearming {
                at: now + self.config.rearm_delay(),
            }
        } else {
            RecorderState::Disarmed
        };

        let segment = match segment {
            Some(segment) if !segment.is_empty() => segment,
            _ => return Ok(FlushOutcome::Empty),
        };

        let samples = segment.into_samples();
        let target_rate = match self.config.target_sample_rate {
            0 => self.sample_rate,
            rate => rate,
        };
        let samples = resample_mono(&samples, self.sample_rate, target_rate)?;
        let duration = Duration::from_secs_f64(samples.len() as f64 / target_rate as f64);
        let bytes = encode_segment(&samples, target_rate, self.format)?;

        if bytes.len() < self.config.min_segment_bytes {
            return Ok(FlushOutcome::TooSmall { bytes: bytes.len() });
        }

        Ok(FlushOutcome::Ready(SegmentBlob {
            bytes,
            format: self.format,
            duration,
        }))
    }

    /// Re-arm once the post-flush delay has elapsed; returns true when it did
    pub fn poll_rearm(&mut self, now: Instant) -> bool {
        match self.state {
            RecorderState::Rearming { at } if now >= at => {
                self.arm();
                true
            }
            _ => false,
        }
    }

    /// Drop everything and stop recording
    pub fn reset(&mut self) {
        self.state = RecorderState::Disarmed;
        self.segment = None;
        self.pre_roll.clear();
    }
}
