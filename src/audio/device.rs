//! Device handles granted to the session coordinator
//!
//! The microphone and the audio output are each owned by exactly one
//! session runner; nothing else starts or stops them.

use crate::playback::{PlaybackReport, Ticket};
use crate::Result;
use tokio::sync::mpsc;

/// One block of captured mono samples
pub type AudioFrame = Vec<f32>;

/// Shape of the frames a capture device delivers (always mono)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
}

/// Microphone access
pub trait CaptureDevice {
    /// Open the device and start delivering frames
    ///
    /// Fails with `AudioDeviceError` when the device is missing or access is
    /// denied. Acquiring an already acquired device is a no-op.
    fn acquire(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<StreamFormat>;

    /// Stop delivering frames and release the device; safe to call repeatedly
    fn release(&mut self);

    fn is_acquired(&self) -> bool;
}

/// Audio output for reply payloads
///
/// Decoding and playback are asynchronous: `play` returns immediately and the
/// outcome arrives later as a [`PlaybackReport`] carrying the same ticket.
pub trait AudioPlayer {
    /// Register where completion reports are sent
    fn attach(&mut self, reports: mpsc::UnboundedSender<PlaybackReport>) -> Result<()>;

    /// Decode and play one payload, replacing anything still playing
    fn play(&mut self, ticket: Ticket, payload: Vec<u8>) -> Result<()>;

    /// Hard-stop the current payload
    ///
    /// A report for the stopped ticket may still arrive and must be treated
    /// as stale.
    fn stop(&mut self);
}
