use crate::audio::device::AudioPlayer;
use crate::playback::{PlaybackOutcome, PlaybackReport, Ticket};
use crate::{Result, VoxError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rodio::{Decoder, OutputStream, Sink};
use std::io::Cursor;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How often the worker checks whether the current payload finished
const COMPLETION_POLL: Duration = Duration::from_millis(20);

enum PlayerCommand {
    Play { ticket: Ticket, payload: Vec<u8> },
    Stop,
    Shutdown,
}

/// Speaker output backed by a rodio worker thread
///
/// rodio output streams are bound to the thread that opened them, so decoding
/// and playback live on a dedicated worker commanded over a channel.
pub struct SpeakerOutput {
    command_tx: Option<Sender<PlayerCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl SpeakerOutput {
    pub fn new() -> Self {
        Self {
            command_tx: None,
            worker: None,
        }
    }

    fn send(&self, command: PlayerCommand) -> Result<()> {
        let tx = self
            .command_tx
            .as_ref()
            .ok_or_else(|| VoxError::ChannelError("Speaker output not attached".into()))?;
        tx.send(command)
            .map_err(|e| VoxError::ChannelError(format!("Playback worker gone: {}", e)))
    }
}

impl Default for SpeakerOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPlayer for SpeakerOutput {
    fn attach(&mut self, reports: mpsc::UnboundedSender<PlaybackReport>) -> Result<()> {
        if self.command_tx.is_some() {
            return Ok(());
        }

        let (command_tx, command_rx) = bounded(64);
        let (ready_tx, ready_rx) = bounded(1);

        let worker = thread::Builder::new()
            .name("voxloop-playback".into())
            .spawn(move || run_worker(command_rx, reports, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(VoxError::AudioDeviceError(
                    "Playback worker exited during startup".into(),
                ))
            }
        }

        self.command_tx = Some(command_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn play(&mut self, ticket: Ticket, payload: Vec<u8>) -> Result<()> {
        self.send(PlayerCommand::Play { ticket, payload })
    }

    fn stop(&mut self) {
        if let Err(e) = self.send(PlayerCommand::Stop) {
            debug!("Stop ignored: {}", e);
        }
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        let _ = self.send(PlayerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(
    command_rx: Receiver<PlayerCommand>,
    reports: mpsc::UnboundedSender<PlaybackReport>,
    ready_tx: Sender<Result<()>>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(output) => output,
        Err(e) => {
            error!("Failed to open output device: {}", e);
            let _ = ready_tx.send(Err(VoxError::AudioDeviceError(format!(
                "Failed to open output device: {}",
                e
            ))));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));
    info!("Playback worker ready");

    let report = |ticket: Ticket, outcome: PlaybackOutcome| {
        if reports.send(PlaybackReport { ticket, outcome }).is_err() {
            debug!("Playback report dropped, session gone");
        }
    };

    let mut current: Option<(Ticket, Sink)> = None;

    loop {
        match command_rx.recv_timeout(COMPLETION_POLL) {
            Ok(PlayerCommand::Play { ticket, payload }) => {
                if let Some((_, sink)) = current.take() {
                    sink.stop();
                }
                let source = match Decoder::new(Cursor::new(payload)) {
                    Ok(source) => source,
                    Err(e) => {
                        warn!("Failed to decode reply audio {:?}: {}", ticket, e);
                        report(ticket, PlaybackOutcome::DecodeFailed(e.to_string()));
                        continue;
                    }
                };
                match Sink::try_new(&handle) {
                    Ok(sink) => {
                        sink.append(source);
                        current = Some((ticket, sink));
                        debug!("Playing {:?}", ticket);
                    }
                    Err(e) => {
                        warn!("Failed to open sink for {:?}: {}", ticket, e);
                        report(ticket, PlaybackOutcome::DecodeFailed(e.to_string()));
                    }
                }
            }
            Ok(PlayerCommand::Stop) => {
                if let Some((ticket, sink)) = current.take() {
                    sink.stop();
                    debug!("Stopped {:?}", ticket);
                }
            }
            Ok(PlayerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Some((ticket, sink)) = current.take() {
            if sink.empty() {
                report(ticket, PlaybackOutcome::Finished);
            } else {
                current = Some((ticket, sink));
            }
        }
    }

    info!("Playback worker stopped");
}
