use crate::audio::device::{AudioFrame, CaptureDevice, StreamFormat};
use crate::{Result, VoxError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Default system microphone via cpal
///
/// The device is looked up on `acquire`, so a missing or denied microphone
/// surfaces as an acquisition failure of the session.
pub struct MicInput {
    stream: Option<Stream>,
    sample_rate: Option<u32>,
    dropped_frames: Arc<Mutex<u64>>,
}

impl MicInput {
    pub fn new() -> Self {
        Self {
            stream: None,
            sample_rate: None,
            dropped_frames: Arc::new(Mutex::new(0)),
        }
    }

    /// Rate of the open stream
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    /// Frames lost because the session loop fell behind
    pub fn dropped_frames(&self) -> u64 {
        *self.dropped_frames.lock()
    }

    fn open_device() -> Result<(Device, StreamConfig, SampleFormat)> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| VoxError::AudioDeviceError("No input device available".into()))?;

        info!("Using input device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

        let supported = device
            .default_input_config()
            .map_err(|e| VoxError::AudioDeviceError(format!("Failed to get input config: {}", e)))?;
        let sample_format = supported.sample_format();

        Ok((device, supported.into(), sample_format))
    }

    fn build_stream(
        &self,
        device: &Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Stream> {
        let channels = config.channels as usize;
        let dropped = Arc::clone(&self.dropped_frames);
        let err_fn = |err| {
            error!("Audio input stream error: {}", err);
        };

        let deliver = move |samples: AudioFrame| {
            if let Err(e) = frames.try_send(samples) {
                *dropped.lock() += 1;
                debug!("Failed to send audio frame: {}", e);
            }
        };

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    deliver(downmix(data.iter().copied(), channels));
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    deliver(downmix(
                        data.iter().map(|&s| s as f32 / i16::MAX as f32),
                        channels,
                    ));
                },
                err_fn,
                None,
            ),
            other => {
                return Err(VoxError::AudioDeviceError(format!(
                    "Unsupported input sample format: {:?}",
                    other
                )))
            }
        };

        stream.map_err(|e| {
            VoxError::AudioDeviceError(format!("Failed to build input stream: {}", e))
        })
    }
}

impl Default for MicInput {
    fn default() -> Self {
        Self::new()
    }
}

/// Average interleaved channels into mono
fn downmix(samples: impl Iterator<Item = f32>, channels: usize) -> AudioFrame {
    if channels <= 1 {
        return samples.collect();
    }
    let interleaved: Vec<f32> = samples.collect();
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

impl CaptureDevice for MicInput {
    fn acquire(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<StreamFormat> {
        if let (Some(_), Some(sample_rate)) = (&self.stream, self.sample_rate) {
            return Ok(StreamFormat { sample_rate });
        }

        let (device, config, sample_format) = Self::open_device()?;
        let stream = self.build_stream(&device, &config, sample_format, frames)?;
        stream.play().map_err(|e| {
            VoxError::AudioDeviceError(format!("Failed to start input stream: {}", e))
        })?;

        let format = StreamFormat {
            sample_rate: config.sample_rate.0,
        };
        self.stream = Some(stream);
        self.sample_rate = Some(format.sample_rate);

        info!("Microphone acquired at {} Hz", format.sample_rate);
        Ok(format)
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("Microphone released");
        }
    }

    fn is_acquired(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for MicInput {
    fn drop(&mut self) {
        self.release();
    }
}
