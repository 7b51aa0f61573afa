//! Segment container formats
//!
//! Capture format is negotiated once per session by walking an ordered
//! preference list and taking the first format the probe accepts.

use crate::{Result, VoxError};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// Container for an uploaded speech segment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerFormat {
    /// Opus in WebM (browser recorders)
    WebmOpus,
    /// Opus in Ogg
    OggOpus,
    /// 16-bit PCM WAV
    Wav16,
    /// 32-bit float WAV
    WavFloat,
    /// Headerless 16-bit little-endian PCM
    Pcm16,
}

impl ContainerFormat {
    /// Preference order used when the config does not override it
    pub fn default_preferences() -> Vec<ContainerFormat> {
        vec![
            ContainerFormat::WebmOpus,
            ContainerFormat::OggOpus,
            ContainerFormat::Wav16,
            ContainerFormat::Pcm16,
        ]
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::WebmOpus => "audio/webm;codecs=opus",
            ContainerFormat::OggOpus => "audio/ogg;codecs=opus",
            ContainerFormat::Wav16 | ContainerFormat::WavFloat => "audio/wav",
            ContainerFormat::Pcm16 => "audio/L16",
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Answers whether a container can be recorded on this platform
pub trait FormatProbe {
    fn can_record(&self, format: ContainerFormat) -> bool;
}

/// The formats this crate can write itself
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeEncoderProbe;

impl FormatProbe for NativeEncoderProbe {
    fn can_record(&self, format: ContainerFormat) -> bool {
        matches!(
            format,
            ContainerFormat::Wav16 | ContainerFormat::WavFloat | ContainerFormat::Pcm16
        )
    }
}

impl FormatProbe for [ContainerFormat] {
    fn can_record(&self, format: ContainerFormat) -> bool {
        self.contains(&format)
    }
}

/// Pick the first preferred format the probe supports
pub fn negotiate_format<P: FormatProbe + ?Sized>(
    preferences: &[ContainerFormat],
    probe: &P,
) -> Result<ContainerFormat> {
    for &format in preferences {
        if probe.can_record(format) {
            debug!("Negotiated capture format: {}", format);
            return Ok(format);
        }
        debug!("Capture format not supported, trying next: {}", format);
    }
    Err(VoxError::ConfigError(format!(
        "None of the preferred capture formats are supported: {:?}",
        preferences
    )))
}

/// Encode mono samples into one blob of the given container
pub fn encode_segment(
    samples: &[f32],
    sample_rate: u32,
    format: ContainerFormat,
) -> Result<Vec<u8>> {
    match format {
        ContainerFormat::Wav16 => {
            let spec = WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
            {
                let mut writer = WavWriter::new(&mut cursor, spec)?;
                for &sample in samples {
                    writer.write_sample(to_i16(sample))?;
                }
                writer.finalize()?;
            }
            Ok(cursor.into_inner())
        }
        ContainerFormat::WavFloat => {
            let spec = WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            };
            let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 4));
            {
                let mut writer = WavWriter::new(&mut cursor, spec)?;
                for &sample in samples {
                    writer.write_sample(sample)?;
                }
                writer.finalize()?;
            }
            Ok(cursor.into_inner())
        }
        ContainerFormat::Pcm16 => Ok(samples
            .iter()
            .flat_map(|&s| to_i16(s).to_le_bytes())
            .collect()),
        ContainerFormat::WebmOpus | ContainerFormat::OggOpus => Err(VoxError::EncodeError(
            format!("No native encoder for {}", format),
        )),
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_falls_back_to_first_supported() {
        let format =
            negotiate_format(&ContainerFormat::default_preferences(), &NativeEncoderProbe).unwrap();
        assert_eq!(format, ContainerFormat::Wav16);
    }

    #[test]
    fn test_slice_probe() {
        let accepted = [ContainerFormat::Pcm16];
        let format =
            negotiate_format(&ContainerFormat::default_preferences(), &accepted[..]).unwrap();
        assert_eq!(format, ContainerFormat::Pcm16);
    }

    #[test]
    fn test_nothing_supported() {
        let prefs = [ContainerFormat::WebmOpus, ContainerFormat::OggOpus];
        assert!(negotiate_format(&prefs, &NativeEncoderProbe).is_err());
    }

    #[test]
    fn test_wav16_is_readable() {
        let samples: Vec<f32> = (0..1600).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let bytes = encode_segment(&samples, 16_000, ContainerFormat::Wav16).unwrap();
        assert_eq!(bytes.len(), 44 + samples.len() * 2);

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len() as usize, samples.len());
    }

    #[test]
    fn test_pcm16_layout() {
        let bytes = encode_segment(&[1.0, -1.0, 0.0], 16_000, ContainerFormat::Pcm16).unwrap();
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -i16::MAX);
    }

    #[test]
    fn test_opus_not_encodable() {
        assert!(encode_segment(&[0.0; 4], 16_000, ContainerFormat::OggOpus).is_err());
    }
}
