pub mod buffer;
pub mod device;
pub mod encoder;
#[cfg(feature = "audio-io")]
pub mod input;
pub mod meter;
#[cfg(feature = "audio-io")]
pub mod output;
pub mod resampler;

pub use buffer::SampleWindow;
pub use device::{AudioFrame, AudioPlayer, CaptureDevice, StreamFormat};
pub use encoder::{
    encode_segment, negotiate_format, ContainerFormat, FormatProbe, NativeEncoderProbe,
};
#[cfg(feature = "audio-io")]
pub use input::MicInput;
pub use meter::{amplitude_to_db, LevelMeter};
#[cfg(feature = "audio-io")]
pub use output::SpeakerOutput;
pub use resampler::{resample_mono, MonoResampler};
