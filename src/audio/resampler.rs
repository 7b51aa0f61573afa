use crate::{Result, VoxError};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

const CHUNK_FRAMES: usize = 1024;

/// Mono sample-rate converter used before a segment is encoded
pub struct MonoResampler {
    resampler: SincFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
}

impl MonoResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(VoxError::ConfigError(
                "Sample rates must be greater than 0".into(),
            ));
        }

        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            params,
            CHUNK_FRAMES,
            1,
        )
        .map_err(|e| VoxError::AudioProcessingError(format!("Failed to create resampler: {}", e)))?;

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
        })
    }

    /// Convert a whole segment; the final partial chunk is zero-padded and trimmed
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let ratio = self.output_rate as f64 / self.input_rate as f64;
        let expected = (input.len() as f64 * ratio).ceil() as usize;
        let mut output = Vec::with_capacity(expected + CHUNK_FRAMES);

        for chunk in input.chunks(CHUNK_FRAMES) {
            let mut planar = vec![vec![0.0f32; CHUNK_FRAMES]];
            planar[0][..chunk.len()].copy_from_slice(chunk);

            let converted = self
                .resampler
                .process(&planar, None)
                .map_err(|e| VoxError::AudioProcessingError(format!("Resampling failed: {}", e)))?;

            let keep = ((chunk.len() as f64) * ratio).ceil() as usize;
            let produced = &converted[0];
            output.extend_from_slice(&produced[..keep.min(produced.len())]);
        }

        debug!(
            "Resampled segment {} Hz -> {} Hz: {} -> {} samples",
            self.input_rate,
            self.output_rate,
            input.len(),
            output.len()
        );

        Ok(output)
    }
}

/// Resample mono audio in one step; identical rates are a copy
pub fn resample_mono(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == output_rate {
        return Ok(input.to_vec());
    }
    MonoResampler::new(input_rate, output_rate)?.process(input)
}
