use crate::error::{Result, VoiceFieldError};
use rubato::{FftFixedIn, Resampler};

/// Whole-buffer mono resampler used for buffered clips.
pub struct AudioResampler {
    source_sample_rate: u32,
    target_sample_rate: u32,
    chunk_size: usize,
}

impl AudioResampler {
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(VoiceFieldError::AudioFormat(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            source_sample_rate,
            target_sample_rate,
            chunk_size: chunk_size.unwrap_or(1024).max(1),
        })
    }

    pub fn resample(&self, samples: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate {
            return Ok(samples.to_vec());
        }

        let mut resampler = FftFixedIn::<f32>::new(
            self.source_sample_rate as usize,
            self.target_sample_rate as usize,
            self.chunk_size,
            2, // sub_chunks
            1,
        )
        .map_err(|e| VoiceFieldError::AudioLoading(format!("Failed to create resampler: {}", e)))?;

        let expected = (samples.len() as f64 * self.resample_ratio()).round() as usize;
        let delay = resampler.output_delay();
        let mut output = Vec::with_capacity(expected + delay + self.chunk_size);
        let mut input_chunk = vec![0.0f32; self.chunk_size];
        let mut input_index = 0;

        // keep feeding silence past the end until the delayed tail is flushed
        while input_index < samples.len() || output.len() < expected + delay {
            input_chunk.fill(0.0);
            if input_index < samples.len() {
                let count = (samples.len() - input_index).min(self.chunk_size);
                input_chunk[..count].copy_from_slice(&samples[input_index..input_index + count]);
                input_index += count;
            }

            let waves_out = resampler
                .process(&[&input_chunk[..]], None)
                .map_err(|e| VoiceFieldError::AudioLoading(format!("Resampling error: {}", e)))?;

            match waves_out.first() {
                Some(channel) if !channel.is_empty() => output.extend_from_slice(channel),
                _ => break,
            }
        }

        let end = (delay + expected).min(output.len());
        Ok(output[delay.min(end)..end].to_vec())
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    pub fn resample_ratio(&self) -> f64 {
        self.target_sample_rate as f64 / self.source_sample_rate as f64
    }
}
