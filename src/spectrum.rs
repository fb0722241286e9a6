//! Frequency analysis tap.
//!
//! [`SpectrumTap`] sits on a source's render path, keeps the most recent window
//! of samples and turns it into per-bin decibel levels on demand.

use crate::error::{Result, VoiceFieldError};
use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

/// Time smoothing applied between successive reads (0 = none).
const SMOOTHING_TIME_CONSTANT: f32 = 0.8;

/// Levels are floored here so silence never produces `-inf` averages.
const MIN_DECIBELS: f32 = -200.0;

/// Anything that can report per-bin frequency levels in decibels.
pub trait FrequencyTap {
    fn sample_rate(&self) -> u32;

    fn frequency_bin_count(&self) -> usize;

    /// Fills `out` with decibel levels, lowest bin first. Bins beyond
    /// `frequency_bin_count()` are left untouched.
    fn read_frequency_data(&mut self, out: &mut [f32]);
}

pub struct SpectrumTap {
    sample_rate: u32,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    /// Circular history of the latest `fft_size` samples.
    history: Vec<f32>,
    write_pos: usize,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl SpectrumTap {
    /// Creates a tap with `fft_size / 2` frequency bins.
    ///
    /// `fft_size` must be a power of two of at least 32.
    pub fn new(sample_rate: u32, fft_size: usize) -> Result<Self> {
        if sample_rate == 0 {
            return Err(VoiceFieldError::Analysis(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        if fft_size < 32 || !fft_size.is_power_of_two() {
            return Err(VoiceFieldError::Analysis(format!(
                "FFT size must be a power of two >= 32, got {}",
                fft_size
            )));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Blackman window
        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / n;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Ok(Self {
            sample_rate,
            fft_size,
            fft,
            history: vec![0.0; fft_size],
            write_pos: 0,
            window,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; fft_size / 2],
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Appends mono samples to the analysis window.
    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    pub fn clear(&mut self) {
        self.history.fill(0.0);
        self.smoothed.fill(0.0);
        self.write_pos = 0;
    }

    /// Frequency at the centre of `bin`.
    pub fn bin_to_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.fft_size as f32
    }
}

impl FrequencyTap for SpectrumTap {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    fn read_frequency_data(&mut self, out: &mut [f32]) {
        // oldest sample first
        for i in 0..self.fft_size {
            let sample = self.history[(self.write_pos + i) % self.fft_size];
            self.scratch[i] = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        for (bin, value) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.scratch[bin].norm() * scale;
            *value = SMOOTHING_TIME_CONSTANT * *value + (1.0 - SMOOTHING_TIME_CONSTANT) * magnitude;
        }

        for (slot, &magnitude) in out.iter_mut().zip(self.smoothed.iter()) {
            *slot = if magnitude > 0.0 {
                (20.0 * magnitude.log10()).max(MIN_DECIBELS)
            } else {
                MIN_DECIBELS
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32)
                        .sin()
            })
            .collect()
    }

    #[test]
    fn test_rejects_bad_fft_size() {
        assert!(SpectrumTap::new(48000, 0).is_err());
        assert!(SpectrumTap::new(48000, 1000).is_err());
        assert!(SpectrumTap::new(48000, 16).is_err());
        assert!(SpectrumTap::new(0, 1024).is_err());
        assert_eq!(SpectrumTap::new(48000, 2048).unwrap().frequency_bin_count(), 1024);
    }

    #[test]
    fn test_silence_reads_floor() {
        let mut tap = SpectrumTap::new(48000, 256).unwrap();
        tap.push_samples(&[0.0; 256]);
        let mut out = vec![0.0; 128];
        tap.read_frequency_data(&mut out);
        assert!(out.iter().all(|&db| db == MIN_DECIBELS));
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let sample_rate = 48000;
        let mut tap = SpectrumTap::new(sample_rate, 2048).unwrap();
        let frequency = 187.5; // exactly bin 8
        tap.push_samples(&sine(frequency, sample_rate, 2048, 0.5));

        let mut out = vec![0.0; 1024];
        for _ in 0..20 {
            tap.read_frequency_data(&mut out);
        }

        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 8);
        assert!((tap.bin_to_frequency(peak) - frequency).abs() < 1e-3);
        assert!(out[peak] > -40.0);
        assert!(out[400] < out[peak] - 40.0);
    }
}
