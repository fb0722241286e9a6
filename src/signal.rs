//! Mono signal sources feeding audio sources.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::f32::consts::TAU;

/// Pull-based mono signal at the render sample rate.
pub trait SignalSource {
    /// Writes up to `out.len()` samples into `out` and returns how many were
    /// written. Samples past the returned count are left unchanged.
    fn read(&mut self, out: &mut [f32]) -> usize;

    /// Whether the source has nothing more to give.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Creates a jitter buffer for one participant: the writer half is handed to
/// whatever receives the network audio, the reader half to
/// [`AudioManager::set_user_stream`](crate::AudioManager::set_user_stream).
pub fn user_stream(capacity: usize) -> (StreamWriter, UserStream) {
    let rb = HeapRb::<f32>::new(capacity.max(1));
    let (producer, consumer) = rb.split();
    (
        StreamWriter {
            producer,
            dropped: 0,
        },
        UserStream {
            consumer,
            underruns: 0,
        },
    )
}

/// Producer side of a user stream.
pub struct StreamWriter {
    producer: HeapProd<f32>,
    dropped: u64,
}

impl StreamWriter {
    /// Queues samples, dropping whatever does not fit.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            self.dropped += (samples.len() - written) as u64;
            log::debug!(
                "User stream full, dropped {} samples",
                samples.len() - written
            );
        }
        written
    }

    pub fn vacant(&self) -> usize {
        self.producer.vacant_len()
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped
    }
}

/// Consumer side of a user stream.
pub struct UserStream {
    consumer: HeapCons<f32>,
    underruns: u64,
}

impl UserStream {
    pub fn buffered(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Reads that found fewer samples than requested.
    pub fn underruns(&self) -> u64 {
        self.underruns
    }
}

impl SignalSource for UserStream {
    fn read(&mut self, out: &mut [f32]) -> usize {
        let read = self.consumer.pop_slice(out);
        if read < out.len() && read > 0 {
            self.underruns += 1;
        }
        read
    }
}

/// A sine tone, endless or of fixed length.
#[derive(Debug, Clone)]
pub struct ToneSource {
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    phase: f32,
    remaining: Option<usize>,
}

impl ToneSource {
    pub fn new(frequency: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            frequency,
            amplitude,
            sample_rate,
            phase: 0.0,
            remaining: None,
        }
    }

    /// Stops after `samples` samples.
    pub fn with_length(mut self, samples: usize) -> Self {
        self.remaining = Some(samples);
        self
    }
}

impl SignalSource for ToneSource {
    fn read(&mut self, out: &mut [f32]) -> usize {
        let count = match self.remaining {
            Some(remaining) => remaining.min(out.len()),
            None => out.len(),
        };

        let increment = TAU * self.frequency / self.sample_rate.max(1) as f32;
        for sample in &mut out[..count] {
            *sample = self.amplitude * self.phase.sin();
            self.phase = (self.phase + increment) % TAU;
        }

        if let Some(remaining) = &mut self.remaining {
            *remaining -= count;
        }
        count
    }

    fn is_finished(&self) -> bool {
        self.remaining == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_stream_passes_samples_through() {
        let (mut writer, mut stream) = user_stream(8);
        assert_eq!(writer.write(&[0.1, 0.2, 0.3]), 3);
        assert_eq!(stream.buffered(), 3);

        let mut out = [9.0; 4];
        assert_eq!(stream.read(&mut out), 3);
        assert_eq!(&out[..3], &[0.1, 0.2, 0.3]);
        assert_eq!(out[3], 9.0);
        assert_eq!(stream.underruns(), 1);
    }

    #[test]
    fn test_writer_drops_overflow() {
        let (mut writer, _stream) = user_stream(4);
        assert_eq!(writer.write(&[1.0; 6]), 4);
        assert_eq!(writer.dropped_samples(), 2);
        assert_eq!(writer.vacant(), 0);
    }

    #[test]
    fn test_tone_with_length_finishes() {
        let mut tone = ToneSource::new(440.0, 0.5, 48000).with_length(5);
        let mut out = [0.0; 4];
        assert_eq!(tone.read(&mut out), 4);
        assert!(!tone.is_finished());
        assert_eq!(tone.read(&mut out), 1);
        assert!(tone.is_finished());
        assert!(out.iter().all(|s| s.abs() <= 0.5));
    }
}
