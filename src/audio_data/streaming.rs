use super::symphonia_loader::{MediaInfo, OpenedMedia, open_media};
use crate::error::{Result, VoiceFieldError};
use crate::signal::SignalSource;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::collections::VecDeque;

const STREAM_CHUNK_FRAMES: usize = 1024;

/// A clip decoded packet by packet while it plays.
///
/// Decoded audio is downmixed to mono and, when the file's rate differs from
/// the render rate, resampled in fixed input chunks with rubato's polynomial
/// resampler. The resampler's output delay is skipped at the start and
/// pushed out with silence at the end, so a stream yields the same
/// `frames * ratio` samples a batch conversion would.
pub struct StreamingClip {
    path: String,
    media: OpenedMedia,
    target_sample_rate: u32,
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    ready: VecDeque<f32>,
    source_exhausted: bool,
    drained: bool,
    /// Leading resampler output still to discard.
    delay_remaining: usize,
    frames_in: usize,
    frames_out: usize,
}

impl StreamingClip {
    pub fn open(path: &str, target_sample_rate: u32) -> Result<Self> {
        let media = open_media(path)?;
        let resampler = Self::make_resampler(media.info.sample_rate, target_sample_rate)?;

        log::debug!(
            "Opened streaming clip {} ({} Hz -> {} Hz)",
            path,
            media.info.sample_rate,
            target_sample_rate
        );

        let delay_remaining = resampler.as_ref().map_or(0, |r| r.output_delay());
        Ok(Self {
            path: path.to_string(),
            media,
            target_sample_rate,
            resampler,
            pending: Vec::with_capacity(STREAM_CHUNK_FRAMES * 2),
            ready: VecDeque::with_capacity(STREAM_CHUNK_FRAMES * 2),
            source_exhausted: false,
            drained: false,
            delay_remaining,
            frames_in: 0,
            frames_out: 0,
        })
    }

    fn make_resampler(source: u32, target: u32) -> Result<Option<FastFixedIn<f32>>> {
        if source == target {
            return Ok(None);
        }
        if source == 0 || target == 0 {
            return Err(VoiceFieldError::AudioFormat(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        let resampler = FastFixedIn::new(
            target as f64 / source as f64,
            1.0,
            PolynomialDegree::Septic,
            STREAM_CHUNK_FRAMES,
            1,
        )
        .map_err(|e| {
            VoiceFieldError::AudioLoading(format!("Failed to create stream resampler: {}", e))
        })?;
        Ok(Some(resampler))
    }

    pub fn info(&self) -> MediaInfo {
        self.media.info
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Starts again from the first frame by reopening the file.
    pub fn rewind(&mut self) -> Result<()> {
        self.media = open_media(&self.path)?;
        self.delay_remaining = match &mut self.resampler {
            Some(resampler) => {
                resampler.reset();
                resampler.output_delay()
            }
            None => 0,
        };
        self.pending.clear();
        self.ready.clear();
        self.source_exhausted = false;
        self.drained = false;
        self.frames_in = 0;
        self.frames_out = 0;
        Ok(())
    }

    /// Decodes and converts until at least `wanted` samples are ready or the
    /// file ends.
    fn fill(&mut self, wanted: usize) {
        while self.ready.len() < wanted && !self.drained {
            let needed = if self.resampler.is_some() {
                STREAM_CHUNK_FRAMES
            } else {
                1
            };

            while !self.source_exhausted && self.pending.len() < needed {
                match self.media.decode_next(&mut self.pending) {
                    Ok(Some(_)) => {}
                    Ok(None) => self.source_exhausted = true,
                    Err(e) => {
                        log::warn!("Streaming clip {} stopped: {}", self.path, e);
                        self.source_exhausted = true;
                    }
                }
            }

            if let Err(e) = self.convert_pending() {
                log::warn!("Streaming clip {} stopped: {}", self.path, e);
                self.pending.clear();
                self.source_exhausted = true;
                self.drained = true;
            }
        }
    }

    /// Output length the frames fed so far resample to.
    fn expected_frames_out(&self) -> usize {
        let ratio = self.target_sample_rate as f64 / self.media.info.sample_rate as f64;
        (self.frames_in as f64 * ratio).round() as usize
    }

    fn convert_pending(&mut self) -> Result<()> {
        let Some(resampler) = &mut self.resampler else {
            self.ready.extend(self.pending.drain(..));
            self.drained = self.source_exhausted;
            return Ok(());
        };

        let available = self.pending.len().min(STREAM_CHUNK_FRAMES);
        if available == 0 && !self.source_exhausted {
            return Ok(());
        }

        // past the end of the file, silence pushes the delayed tail out
        let mut chunk = [0.0f32; STREAM_CHUNK_FRAMES];
        chunk[..available].copy_from_slice(&self.pending[..available]);
        self.pending.drain(..available);

        let waves_out = resampler.process(&[&chunk[..]], None).map_err(|e| {
            VoiceFieldError::AudioLoading(format!("Streaming resampling error: {}", e))
        })?;
        self.frames_in += available;

        let produced = waves_out.first().map_or(&[][..], Vec::as_slice);
        let skip = self.delay_remaining.min(produced.len());
        self.delay_remaining -= skip;
        let mut out = &produced[skip..];

        if self.source_exhausted && self.pending.is_empty() {
            let remaining = self.expected_frames_out().saturating_sub(self.frames_out);
            if out.len() >= remaining || produced.is_empty() {
                out = &out[..out.len().min(remaining)];
                self.drained = true;
            }
        }

        self.frames_out += out.len();
        self.ready.extend(out);
        Ok(())
    }
}

impl SignalSource for StreamingClip {
    fn read(&mut self, out: &mut [f32]) -> usize {
        self.fill(out.len());
        let count = self.ready.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(self.ready.drain(..count)) {
            *slot = sample;
        }
        count
    }

    fn is_finished(&self) -> bool {
        self.drained && self.ready.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_data::write_wav;

    #[test]
    fn test_streams_whole_file_then_finishes() {
        let samples: Vec<f32> = (0..3000).map(|i| ((i % 100) as f32 / 100.0) - 0.5).collect();
        let path = write_wav("stream", 48000, &samples);
        let mut clip = StreamingClip::open(&path, 48000).unwrap();

        let mut out = vec![0.0; 1024];
        let mut total = 0;
        loop {
            let read = clip.read(&mut out);
            if read == 0 {
                break;
            }
            total += read;
        }
        assert_eq!(total, 3000);
        assert!(clip.is_finished());

        clip.rewind().unwrap();
        assert!(!clip.is_finished());
        assert_eq!(clip.read(&mut out), 1024);
        assert!((out[10] - samples[10]).abs() < 1e-3);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_resampling_stream_doubles_length() {
        let path = write_wav("stream-rate", 24000, &vec![0.1; 2048]);
        let mut clip = StreamingClip::open(&path, 48000).unwrap();

        let mut out = vec![0.0; 512];
        let mut total = 0;
        while !clip.is_finished() {
            total += clip.read(&mut out);
        }
        assert_eq!(total, 4096);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_resampled_stream_starts_without_delay_after_rewind() {
        let path = write_wav("stream-delay", 24000, &vec![0.1; 3000]);
        let mut clip = StreamingClip::open(&path, 48000).unwrap();

        let mut out = vec![0.0; 256];
        assert_eq!(clip.read(&mut out), 256);
        assert!((out[0] - 0.1).abs() < 0.02, "first sample {}", out[0]);

        while !clip.is_finished() {
            clip.read(&mut out);
        }

        clip.rewind().unwrap();
        assert_eq!(clip.read(&mut out), 256);
        assert!((out[0] - 0.1).abs() < 0.02, "first sample {}", out[0]);

        let mut total = 256;
        while !clip.is_finished() {
            total += clip.read(&mut out);
        }
        assert_eq!(total, 6000);
        std::fs::remove_file(path).ok();
    }
}
