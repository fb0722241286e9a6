mod load_options;
mod resampler;
mod streaming;
mod symphonia_loader;

use crate::error::{Result, VoiceFieldError};
pub use load_options::LoadOptions;
pub use resampler::AudioResampler;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
pub use streaming::StreamingClip;
pub use symphonia_loader::{MediaInfo, load_clip, probe_media};
#[cfg(test)]
pub(crate) use symphonia_loader::tests::write_wav;

/// Receives load progress in `[0, 1]` from the loader thread.
pub type ProgressCallback = Box<dyn Fn(f32) + Send + 'static>;

/// Fully decoded mono clip samples. Cloning shares the sample buffer.
#[derive(Debug, Clone)]
pub struct ClipData {
    inner: Arc<ClipDataInner>,
}

#[derive(Debug)]
struct ClipDataInner {
    samples: Vec<f32>,
    sample_rate: u32,
    duration: Duration,
}

impl ClipData {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration = if sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64)
        };
        Self {
            inner: Arc::new(ClipDataInner {
                samples,
                sample_rate,
                duration,
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn duration(&self) -> Duration {
        self.inner.duration
    }

    pub fn samples(&self) -> &[f32] {
        &self.inner.samples
    }

    pub fn len(&self) -> usize {
        self.inner.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.samples.is_empty()
    }

    /// Resample to a different sample rate using rubato
    pub fn resample(&self, target_sample_rate: u32) -> Result<Self> {
        if target_sample_rate == self.inner.sample_rate {
            return Ok(self.clone());
        }

        let resampler = AudioResampler::new(self.inner.sample_rate, target_sample_rate, Some(1024))?;
        let resampled = resampler.resample(&self.inner.samples)?;
        Ok(Self::new(resampled, target_sample_rate))
    }
}

/// Averages interleaved frames down to one channel.
pub(crate) fn downmix(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

/// Media type a file extension maps to, if the linked decoders can play it.
pub fn media_type(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "wav" | "wave" => Some("audio/wav"),
        "flac" => Some("audio/flac"),
        "ogg" | "oga" => Some("audio/ogg"),
        "mp3" => Some("audio/mpeg"),
        "mka" | "mkv" | "webm" => Some("audio/webm"),
        _ => None,
    }
}

/// Picks the first candidate path whose media type can be decoded.
///
/// Empty candidates are ignored. No candidates at all is
/// [`VoiceFieldError::MissingPath`]; candidates that are all of unknown type
/// are [`VoiceFieldError::UnsupportedMedia`].
pub fn select_playable<'a>(id: &str, paths: &'a [String]) -> Result<&'a str> {
    let mut candidates = paths.iter().map(String::as_str).filter(|p| !p.trim().is_empty());
    let Some(first) = candidates.next() else {
        return Err(VoiceFieldError::MissingPath(id.to_string()));
    };

    std::iter::once(first)
        .chain(candidates)
        .find(|path| media_type(path).is_some())
        .ok_or_else(|| VoiceFieldError::UnsupportedMedia(paths.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_sniffing() {
        assert_eq!(media_type("sounds/chime.WAV"), Some("audio/wav"));
        assert_eq!(media_type("door.mp3"), Some("audio/mpeg"));
        assert_eq!(media_type("notes.txt"), None);
        assert_eq!(media_type("no_extension"), None);
    }

    #[test]
    fn test_select_playable() {
        let paths = vec!["".to_string(), "a.mid".to_string(), "b.ogg".to_string()];
        assert_eq!(select_playable("bell", &paths).unwrap(), "b.ogg");

        let err = select_playable("bell", &["  ".to_string()]).unwrap_err();
        assert!(matches!(err, VoiceFieldError::MissingPath(id) if id == "bell"));

        let err = select_playable("bell", &["a.mid".to_string()]).unwrap_err();
        assert!(matches!(err, VoiceFieldError::UnsupportedMedia(_)));
    }

    #[test]
    fn test_downmix_averages_frames() {
        let mut out = Vec::new();
        downmix(&[1.0, 0.0, 0.5, 0.5], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn test_clip_duration() {
        let clip = ClipData::new(vec![0.0; 24000], 48000);
        assert_eq!(clip.duration(), Duration::from_millis(500));
        assert_eq!(clip.resample(48000).unwrap().len(), 24000);
    }
}
