use crate::{
    audio_data::{ClipData, LoadOptions, downmix},
    error::{Result, VoiceFieldError},
};
use std::fs::File;
use std::path::Path;
use symphonia::{
    core::{
        audio::SampleBuffer,
        codecs::{Decoder, DecoderOptions},
        errors::Error,
        formats::{FormatOptions, FormatReader},
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// What probing a media file's header revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Total frames, when the container records it.
    pub frames: Option<u64>,
}

/// An opened container with a decoder for its default track.
pub(crate) struct OpenedMedia {
    pub format: Box<dyn FormatReader>,
    pub decoder: Box<dyn Decoder>,
    pub track_id: u32,
    pub info: MediaInfo,
}

/// Opens `path` and sniffs its container header.
pub(crate) fn open_media(path: &str) -> Result<OpenedMedia> {
    let file = File::open(path)?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| {
            VoiceFieldError::UnsupportedMedia(format!("{}: failed to probe format: {}", path, e))
        })?;

    let format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| VoiceFieldError::AudioLoading("No default audio track found".to_string()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| VoiceFieldError::AudioLoading("Sample rate not found".to_string()))?;

    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| VoiceFieldError::AudioLoading("Channel count not found".to_string()))?
        .count() as u16;

    let frames = track.codec_params.n_frames;
    let track_id = track.id;

    let decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| VoiceFieldError::AudioLoading(format!("Failed to create decoder: {}", e)))?;

    Ok(OpenedMedia {
        format,
        decoder,
        track_id,
        info: MediaInfo {
            sample_rate,
            channels,
            frames,
        },
    })
}

/// Probes `path` without decoding any audio.
pub fn probe_media(path: &str) -> Result<MediaInfo> {
    open_media(path).map(|opened| opened.info)
}

impl OpenedMedia {
    /// Decodes the next packet of the default track and appends it to `out`
    /// as mono samples. Returns the frames appended, or `None` at end of
    /// stream.
    pub(crate) fn decode_next(&mut self, out: &mut Vec<f32>) -> Result<Option<usize>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => return Ok(None), // end-of-file
                Err(e) => {
                    return Err(VoiceFieldError::AudioLoading(format!(
                        "Error reading packet: {}",
                        e
                    )));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::IoError(_)) => return Ok(None),
                Err(Error::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(VoiceFieldError::AudioLoading(format!(
                        "Error decoding packet: {}",
                        e
                    )));
                }
            };

            let spec = *decoded.spec();
            let frames = decoded.frames();
            let mut tmp = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            tmp.copy_interleaved_ref(decoded);

            downmix(tmp.samples(), spec.channels.count(), out);
            return Ok(Some(frames));
        }
    }
}

/// Decodes a whole file to mono, resampling when `options` asks for it.
///
/// `on_progress` receives the decoded fraction whenever the container
/// reports its length, and `1.0` once the clip is ready.
pub fn load_clip(
    path: &str,
    options: &LoadOptions,
    on_progress: &dyn Fn(f32),
) -> Result<ClipData> {
    let mut media = open_media(path)?;
    let info = media.info;

    let max_frames = options
        .max_duration
        .map(|d| (d.as_secs_f64() * info.sample_rate as f64) as usize)
        .unwrap_or(usize::MAX);

    let mut samples: Vec<f32> = Vec::new();
    let mut frames_decoded = 0usize;
    let mut last_reported = 0.0f32;

    while frames_decoded < max_frames {
        let Some(frames) = media.decode_next(&mut samples)? else {
            break;
        };
        frames_decoded += frames;

        if let Some(total) = info.frames.filter(|t| *t > 0) {
            let progress = (frames_decoded as f32 / total as f32).min(1.0) * 0.9;
            if progress - last_reported >= 0.05 {
                on_progress(progress);
                last_reported = progress;
            }
        }
    }
    samples.truncate(max_frames);

    log::debug!(
        "Decoded {} frames of {} ({} Hz, {} channel(s))",
        frames_decoded,
        path,
        info.sample_rate,
        info.channels
    );

    let mut clip = ClipData::new(samples, info.sample_rate);
    if let Some(target_rate) = options.target_sample_rate {
        clip = clip.resample(target_rate)?;
    }

    on_progress(1.0);
    Ok(clip)
}
