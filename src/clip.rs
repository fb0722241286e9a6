//! Named sound-effect clips.

use crate::audio_data::{ClipData, StreamingClip};
use crate::error::Result;
use crate::signal::SignalSource;
use crate::source::AudioSource;
use crate::spatial::Listener;

/// How a clip should be loaded and played.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipDesc {
    pub looping: bool,
    pub auto_play: bool,
    pub spatialize: bool,
    pub volume: f32,
    /// Candidate media files, tried in order.
    pub paths: Vec<String>,
}

impl Default for ClipDesc {
    fn default() -> Self {
        Self {
            looping: false,
            auto_play: false,
            spatialize: true,
            volume: 1.0,
            paths: Vec::new(),
        }
    }
}

impl ClipDesc {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            paths: vec![path.into()],
            ..Self::default()
        }
    }

    /// Adds another candidate file, used when earlier ones cannot be played.
    pub fn alternative(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn auto_play(mut self, auto_play: bool) -> Self {
        self.auto_play = auto_play;
        self
    }

    pub fn spatialize(mut self, spatialize: bool) -> Self {
        self.spatialize = spatialize;
        self
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }
}

/// Where a clip's samples come from.
pub enum ClipReader {
    /// Decoded up front; the cursor indexes into the shared samples.
    Buffered { data: ClipData, cursor: usize },
    /// Decoded from disk while playing.
    Streaming(Box<StreamingClip>),
}

impl ClipReader {
    pub fn buffered(data: ClipData) -> Self {
        Self::Buffered { data, cursor: 0 }
    }

    pub fn streaming(clip: StreamingClip) -> Self {
        Self::Streaming(Box::new(clip))
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }

    pub fn rewind(&mut self) -> Result<()> {
        match self {
            Self::Buffered { cursor, .. } => {
                *cursor = 0;
                Ok(())
            }
            Self::Streaming(clip) => clip.rewind(),
        }
    }
}

impl SignalSource for ClipReader {
    fn read(&mut self, out: &mut [f32]) -> usize {
        match self {
            Self::Buffered { data, cursor } => {
                let samples = data.samples();
                let count = samples.len().saturating_sub(*cursor).min(out.len());
                out[..count].copy_from_slice(&samples[*cursor..*cursor + count]);
                *cursor += count;
                count
            }
            Self::Streaming(clip) => clip.read(out),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            Self::Buffered { data, cursor } => *cursor >= data.len(),
            Self::Streaming(clip) => clip.is_finished(),
        }
    }
}

/// Reads a clip, wrapping to the start when looping.
struct LoopingRead<'a> {
    reader: &'a mut ClipReader,
    looping: bool,
}

impl SignalSource for LoopingRead<'_> {
    fn read(&mut self, out: &mut [f32]) -> usize {
        let mut filled = self.reader.read(out);
        while self.looping && filled < out.len() && self.reader.is_finished() {
            if let Err(e) = self.reader.rewind() {
                log::warn!("Failed to loop clip: {}", e);
                break;
            }
            let read = self.reader.read(&mut out[filled..]);
            if read == 0 {
                break;
            }
            filled += read;
        }
        filled
    }

    fn is_finished(&self) -> bool {
        !self.looping && self.reader.is_finished()
    }
}

/// A loaded clip with HTML-media-like controls.
pub struct PlayableClip {
    source: AudioSource,
    reader: ClipReader,
    path: String,
    looping: bool,
    playing: bool,
}

impl PlayableClip {
    pub(crate) fn new(source: AudioSource, reader: ClipReader, path: String, looping: bool) -> Self {
        Self {
            source,
            reader,
            path,
            looping,
            playing: false,
        }
    }

    pub fn id(&self) -> &str {
        self.source.id()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source(&self) -> &AudioSource {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut AudioSource {
        &mut self.source
    }

    pub fn reader(&self) -> &ClipReader {
        &self.reader
    }

    /// Starts or resumes playback; a clip that ran to its end starts over.
    pub fn play(&mut self) {
        if self.reader.is_finished() {
            if let Err(e) = self.reader.rewind() {
                log::warn!("Cannot restart clip {}: {}", self.id(), e);
                return;
            }
        }
        self.playing = true;
        log::debug!("Playing clip {}", self.id());
    }

    /// Stops playback and rewinds to the start.
    pub fn stop(&mut self) {
        self.playing = false;
        if let Err(e) = self.reader.rewind() {
            log::warn!("Cannot rewind clip {}: {}", self.id(), e);
        }
        log::debug!("Stopped clip {}", self.id());
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn volume(&self) -> f32 {
        self.source.volume()
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.source.set_volume(volume);
    }

    /// Mixes one block into `out` while playing. Playback ends on its own
    /// once a non-looping clip runs out of samples.
    pub fn render(&mut self, listener: &mut Listener, out: &mut [f32]) -> usize {
        if !self.playing {
            return 0;
        }

        let mut read = LoopingRead {
            reader: &mut self.reader,
            looping: self.looping,
        };
        let count = self.source.render_from(&mut read, listener, out);
        if read.is_finished() {
            self.playing = false;
            log::debug!("Clip {} finished", self.source.id());
        }
        count
    }
}
