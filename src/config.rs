//! Configuration for voicefield

use crate::spatial::{AudioProperties, SpatialTier};

/// How decoded clips are held in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipStrategy {
    /// Decide once when the manager is constructed.
    #[default]
    Auto,
    /// Decode and resample the whole file up front.
    Buffered,
    /// Decode packets on demand while the clip plays.
    Streaming,
}

/// Configuration descriptor for an [`AudioManager`](crate::AudioManager).
#[derive(Debug, Clone)]
pub struct VoiceFieldDesc {
    /// Sample rate everything is rendered at.
    pub sample_rate: u32,
    /// Frames rendered per [`render_block`](crate::AudioManager::render_block) call.
    pub block_size: usize,
    /// Interleaved output channel count.
    pub channels: u16,
    /// Spatialization tier requested at startup.
    pub tier: SpatialTier,
    /// Radius of the comfort-offset circle.
    pub offset_radius: f32,
    /// Distance, rolloff and transition settings shared by all sources.
    pub audio_properties: AudioProperties,
    /// Frequency bins inspected by each activity analyser.
    pub analyser_buffer_size: usize,
    pub clip_strategy: ClipStrategy,
    /// Optional SOFA file for the ambisonic tier (None uses the default HRTF).
    pub hrtf_path: Option<String>,
    /// Capacity in samples of each user stream's jitter buffer.
    pub stream_capacity: usize,
    /// Rendered blocks the output device may queue.
    pub output_buffer_blocks: usize,
    /// Whether graph edges are recorded for diagnostics.
    pub record_graph: bool,
}

impl Default for VoiceFieldDesc {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 1024,
            channels: 2,
            tier: SpatialTier::High,
            offset_radius: 1.0,
            audio_properties: AudioProperties::default(),
            analyser_buffer_size: 1024,
            clip_strategy: ClipStrategy::Auto,
            hrtf_path: None,
            stream_capacity: 48000,
            output_buffer_blocks: 4,
            record_graph: true,
        }
    }
}

impl VoiceFieldDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn tier(mut self, tier: SpatialTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn offset_radius(mut self, radius: f32) -> Self {
        self.offset_radius = radius;
        self
    }

    pub fn audio_properties(mut self, properties: AudioProperties) -> Self {
        self.audio_properties = properties;
        self
    }

    pub fn analyser_buffer_size(mut self, size: usize) -> Self {
        self.analyser_buffer_size = size;
        self
    }

    pub fn clip_strategy(mut self, strategy: ClipStrategy) -> Self {
        self.clip_strategy = strategy;
        self
    }

    pub fn hrtf_path(mut self, path: impl Into<String>) -> Self {
        self.hrtf_path = Some(path.into());
        self
    }

    pub fn stream_capacity(mut self, samples: usize) -> Self {
        self.stream_capacity = samples;
        self
    }

    pub fn output_buffer_blocks(mut self, blocks: usize) -> Self {
        self.output_buffer_blocks = blocks;
        self
    }

    pub fn record_graph(mut self, record: bool) -> Self {
        self.record_graph = record;
        self
    }
}
