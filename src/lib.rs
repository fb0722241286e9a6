//! Spatial voice chat and sound-effect placement.
//!
//! An [`AudioManager`] places remote participants and sound clips around the
//! local listener, renders them through the best spatialization tier the
//! runtime can build, and reports who is speaking through
//! [`VoiceFieldEvent`]s. [`OutputEngine`] plays the rendered blocks on the
//! default output device.

pub mod activity;
pub mod audio_data;
pub mod clip;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod manager;
pub mod math;
pub mod pose;
pub mod signal;
pub mod source;
pub mod spatial;
pub mod spectrum;

pub use activity::{ActivityAnalyser, ActivityChange};
pub use clip::{ClipDesc, ClipReader, PlayableClip};
pub use clock::AudioClock;
pub use config::{ClipStrategy, VoiceFieldDesc};
pub use engine::{OutputEngine, OutputFeed};
pub use error::{Result, VoiceFieldError};
pub use events::{EventHub, VoiceFieldEvent};
pub use graph::{AudioGraphLedger, NodeId};
pub use manager::AudioManager;
pub use math::{PoseState, Vec3};
pub use pose::Pose;
pub use signal::{SignalSource, StreamWriter, ToneSource, UserStream, user_stream};
pub use source::AudioSource;
pub use spatial::{
    AudioProperties, Capability, CapabilitySet, DistanceModel, Emitter, Listener,
    ListenerBackend, PannerApi, SpatialTier,
};
pub use spectrum::{FrequencyTap, SpectrumTap};
