//! Error types for voicefield

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceFieldError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio loading error: {0}")]
    AudioLoading(String),

    #[error("No media path given for clip {0}")]
    MissingPath(String),

    #[error("Cannot play file: {0}")]
    UnsupportedMedia(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Spatialization error: {0}")]
    Spatialization(String),

    /// Not even the distance-scaling listener could be built, so there is no
    /// output path at all.
    #[error("No listener could be constructed: {0}")]
    NoListener(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, VoiceFieldError>;
