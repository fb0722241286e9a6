//! Spatialization tiers.
//!
//! A [`Listener`] represents the local user's ears and owns the algorithm in
//! use; every source gets an [`Emitter`] created by the active listener. Four
//! tiers exist, from unity-gain passthrough up to Steam Audio ambisonics, and
//! [`create_listener_backend`] walks them downward until one can be built.

mod emitter;
#[cfg(feature = "steam-audio")]
mod hrtf;
mod listener;
mod param;

#[cfg(feature = "steam-audio")]
mod ambisonic;
#[cfg(not(feature = "steam-audio"))]
#[path = "ambisonic_unavailable.rs"]
mod ambisonic;

pub use ambisonic::{AmbisonicEmitter, AmbisonicListener};
pub use emitter::Emitter;
pub use listener::{
    DefaultListenerBuilder, Listener, ListenerBackend, ListenerBuilder, ListenerContext,
    PannerApi, create_listener_backend,
};
pub(crate) use param::SmoothedParam;

use std::fmt;
use std::str::FromStr;

/// Spatialization quality levels, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SpatialTier {
    /// No spatialization: sources play at unity gain on every channel.
    None,
    /// Distance-based volume scaling only.
    Low,
    /// Equal-power stereo panning with distance attenuation.
    Medium,
    /// Ambisonic encoding decoded binaurally through an HRTF.
    #[default]
    High,
}

impl SpatialTier {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for SpatialTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpatialTier {
    type Err = crate::error::VoiceFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(crate::error::VoiceFieldError::Configuration(format!(
                "Unknown spatialization tier: {}",
                other
            ))),
        }
    }
}

/// Optional implementations that a runtime may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Ambisonic,
    PannerModern,
    PannerLegacy,
}

/// Which optional tier implementations are still worth trying.
///
/// A capability is disabled the first time building it fails and the manager
/// never re-enables it, so a known-broken implementation is not retried on
/// every tier change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySet {
    ambisonic: bool,
    panner_modern: bool,
    panner_legacy: bool,
}

impl CapabilitySet {
    /// Everything assumed supported until proven otherwise.
    pub fn all() -> Self {
        Self {
            ambisonic: true,
            panner_modern: true,
            panner_legacy: true,
        }
    }

    /// Only the tiers that need no optional capability.
    pub fn none() -> Self {
        Self {
            ambisonic: false,
            panner_modern: false,
            panner_legacy: false,
        }
    }

    pub fn is_supported(&self, capability: Capability) -> bool {
        match capability {
            Capability::Ambisonic => self.ambisonic,
            Capability::PannerModern => self.panner_modern,
            Capability::PannerLegacy => self.panner_legacy,
        }
    }

    pub fn disable(&mut self, capability: Capability) {
        match capability {
            Capability::Ambisonic => self.ambisonic = false,
            Capability::PannerModern => self.panner_modern = false,
            Capability::PannerLegacy => self.panner_legacy = false,
        }
    }

    /// Whether any positional panner is left to try.
    pub fn has_positional(&self) -> bool {
        self.panner_modern || self.panner_legacy
    }

    /// Re-enables everything. Intended for tests that share one set.
    pub fn reset(&mut self) {
        *self = Self::all();
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::all()
    }
}

/// Loudness falloff with distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceModel {
    Linear,
    /// Inverse-distance falloff.
    #[default]
    Logarithmic,
}

impl FromStr for DistanceModel {
    type Err = crate::error::VoiceFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "logarithmic" | "inverse" => Ok(Self::Logarithmic),
            other => Err(crate::error::VoiceFieldError::Configuration(format!(
                "Unknown distance model: {}",
                other
            ))),
        }
    }
}

/// Distance and transition settings shared by the listener and its emitters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioProperties {
    /// Distance within which sources play at full volume.
    pub min_distance: f32,
    /// Distance at which linear falloff reaches silence.
    pub max_distance: f32,
    pub rolloff: f32,
    pub algorithm: DistanceModel,
    /// Default pose transition length in seconds.
    pub transition_time: f32,
}

impl Default for AudioProperties {
    fn default() -> Self {
        Self {
            min_distance: 1.0,
            max_distance: 10.0,
            rolloff: 1.0,
            algorithm: DistanceModel::Logarithmic,
            transition_time: 0.5,
        }
    }
}

impl AudioProperties {
    pub fn new(
        min_distance: f32,
        max_distance: f32,
        rolloff: f32,
        algorithm: DistanceModel,
        transition_time: f32,
    ) -> Self {
        Self {
            min_distance,
            max_distance,
            rolloff,
            algorithm,
            transition_time,
        }
    }

    /// Gain in `[0, 1]` for a source `distance` away from the listener.
    pub fn gain_at(&self, distance: f32) -> f32 {
        let min = self.min_distance.max(0.0);
        let max = self.max_distance.max(min);
        let d = distance.max(0.0);

        let gain = match self.algorithm {
            DistanceModel::Linear => {
                let range = max - min;
                if range <= 0.0 {
                    if d <= min { 1.0 } else { 0.0 }
                } else {
                    1.0 - self.rolloff * (d.clamp(min, max) - min) / range
                }
            }
            DistanceModel::Logarithmic => {
                if min <= 0.0 {
                    1.0
                } else {
                    min / (min + self.rolloff * (d.max(min) - min))
                }
            }
        };

        gain.clamp(0.0, 1.0)
    }
}
