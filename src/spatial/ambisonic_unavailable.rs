use super::ListenerContext;
use crate::error::{Result, VoiceFieldError};
use crate::math::Vec3;
use std::convert::Infallible;

/// Placeholder for builds without the `steam-audio` feature. It cannot be
/// constructed, so the tier chain always falls through to the panner.
pub struct AmbisonicListener {
    never: Infallible,
}

impl AmbisonicListener {
    pub fn new(_ctx: &ListenerContext) -> Result<Self> {
        Err(VoiceFieldError::Spatialization(
            "Ambisonic rendering requires the steam-audio feature".to_string(),
        ))
    }

    pub(crate) fn create_emitter(&self) -> Result<AmbisonicEmitter> {
        match self.never {}
    }

    pub(crate) fn begin_block(&mut self) {
        match self.never {}
    }

    pub(crate) fn finish_block(&mut self, _out: &mut [f32], _channels: usize) -> Result<()> {
        match self.never {}
    }
}

pub struct AmbisonicEmitter {
    never: Infallible,
}

impl AmbisonicEmitter {
    pub(crate) fn set_direction(&mut self, _local: Vec3) {
        match self.never {}
    }

    pub(crate) fn encode(
        &mut self,
        _input: &[f32],
        _first_gain: f32,
        _gain_step: f32,
        _listener: &mut AmbisonicListener,
    ) -> Result<()> {
        match self.never {}
    }
}
