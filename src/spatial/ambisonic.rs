use super::ListenerContext;
use super::hrtf;
use crate::error::{Result, VoiceFieldError};
use crate::math::Vec3;
use audionimbus::{
    AmbisonicsDecodeEffect, AmbisonicsDecodeEffectParams, AmbisonicsDecodeEffectSettings,
    AmbisonicsEncodeEffect, AmbisonicsEncodeEffectParams, AmbisonicsEncodeEffectSettings,
    AudioBufferSettings, AudioSettings, Context, CoordinateSystem, Direction, Hrtf,
    SpeakerLayout, Vector3, audio_buffer::AudioBuffer as AudioNimbusAudioBuffer,
};

const AMBISONIC_ORDER: u32 = 2;
const AMBISONIC_CHANNELS: usize = 9;

/// Steam Audio state shared by every ambisonic emitter: the HRTF, the
/// binaural decoder and the order-2 accumulation bus.
pub struct AmbisonicListener {
    context: Context,
    audio_settings: AudioSettings,
    hrtf: Hrtf,
    decode_effect: AmbisonicsDecodeEffect,
    frame_size: usize,

    summed: Vec<f32>,
    decoded: Vec<f32>,
    binaural: Vec<f32>,
    contributions: usize,
}

impl AmbisonicListener {
    pub fn new(ctx: &ListenerContext) -> Result<Self> {
        log::info!(
            "Initializing Steam Audio ambisonic listener (sample_rate: {} Hz, frame_size: {})",
            ctx.sample_rate,
            ctx.block_size
        );

        let context = Context::try_new(&audionimbus::ContextSettings::default()).map_err(|e| {
            VoiceFieldError::Spatialization(format!("Failed to create Steam Audio context: {}", e))
        })?;

        let audio_settings = AudioSettings {
            sampling_rate: ctx.sample_rate,
            frame_size: ctx.block_size as u32,
        };

        let hrtf = hrtf::load_hrtf(&context, &audio_settings, ctx.hrtf_path.as_deref())?;

        let decode_effect = AmbisonicsDecodeEffect::try_new(
            &context,
            &audio_settings,
            &AmbisonicsDecodeEffectSettings {
                max_order: AMBISONIC_ORDER,
                speaker_layout: SpeakerLayout::Stereo,
                hrtf: &hrtf,
            },
        )
        .map_err(|e| {
            VoiceFieldError::Spatialization(format!(
                "Failed to create AmbisonicsDecodeEffect: {}",
                e
            ))
        })?;

        let frame_size = ctx.block_size;
        Ok(Self {
            context,
            audio_settings,
            hrtf,
            decode_effect,
            frame_size,
            summed: vec![0.0; frame_size * AMBISONIC_CHANNELS],
            decoded: vec![0.0; frame_size * 2],
            binaural: vec![0.0; frame_size * 2],
            contributions: 0,
        })
    }

    pub(crate) fn create_emitter(&self) -> Result<AmbisonicEmitter> {
        let encode_effect = AmbisonicsEncodeEffect::try_new(
            &self.context,
            &self.audio_settings,
            &AmbisonicsEncodeEffectSettings {
                max_order: AMBISONIC_ORDER,
            },
        )
        .map_err(|e| {
            VoiceFieldError::Spatialization(format!(
                "Failed to create AmbisonicsEncodeEffect: {}",
                e
            ))
        })?;

        Ok(AmbisonicEmitter {
            encode_effect,
            frame_size: self.frame_size,
            direction: Vec3::NEG_Z,
            input: vec![0.0; self.frame_size],
            encoded: vec![0.0; self.frame_size * AMBISONIC_CHANNELS],
        })
    }

    pub(crate) fn begin_block(&mut self) {
        self.summed.fill(0.0);
        self.contributions = 0;
    }

    fn accumulate(&mut self, encoded: &[f32]) {
        for (sum, sample) in self.summed.iter_mut().zip(encoded) {
            *sum += *sample;
        }
        self.contributions += 1;
    }

    /// Decodes the accumulated bus binaurally and adds it to the first two
    /// channels of the interleaved `out` block.
    pub(crate) fn finish_block(&mut self, out: &mut [f32], channels: usize) -> Result<()> {
        if self.contributions == 0 || channels < 2 {
            return Ok(());
        }

        let decode_params = AmbisonicsDecodeEffectParams {
            order: AMBISONIC_ORDER,
            hrtf: &self.hrtf,
            orientation: CoordinateSystem {
                ahead: Vector3::new(0.0, 0.0, -1.0),
                ..Default::default()
            },
            binaural: true,
        };

        let input_buf = AudioNimbusAudioBuffer::try_with_data_and_settings(
            &self.summed,
            AudioBufferSettings {
                num_channels: Some(AMBISONIC_CHANNELS as u32),
                ..Default::default()
            },
        )
        .map_err(|e| {
            VoiceFieldError::Spatialization(format!("Failed to create input buffer: {}", e))
        })?;

        let output_buf = AudioNimbusAudioBuffer::try_with_data_and_settings(
            &mut self.decoded,
            AudioBufferSettings {
                num_channels: Some(2),
                ..Default::default()
            },
        )
        .map_err(|e| {
            VoiceFieldError::Spatialization(format!("Failed to create output buffer: {}", e))
        })?;

        self.decode_effect
            .apply(&decode_params, &input_buf, &output_buf);

        let decoded_buf = AudioNimbusAudioBuffer::try_with_data_and_settings(
            &mut self.decoded,
            AudioBufferSettings {
                num_channels: Some(2),
                ..Default::default()
            },
        )
        .map_err(|e| {
            VoiceFieldError::Spatialization(format!("Failed to create decoded buffer: {}", e))
        })?;

        decoded_buf.interleave(&self.context, &mut self.binaural);

        let frames = (out.len() / channels).min(self.frame_size);
        for i in 0..frames {
            out[i * channels] += self.binaural[i * 2];
            out[i * channels + 1] += self.binaural[i * 2 + 1];
        }

        Ok(())
    }
}

/// Per-source ambisonic encoder.
pub struct AmbisonicEmitter {
    encode_effect: AmbisonicsEncodeEffect,
    frame_size: usize,
    direction: Vec3,
    input: Vec<f32>,
    encoded: Vec<f32>,
}

impl AmbisonicEmitter {
    /// `local` is the source position in listener space as (right, up,
    /// forward) components.
    pub(crate) fn set_direction(&mut self, local: Vec3) {
        let direction = Vec3::new(local.x, local.y, -local.z);
        self.direction = direction.try_normalize().unwrap_or(Vec3::NEG_Z);
    }

    /// Encodes one mono block, scaled by a per-frame gain ramp, onto the
    /// listener's ambisonic bus.
    pub(crate) fn encode(
        &mut self,
        input: &[f32],
        first_gain: f32,
        gain_step: f32,
        listener: &mut AmbisonicListener,
    ) -> Result<()> {
        self.input.fill(0.0);
        let frames = input.len().min(self.frame_size);
        for (i, sample) in input[..frames].iter().enumerate() {
            self.input[i] = sample * (first_gain + gain_step * i as f32);
        }

        let encode_params = AmbisonicsEncodeEffectParams {
            direction: Direction::new(self.direction.x, self.direction.y, self.direction.z),
            order: AMBISONIC_ORDER,
        };

        let input_buf = AudioNimbusAudioBuffer::try_with_data_and_settings(
            &self.input,
            AudioBufferSettings {
                num_channels: Some(1),
                ..Default::default()
            },
        )
        .map_err(|e| {
            VoiceFieldError::Spatialization(format!("Failed to create input buffer: {}", e))
        })?;

        let output_buf = AudioNimbusAudioBuffer::try_with_data_and_settings(
            &mut self.encoded,
            AudioBufferSettings {
                num_channels: Some(AMBISONIC_CHANNELS as u32),
                ..Default::default()
            },
        )
        .map_err(|e| {
            VoiceFieldError::Spatialization(format!("Failed to create output buffer: {}", e))
        })?;

        self.encode_effect
            .apply(&encode_params, &input_buf, &output_buf);

        listener.accumulate(&self.encoded);
        Ok(())
    }
}
