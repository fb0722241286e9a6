use super::ambisonic::AmbisonicEmitter;
use super::listener::{Listener, PannerApi};
use super::{AudioProperties, SmoothedParam, SpatialTier};
use crate::graph::{AudioGraphLedger, NodeId};
use crate::math::{PoseState, Vec3};
use std::f32::consts::FRAC_PI_4;

enum EmitterKind {
    Passthrough,
    Volume {
        gain: SmoothedParam,
    },
    Panner {
        api: PannerApi,
        left: SmoothedParam,
        right: SmoothedParam,
    },
    Ambisonic {
        gain: SmoothedParam,
        encoder: Box<AmbisonicEmitter>,
    },
}

/// Per-source spatializer, created by the active [`Listener`].
///
/// An emitter mixes one mono block of its source into the interleaved output
/// (or, for the ambisonic tier, into the listener's bus) according to the
/// last positions it was given.
pub struct Emitter {
    kind: EmitterKind,
    properties: AudioProperties,
    is_remote: bool,
    input: NodeId,
    nodes: Vec<NodeId>,
    downstream: NodeId,
}

impl Emitter {
    pub(super) fn passthrough(
        ledger: &mut AudioGraphLedger,
        input: NodeId,
        downstream: NodeId,
        is_remote: bool,
    ) -> Self {
        Self::wired(
            EmitterKind::Passthrough,
            ledger,
            input,
            downstream,
            Vec::new(),
            AudioProperties::default(),
            is_remote,
        )
    }

    pub(super) fn volume(
        ledger: &mut AudioGraphLedger,
        input: NodeId,
        downstream: NodeId,
        label: &str,
        properties: AudioProperties,
        is_remote: bool,
    ) -> Self {
        let node = ledger.create_node(format!("{} distance gain", label));
        Self::wired(
            EmitterKind::Volume {
                gain: SmoothedParam::new(1.0, true),
            },
            ledger,
            input,
            downstream,
            vec![node],
            properties,
            is_remote,
        )
    }

    pub(super) fn panner(
        ledger: &mut AudioGraphLedger,
        input: NodeId,
        downstream: NodeId,
        label: &str,
        api: PannerApi,
        properties: AudioProperties,
        is_remote: bool,
    ) -> Self {
        let ramp = api == PannerApi::Modern;
        let node = ledger.create_node(format!("{} panner", label));
        Self::wired(
            EmitterKind::Panner {
                api,
                left: SmoothedParam::new(FRAC_PI_4.cos(), ramp),
                right: SmoothedParam::new(FRAC_PI_4.sin(), ramp),
            },
            ledger,
            input,
            downstream,
            vec![node],
            properties,
            is_remote,
        )
    }

    pub(super) fn ambisonic(
        ledger: &mut AudioGraphLedger,
        input: NodeId,
        downstream: NodeId,
        label: &str,
        encoder: AmbisonicEmitter,
        properties: AudioProperties,
        is_remote: bool,
    ) -> Self {
        let gain_node = ledger.create_node(format!("{} distance gain", label));
        let encoder_node = ledger.create_node(format!("{} ambisonic encoder", label));
        Self::wired(
            EmitterKind::Ambisonic {
                gain: SmoothedParam::new(1.0, true),
                encoder: Box::new(encoder),
            },
            ledger,
            input,
            downstream,
            vec![gain_node, encoder_node],
            properties,
            is_remote,
        )
    }

    /// Chains `input -> nodes... -> downstream` in the ledger.
    fn wired(
        kind: EmitterKind,
        ledger: &mut AudioGraphLedger,
        input: NodeId,
        downstream: NodeId,
        nodes: Vec<NodeId>,
        properties: AudioProperties,
        is_remote: bool,
    ) -> Self {
        let mut previous = input;
        for node in &nodes {
            ledger.connect(previous, *node);
            previous = *node;
        }
        ledger.connect(previous, downstream);

        Self {
            kind,
            properties,
            is_remote,
            input,
            nodes,
            downstream,
        }
    }

    pub fn tier(&self) -> SpatialTier {
        match self.kind {
            EmitterKind::Passthrough => SpatialTier::None,
            EmitterKind::Volume { .. } => SpatialTier::Low,
            EmitterKind::Panner { .. } => SpatialTier::Medium,
            EmitterKind::Ambisonic { .. } => SpatialTier::High,
        }
    }

    pub fn panner_api(&self) -> Option<PannerApi> {
        match self.kind {
            EmitterKind::Panner { api, .. } => Some(api),
            _ => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    pub fn audio_properties(&self) -> &AudioProperties {
        &self.properties
    }

    /// Whether distance settings influence this emitter at all.
    pub fn supports_audio_properties(&self) -> bool {
        !matches!(self.kind, EmitterKind::Passthrough)
    }

    pub fn set_audio_properties(&mut self, properties: AudioProperties) {
        self.properties = properties;
    }

    /// Current per-channel gain targets as (left, right). Mono tiers report
    /// the same value twice.
    pub fn gains(&self) -> (f32, f32) {
        match &self.kind {
            EmitterKind::Passthrough => (1.0, 1.0),
            EmitterKind::Volume { gain } | EmitterKind::Ambisonic { gain, .. } => {
                (gain.target(), gain.target())
            }
            EmitterKind::Panner { left, right, .. } => (left.target(), right.target()),
        }
    }

    /// Positions the source relative to the listener. `source` is the
    /// source's rendered pose (comfort offset included).
    pub fn update(&mut self, source: &PoseState, listener: &PoseState) {
        let distance_gain = self
            .properties
            .gain_at(source.position.distance(listener.position));

        match &mut self.kind {
            EmitterKind::Passthrough => {}
            EmitterKind::Volume { gain } => gain.set_target(distance_gain),
            EmitterKind::Panner { left, right, .. } => {
                let (l, r) = equal_power_pan(listener.to_local(source.position));
                left.set_target(l * distance_gain);
                right.set_target(r * distance_gain);
            }
            EmitterKind::Ambisonic { gain, encoder } => {
                gain.set_target(distance_gain);
                encoder.set_direction(listener.to_local(source.position));
            }
        }
    }

    /// Mixes one mono block into `out` (interleaved, `listener.channels()`
    /// wide).
    pub fn render(&mut self, input: &[f32], listener: &mut Listener, out: &mut [f32]) {
        let channels = listener.channels();
        if channels == 0 {
            return;
        }
        let frames = input.len().min(out.len() / channels);

        match &mut self.kind {
            EmitterKind::Passthrough => {
                for (frame, sample) in out.chunks_mut(channels).zip(&input[..frames]) {
                    for out_sample in frame.iter_mut() {
                        *out_sample += *sample;
                    }
                }
            }
            EmitterKind::Volume { gain } => {
                let (first, step) = gain.advance(frames);
                for (i, (frame, sample)) in out.chunks_mut(channels).zip(&input[..frames]).enumerate()
                {
                    let value = sample * (first + step * i as f32);
                    for out_sample in frame.iter_mut() {
                        *out_sample += value;
                    }
                }
            }
            EmitterKind::Panner { left, right, .. } => {
                let (left_first, left_step) = left.advance(frames);
                let (right_first, right_step) = right.advance(frames);
                let right_channel = 1.min(channels - 1);
                for (i, (frame, sample)) in out.chunks_mut(channels).zip(&input[..frames]).enumerate()
                {
                    frame[0] += sample * (left_first + left_step * i as f32);
                    frame[right_channel] += sample * (right_first + right_step * i as f32);
                }
            }
            EmitterKind::Ambisonic { gain, encoder } => {
                let (first, step) = gain.advance(frames);
                match listener.ambisonic_mut() {
                    Some(bus) => {
                        if let Err(e) = encoder.encode(&input[..frames], first, step, bus) {
                            log::warn!("Ambisonic encode failed: {}", e);
                        }
                    }
                    None => log::warn!("Ambisonic emitter rendered without an ambisonic listener"),
                }
            }
        }
    }

    /// Removes the emitter's edges and nodes from the ledger, then drops it.
    pub fn dispose(self, ledger: &mut AudioGraphLedger) {
        let first = self.nodes.first().copied().unwrap_or(self.downstream);
        ledger.disconnect_from(self.input, first);
        for node in &self.nodes {
            ledger.release_node(*node);
        }
        log::debug!("Disposed {} emitter fed by {}", self.tier(), self.input);
    }
}

/// Equal-power stereo gains for a listener-space position given as (right,
/// up, forward). Sources straight ahead, behind or on top of the listener
/// are centered.
fn equal_power_pan(local: Vec3) -> (f32, f32) {
    let horizontal = (local.x * local.x + local.z * local.z).sqrt();
    let pan = if horizontal > f32::EPSILON {
        (local.x / horizontal).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let angle = (pan + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{DistanceModel, ListenerBackend, ListenerContext};

    fn listener(backend: ListenerBackend, ledger: &mut AudioGraphLedger) -> Listener {
        let destination = ledger.create_node("destination");
        let ctx = ListenerContext {
            sample_rate: 48000,
            block_size: 4,
            channels: 2,
            hrtf_path: None,
        };
        let props = AudioProperties::new(1.0, 11.0, 1.0, DistanceModel::Linear, 0.5);
        Listener::new(backend, &ctx, props, ledger, destination)
    }

    #[test]
    fn test_equal_power_pan() {
        let (l, r) = equal_power_pan(Vec3::new(1.0, 0.0, 0.0));
        assert!(l.abs() < 1e-6 && (r - 1.0).abs() < 1e-6);
        let (l, r) = equal_power_pan(Vec3::new(-3.0, 0.0, 0.0));
        assert!((l - 1.0).abs() < 1e-6 && r.abs() < 1e-6);
        let (l, r) = equal_power_pan(Vec3::ZERO);
        assert!((l - r).abs() < 1e-6);
        assert!((l * l + r * r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_panner_places_source_on_the_right() {
        let mut ledger = AudioGraphLedger::new();
        let mut listener = listener(ListenerBackend::Panner(PannerApi::Legacy), &mut ledger);
        let input = ledger.create_node("alice gain");
        let mut emitter = listener.create_spatializer(true, true, &mut ledger, input, "alice");

        // 6 units to the right of an identity listener: linear gain 0.5
        emitter.update(&PoseState::from_position(Vec3::new(6.0, 0.0, 0.0)), listener.pose());
        let mut out = vec![0.0; 8];
        emitter.render(&[1.0; 4], &mut listener, &mut out);

        for frame in out.chunks(2) {
            assert!(frame[0].abs() < 1e-6);
            assert!((frame[1] - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_modern_panner_ramps_across_block() {
        let mut ledger = AudioGraphLedger::new();
        let mut listener = listener(ListenerBackend::Panner(PannerApi::Modern), &mut ledger);
        let input = ledger.create_node("bob gain");
        let mut emitter = listener.create_spatializer(true, true, &mut ledger, input, "bob");

        emitter.update(&PoseState::from_position(Vec3::new(1.0, 0.0, 0.0)), listener.pose());
        let mut out = vec![0.0; 8];
        emitter.render(&[1.0; 4], &mut listener, &mut out);

        emitter.update(&PoseState::from_position(Vec3::new(-1.0, 0.0, 0.0)), listener.pose());
        out.fill(0.0);
        emitter.render(&[1.0; 4], &mut listener, &mut out);
        let left: Vec<f32> = out.chunks(2).map(|f| f[0]).collect();
        assert!(left.windows(2).all(|w| w[1] > w[0]));
        assert!((left[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_volume_scales_every_channel() {
        let mut ledger = AudioGraphLedger::new();
        let mut listener = listener(ListenerBackend::Volume, &mut ledger);
        let input = ledger.create_node("carol gain");
        let mut emitter = listener.create_spatializer(true, false, &mut ledger, input, "carol");

        emitter.update(&PoseState::from_position(Vec3::new(0.0, 0.0, -11.0)), listener.pose());
        assert_eq!(emitter.gains(), (0.0, 0.0));

        emitter.update(&PoseState::from_position(Vec3::new(0.0, 0.0, -1.0)), listener.pose());
        let mut out = vec![0.0; 8];
        emitter.render(&[0.5; 4], &mut listener, &mut out);
        // first update primed the gain at 0, so the block ramps up to 0.5
        assert!((out[6] - 0.5).abs() < 1e-6 && (out[7] - 0.5).abs() < 1e-6);
        assert!(out[0] < out[6]);
    }

    #[test]
    fn test_passthrough_is_unity() {
        let mut ledger = AudioGraphLedger::new();
        let mut listener = listener(ListenerBackend::Passthrough, &mut ledger);
        let input = ledger.create_node("dave gain");
        let mut emitter = listener.create_spatializer(true, true, &mut ledger, input, "dave");
        emitter.update(&PoseState::from_position(Vec3::new(50.0, 0.0, 0.0)), listener.pose());
        let mut out = vec![0.25; 8];
        emitter.render(&[0.5; 4], &mut listener, &mut out);
        assert!(out.iter().all(|s| (*s - 0.75).abs() < 1e-6));
        assert!(!emitter.supports_audio_properties());
    }

    #[test]
    fn test_dispose_tears_down_edges() {
        let mut ledger = AudioGraphLedger::new();
        let listener = listener(ListenerBackend::Volume, &mut ledger);
        let input = ledger.create_node("erin gain");
        let analyser = ledger.create_node("erin analyser");
        ledger.connect(input, analyser);

        let mut listener = listener;
        let emitter = listener.create_spatializer(true, true, &mut ledger, input, "erin");
        assert_eq!(ledger.edge_count(), 3);
        assert_eq!(ledger.incoming_count(listener.output_node()), 1);

        emitter.dispose(&mut ledger);
        assert_eq!(ledger.edge_count(), 1);
        assert_eq!(ledger.incoming_count(listener.output_node()), 0);
        assert_eq!(ledger.outgoing(input).len(), 1);
    }
}
