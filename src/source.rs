//! Audio sources: a pose, a gain and the emitter that places them.

use crate::activity::{ActivityAnalyser, ActivityChange};
use crate::graph::{AudioGraphLedger, NodeId};
use crate::math::PoseState;
use crate::pose::Pose;
use crate::signal::SignalSource;
use crate::spatial::{Emitter, Listener};
use crate::spectrum::SpectrumTap;

/// One positioned sound: a remote participant's voice or a clip.
///
/// The source owns its [`Pose`] and its current [`Emitter`]. The emitter is
/// replaced whenever the listener changes tier and is always torn down in
/// the ledger before it is dropped.
pub struct AudioSource {
    id: String,
    pose: Pose,
    emitter: Option<Emitter>,
    volume: f32,
    disposed: bool,
    spatialize: bool,
    is_remote: bool,
    gain_node: NodeId,
    signal_node: Option<NodeId>,
    analyser_node: Option<NodeId>,
    signal: Option<Box<dyn SignalSource>>,
    analyser: Option<ActivityAnalyser<SpectrumTap>>,
    scratch: Vec<f32>,
}

impl AudioSource {
    pub fn new(
        id: impl Into<String>,
        is_remote: bool,
        spatialize: bool,
        volume: f32,
        block_size: usize,
        ledger: &mut AudioGraphLedger,
    ) -> Self {
        let id = id.into();
        let gain_node = ledger.create_node(format!("{} gain", id));
        Self {
            id,
            pose: Pose::new(),
            emitter: None,
            volume,
            disposed: false,
            spatialize,
            is_remote,
            gain_node,
            signal_node: None,
            analyser_node: None,
            signal: None,
            analyser: None,
            scratch: vec![0.0; block_size],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn pose_mut(&mut self) -> &mut Pose {
        &mut self.pose
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.max(0.0);
    }

    pub fn spatialize(&self) -> bool {
        self.spatialize
    }

    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn emitter(&self) -> Option<&Emitter> {
        self.emitter.as_ref()
    }

    pub fn emitter_mut(&mut self) -> Option<&mut Emitter> {
        self.emitter.as_mut()
    }

    pub fn has_signal(&self) -> bool {
        self.signal.is_some()
    }

    pub fn analyser(&self) -> Option<&ActivityAnalyser<SpectrumTap>> {
        self.analyser.as_ref()
    }

    pub fn gain_node(&self) -> NodeId {
        self.gain_node
    }

    /// Replaces the emitter with a new one from `listener`.
    pub fn attach_emitter(&mut self, listener: &mut Listener, ledger: &mut AudioGraphLedger) {
        if self.disposed {
            return;
        }
        self.detach_emitter(ledger);
        let emitter = listener.create_spatializer(
            self.spatialize,
            self.is_remote,
            ledger,
            self.gain_node,
            &self.id,
        );
        self.emitter = Some(emitter);
    }

    pub fn detach_emitter(&mut self, ledger: &mut AudioGraphLedger) {
        if let Some(emitter) = self.emitter.take() {
            emitter.dispose(ledger);
        }
    }

    /// Switches spatialization on or off, rebuilding an existing emitter.
    pub fn set_spatialize(
        &mut self,
        spatialize: bool,
        listener: &mut Listener,
        ledger: &mut AudioGraphLedger,
    ) {
        if self.spatialize == spatialize {
            return;
        }
        self.spatialize = spatialize;
        if self.emitter.is_some() {
            self.attach_emitter(listener, ledger);
        }
    }

    /// Replaces the signal feeding this source. Passing `None` only removes
    /// the current one.
    pub fn set_signal(
        &mut self,
        signal: Option<Box<dyn SignalSource>>,
        ledger: &mut AudioGraphLedger,
    ) {
        if let Some(node) = self.signal_node.take() {
            ledger.release_node(node);
        }
        self.signal = signal;
        if self.signal.is_some() {
            let node = ledger.create_node(format!("{} stream", self.id));
            ledger.connect(node, self.gain_node);
            self.signal_node = Some(node);
        }
    }

    pub fn attach_analyser(
        &mut self,
        analyser: ActivityAnalyser<SpectrumTap>,
        ledger: &mut AudioGraphLedger,
    ) {
        self.detach_analyser(ledger);
        let node = ledger.create_node(format!("{} analyser", self.id));
        ledger.connect(self.gain_node, node);
        self.analyser_node = Some(node);
        self.analyser = Some(analyser);
    }

    pub fn detach_analyser(&mut self, ledger: &mut AudioGraphLedger) {
        if let Some(node) = self.analyser_node.take() {
            ledger.disconnect_from(self.gain_node, node);
            ledger.release_node(node);
        }
        self.analyser = None;
    }

    /// Advances the pose to `t` and repositions the emitter.
    pub fn update(&mut self, t: f64, listener: &PoseState) {
        if self.disposed {
            return;
        }
        self.pose.update(t);
        if let Some(emitter) = &mut self.emitter {
            emitter.update(&self.pose.rendered(), listener);
        }
    }

    /// Runs one activity analysis step.
    pub fn update_activity(&mut self) -> Option<ActivityChange> {
        self.analyser.as_mut().and_then(|analyser| analyser.update())
    }

    /// Renders one block from the source's own signal. Returns the number of
    /// samples the signal produced.
    pub fn render(&mut self, listener: &mut Listener, out: &mut [f32]) -> usize {
        let Some(mut signal) = self.signal.take() else {
            return 0;
        };
        let read = self.render_from(signal.as_mut(), listener, out);
        self.signal = Some(signal);
        read
    }

    /// Renders one block read from `signal` through the gain, the analyser
    /// tap and the emitter.
    pub fn render_from(
        &mut self,
        signal: &mut dyn SignalSource,
        listener: &mut Listener,
        out: &mut [f32],
    ) -> usize {
        if self.disposed {
            return 0;
        }
        let channels = listener.channels().max(1);
        let frames = (out.len() / channels).min(self.scratch.len());
        let block = &mut self.scratch[..frames];
        block.fill(0.0);

        let read = signal.read(block);
        for sample in block.iter_mut() {
            *sample *= self.volume;
        }

        if let Some(analyser) = &mut self.analyser {
            analyser.tap_mut().push_samples(block);
        }
        if read > 0 {
            if let Some(emitter) = &mut self.emitter {
                emitter.render(block, listener, out);
            }
        }
        read
    }

    /// Tears down the emitter, then the source's own nodes. Safe to call
    /// more than once.
    pub fn dispose(&mut self, ledger: &mut AudioGraphLedger) {
        if self.disposed {
            return;
        }
        self.detach_emitter(ledger);
        self.detach_analyser(ledger);
        self.set_signal(None, ledger);
        ledger.release_node(self.gain_node);
        self.disposed = true;
        log::debug!("Disposed audio source {}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;
    use crate::signal::ToneSource;
    use crate::spatial::{AudioProperties, ListenerBackend, ListenerContext};

    fn setup(backend: ListenerBackend) -> (AudioGraphLedger, Listener) {
        let mut ledger = AudioGraphLedger::new();
        let destination = ledger.create_node("destination");
        let ctx = ListenerContext {
            sample_rate: 48000,
            block_size: 64,
            channels: 2,
            hrtf_path: None,
        };
        let listener = Listener::new(
            backend,
            &ctx,
            AudioProperties::default(),
            &mut ledger,
            destination,
        );
        (ledger, listener)
    }

    #[test]
    fn test_render_applies_volume() {
        let (mut ledger, mut listener) = setup(ListenerBackend::Passthrough);
        let mut source = AudioSource::new("alice", true, true, 0.5, 64, &mut ledger);
        source.attach_emitter(&mut listener, &mut ledger);

        struct Ones;
        impl SignalSource for Ones {
            fn read(&mut self, out: &mut [f32]) -> usize {
                out.fill(1.0);
                out.len()
            }
        }

        let mut out = vec![0.0; 128];
        assert_eq!(source.render_from(&mut Ones, &mut listener, &mut out), 64);
        assert!(out.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_update_moves_emitter_with_offset() {
        let (mut ledger, mut listener) = setup(ListenerBackend::Volume);
        let mut source = AudioSource::new("bob", true, true, 1.0, 64, &mut ledger);
        source.attach_emitter(&mut listener, &mut ledger);

        source
            .pose_mut()
            .set_target_position(Vec3::new(0.0, 0.0, -1.0), 0.0, 0.0);
        source.pose_mut().set_offset(Vec3::new(0.0, 0.0, -1.0));
        source.update(0.0, listener.pose());

        // rendered 2 units away with inverse falloff from 1
        let (gain, _) = source.emitter().unwrap().gains();
        assert!((gain - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dispose_clears_ledger_and_is_idempotent() {
        let (mut ledger, mut listener) = setup(ListenerBackend::Volume);
        let before = ledger.edge_count();
        let mut source = AudioSource::new("carol", true, true, 1.0, 64, &mut ledger);
        source.attach_emitter(&mut listener, &mut ledger);
        source.set_signal(Some(Box::new(ToneSource::new(200.0, 0.5, 48000))), &mut ledger);
        let analyser = ActivityAnalyser::new("carol", 64, SpectrumTap::new(48000, 128).unwrap())
            .unwrap();
        source.attach_analyser(analyser, &mut ledger);
        assert!(ledger.edge_count() > before);

        source.dispose(&mut ledger);
        source.dispose(&mut ledger);
        assert!(source.is_disposed());
        assert!(source.emitter().is_none());
        assert_eq!(ledger.edge_count(), before);

        let mut out = vec![0.0; 128];
        assert_eq!(source.render(&mut listener, &mut out), 0);
    }
}
