//! The audio manager: users, clips, the listener and the shared clock.

use crate::activity::ActivityAnalyser;
use crate::audio_data::{
    LoadOptions, ProgressCallback, StreamingClip, load_clip, select_playable,
};
use crate::clip::{ClipDesc, ClipReader, PlayableClip};
use crate::clock::AudioClock;
use crate::config::{ClipStrategy, VoiceFieldDesc};
use crate::error::{Result, VoiceFieldError};
use crate::events::{EventHub, VoiceFieldEvent};
use crate::graph::{AudioGraphLedger, NodeId};
use crate::math::Vec3;
use crate::pose::Pose;
use crate::signal::SignalSource;
use crate::source::AudioSource;
use crate::spatial::{
    AudioProperties, CapabilitySet, DefaultListenerBuilder, Listener, ListenerBuilder,
    ListenerContext, SpatialTier, create_listener_backend,
};
use crate::spectrum::SpectrumTap;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Result of a clip load, sent back from a loader thread.
struct ClipLoad {
    job: Uuid,
    id: String,
    result: Result<ClipReader>,
}

/// A clip load still in flight.
struct PendingClip {
    job: Uuid,
    desc: ClipDesc,
    path: String,
}

/// Owns every source in the scene and drives them from one thread.
///
/// Control calls (`create_user`, pose setters, `set_tier`, ...) and the
/// per-frame `update` mutate state; `render_block` mixes one block of output
/// from it. Nothing here locks: clip decoding runs on loader threads whose
/// results come back over a channel, and user audio arrives through the
/// lock-free [`StreamWriter`](crate::signal::StreamWriter).
pub struct AudioManager {
    desc: VoiceFieldDesc,
    clip_strategy: ClipStrategy,
    users: HashMap<String, AudioSource>,
    clips: HashMap<String, PlayableClip>,
    pending_clips: HashMap<String, PendingClip>,
    load_sender: Sender<ClipLoad>,
    load_receiver: Receiver<ClipLoad>,
    listener: Listener,
    listener_pose: Pose,
    local_user: Option<String>,
    user_ids: Vec<String>,
    properties: AudioProperties,
    requested_tier: SpatialTier,
    capabilities: CapabilitySet,
    builder: Box<dyn ListenerBuilder>,
    ledger: AudioGraphLedger,
    destination: NodeId,
    events: EventHub,
    clock: AudioClock,
    running: bool,
    mix: Vec<f32>,
}

impl AudioManager {
    pub fn new(desc: VoiceFieldDesc) -> Result<Self> {
        Self::with_capabilities(desc, CapabilitySet::all())
    }

    /// Creates a manager that only tries the implementations in `capabilities`.
    pub fn with_capabilities(desc: VoiceFieldDesc, capabilities: CapabilitySet) -> Result<Self> {
        Self::with_builder(desc, capabilities, Box::new(DefaultListenerBuilder))
    }

    pub fn with_builder(
        desc: VoiceFieldDesc,
        mut capabilities: CapabilitySet,
        builder: Box<dyn ListenerBuilder>,
    ) -> Result<Self> {
        validate(&desc)?;

        let mut ledger = if desc.record_graph {
            AudioGraphLedger::new()
        } else {
            AudioGraphLedger::disabled()
        };
        let destination = ledger.create_node("destination");

        let ctx = listener_context(&desc);
        let backend = create_listener_backend(desc.tier, &mut capabilities, builder.as_ref(), &ctx)?;
        let listener = Listener::new(
            backend,
            &ctx,
            desc.audio_properties,
            &mut ledger,
            destination,
        );

        let clip_strategy = match desc.clip_strategy {
            ClipStrategy::Auto => ClipStrategy::Buffered,
            strategy => strategy,
        };
        let (load_sender, load_receiver) = unbounded();

        log::info!(
            "Audio manager: {} Hz, {} frames per block, {} channel(s), {:?} clips",
            desc.sample_rate,
            desc.block_size,
            desc.channels,
            clip_strategy
        );

        let mut manager = Self {
            clip_strategy,
            users: HashMap::new(),
            clips: HashMap::new(),
            pending_clips: HashMap::new(),
            load_sender,
            load_receiver,
            listener,
            listener_pose: Pose::new(),
            local_user: None,
            user_ids: Vec::new(),
            properties: desc.audio_properties,
            requested_tier: desc.tier,
            capabilities,
            builder,
            ledger,
            destination,
            events: EventHub::new(),
            clock: AudioClock::new(desc.sample_rate),
            running: false,
            mix: vec![0.0; desc.block_size * desc.channels as usize],
            desc,
        };
        manager.report_tier();
        Ok(manager)
    }

    fn report_tier(&mut self) {
        let achieved = self.listener.tier();
        if achieved < self.requested_tier {
            log::warn!(
                "Requested {} spatialization, running at {}",
                self.requested_tier,
                achieved
            );
            self.events.emit(VoiceFieldEvent::TierDowngraded {
                requested: self.requested_tier,
                achieved,
            });
        }
    }

    pub fn desc(&self) -> &VoiceFieldDesc {
        &self.desc
    }

    // Lifecycle and events

    /// Marks the manager running and announces `AudioReady`.
    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            log::info!("Audio manager started at {} spatialization", self.listener.tier());
        }
        self.events.mark_ready();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Subscribes to manager events. A subscriber joining after `start`
    /// receives `AudioReady` straight away.
    pub fn subscribe(&mut self) -> Receiver<VoiceFieldEvent> {
        self.events.subscribe()
    }

    pub fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    pub fn graph(&self) -> &AudioGraphLedger {
        &self.ledger
    }

    pub fn print_graph(&self) -> String {
        self.ledger.print()
    }

    // Users

    /// Adds a remote participant. Returns `false` if the id already exists.
    pub fn create_user(&mut self, id: &str) -> bool {
        if self.users.contains_key(id) {
            return false;
        }
        let source = AudioSource::new(id, true, true, 1.0, self.desc.block_size, &mut self.ledger);
        self.users.insert(id.to_string(), source);
        self.insert_user_id(id);
        self.update_user_offsets();
        log::debug!("Created user {}", id);
        true
    }

    /// Marks `id` as the local participant, who is heard through the listener.
    pub fn set_local_user(&mut self, id: &str) {
        if let Some(previous) = self.local_user.take() {
            if previous != id && !self.users.contains_key(&previous) {
                self.user_ids.retain(|u| u != &previous);
            }
        }
        self.local_user = Some(id.to_string());
        self.insert_user_id(id);
        self.update_user_offsets();
        log::debug!("Local user is {}", id);
    }

    pub fn local_user(&self) -> Option<&str> {
        self.local_user.as_deref()
    }

    pub fn remove_user(&mut self, id: &str) -> bool {
        let Some(mut source) = self.users.remove(id) else {
            return false;
        };
        source.dispose(&mut self.ledger);
        if self.local_user.as_deref() != Some(id) {
            self.user_ids.retain(|u| u != id);
        }
        self.update_user_offsets();
        log::debug!("Removed user {}", id);
        true
    }

    pub fn user(&self, id: &str) -> Option<&AudioSource> {
        self.users.get(id)
    }

    /// Every known participant id, local user included, in sorted order.
    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    fn insert_user_id(&mut self, id: &str) {
        if let Err(index) = self.user_ids.binary_search_by(|u| u.as_str().cmp(id)) {
            self.user_ids.insert(index, id.to_string());
        }
    }

    /// Replaces the audio a user is heard with.
    ///
    /// The previous emitter and analyser are always torn down. A new emitter
    /// carrying the current audio properties, and a fresh activity analyser,
    /// are only created when `stream` is `Some`. Returns `Ok(false)` for an
    /// unknown user.
    pub fn set_user_stream(
        &mut self,
        id: &str,
        stream: Option<Box<dyn SignalSource>>,
    ) -> Result<bool> {
        let Some(source) = self.users.get_mut(id) else {
            return Ok(false);
        };

        source.detach_emitter(&mut self.ledger);
        source.detach_analyser(&mut self.ledger);

        let has_stream = stream.is_some();
        source.set_signal(stream, &mut self.ledger);
        if !has_stream {
            log::debug!("Cleared stream of user {}", id);
            return Ok(true);
        }

        source.attach_emitter(&mut self.listener, &mut self.ledger);
        if let Some(emitter) = source
            .emitter_mut()
            .filter(|emitter| emitter.supports_audio_properties())
        {
            emitter.set_audio_properties(self.properties);
        }

        let bins = self.desc.analyser_buffer_size;
        let tap = SpectrumTap::new(self.desc.sample_rate, bins * 2)?;
        source.attach_analyser(ActivityAnalyser::new(id, bins, tap)?, &mut self.ledger);

        log::debug!("Attached stream to user {}", id);
        Ok(true)
    }

    /// Spreads participants around a circle so the local user sits at the
    /// origin and every other voice keeps a distinct direction.
    pub fn update_user_offsets(&mut self) {
        let count = self.user_ids.len();
        if count == 0 {
            return;
        }

        let radius = self.desc.offset_radius;
        let delta = TAU / count as f32;
        let local_angle = self
            .local_user
            .as_ref()
            .and_then(|local| self.user_ids.iter().position(|u| u == local))
            .map(|index| (index + 1) as f32 * delta)
            .unwrap_or(0.0);
        let local_x = radius * local_angle.sin();
        let local_z = radius * (local_angle.cos() - 1.0);

        for (i, id) in self.user_ids.iter().enumerate() {
            let angle = (i + 1) as f32 * delta;
            let offset = Vec3::new(
                radius * angle.sin() - local_x,
                0.0,
                radius * (angle.cos() - 1.0) - local_z,
            );
            if let Some(source) = self.users.get_mut(id) {
                source.pose_mut().set_offset(offset);
            } else if self.local_user.as_ref() == Some(id) {
                self.listener_pose.set_offset(offset);
            }
        }
    }

    // Clips

    /// Starts loading a clip on a background thread and returns the job id.
    ///
    /// The paths are checked up front: no usable path is
    /// [`VoiceFieldError::MissingPath`], no decodable media type is
    /// [`VoiceFieldError::UnsupportedMedia`]. A newer load with the same id
    /// supersedes this one.
    pub fn create_clip(
        &mut self,
        id: &str,
        desc: ClipDesc,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Uuid> {
        let path = select_playable(id, &desc.paths)?.to_string();

        if self.pending_clips.contains_key(id) {
            log::debug!("Superseding pending load of clip {}", id);
        }

        let job = Uuid::new_v4();
        let sender = self.load_sender.clone();
        let strategy = self.clip_strategy;
        let sample_rate = self.desc.sample_rate;
        let load_id = id.to_string();
        let load_path = path.clone();

        std::thread::Builder::new()
            .name(format!("clip-loader-{}", id))
            .spawn(move || {
                let progress: ProgressCallback = on_progress.unwrap_or_else(|| Box::new(|_| {}));
                let result = load_reader(&load_path, strategy, sample_rate, progress.as_ref());
                // the manager may already be gone
                let _ = sender.send(ClipLoad {
                    job,
                    id: load_id,
                    result,
                });
            })?;

        log::debug!("Loading clip {} from {} (job {})", id, path, job);
        self.pending_clips
            .insert(id.to_string(), PendingClip { job, desc, path });
        Ok(job)
    }

    /// Installs every clip load that has finished. Returns how many arrived.
    pub fn poll_clip_loads(&mut self) -> usize {
        let mut arrived = 0;
        while let Ok(load) = self.load_receiver.try_recv() {
            arrived += 1;
            // failures are reported as events
            let _ = self.install_clip_load(load);
        }
        arrived
    }

    /// Blocks until the clip `id` is installed, its load fails, or `timeout`
    /// passes.
    pub fn wait_for_clip(&mut self, id: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.pending_clips.contains_key(id) {
                return if self.clips.contains_key(id) {
                    Ok(())
                } else {
                    Err(VoiceFieldError::AudioLoading(format!(
                        "No load pending for clip {}",
                        id
                    )))
                };
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.load_receiver.recv_timeout(remaining) {
                Ok(load) => {
                    let is_target = load.id == id;
                    if let Err(e) = self.install_clip_load(load) {
                        if is_target {
                            return Err(e);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(VoiceFieldError::Timeout(format!("clip {}", id)));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(VoiceFieldError::Engine(
                        "Clip loader channel closed".to_string(),
                    ));
                }
            }
        }
    }

    fn install_clip_load(&mut self, load: ClipLoad) -> Result<()> {
        let current = self.pending_clips.get(&load.id).map(|pending| pending.job);
        if current != Some(load.job) {
            log::debug!("Discarding superseded load of clip {}", load.id);
            return Ok(());
        }
        let Some(pending) = self.pending_clips.remove(&load.id) else {
            return Ok(());
        };

        let reader = match load.result {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!("Failed to load clip {}: {}", load.id, e);
                self.events.emit(VoiceFieldEvent::ClipFailed {
                    id: load.id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let mut source = AudioSource::new(
            load.id.as_str(),
            false,
            pending.desc.spatialize,
            pending.desc.volume,
            self.desc.block_size,
            &mut self.ledger,
        );
        source.attach_emitter(&mut self.listener, &mut self.ledger);

        let mut clip = PlayableClip::new(source, reader, pending.path, pending.desc.looping);
        if pending.desc.auto_play {
            clip.play();
        }
        if let Some(mut replaced) = self.clips.insert(load.id.clone(), clip) {
            replaced.source_mut().dispose(&mut self.ledger);
        }

        log::debug!("Clip {} ready", load.id);
        self.events.emit(VoiceFieldEvent::ClipReady { id: load.id });
        Ok(())
    }

    /// Removes a clip and cancels any load still pending for its id.
    pub fn remove_clip(&mut self, id: &str) -> bool {
        let cancelled = self.pending_clips.remove(id).is_some();
        if cancelled {
            log::debug!("Cancelled load of clip {}", id);
        }
        match self.clips.remove(id) {
            Some(mut clip) => {
                clip.source_mut().dispose(&mut self.ledger);
                log::debug!("Removed clip {}", id);
                true
            }
            None => cancelled,
        }
    }

    pub fn play_clip(&mut self, id: &str) -> bool {
        self.clips.get_mut(id).map(PlayableClip::play).is_some()
    }

    pub fn stop_clip(&mut self, id: &str) -> bool {
        self.clips.get_mut(id).map(PlayableClip::stop).is_some()
    }

    pub fn clip(&self, id: &str) -> Option<&PlayableClip> {
        self.clips.get(id)
    }

    pub fn clip_mut(&mut self, id: &str) -> Option<&mut PlayableClip> {
        self.clips.get_mut(id)
    }

    pub fn is_clip_loading(&self, id: &str) -> bool {
        self.pending_clips.contains_key(id)
    }

    // Poses

    pub fn listener_pose(&self) -> &Pose {
        &self.listener_pose
    }

    /// The pose of a user, falling back to the listener for the local user.
    pub fn user_pose(&self, id: &str) -> Option<&Pose> {
        match self.users.get(id) {
            Some(source) => Some(source.pose()),
            None if self.local_user.as_deref() == Some(id) => Some(&self.listener_pose),
            None => None,
        }
    }

    pub fn clip_pose(&self, id: &str) -> Option<&Pose> {
        self.clips.get(id).map(|clip| clip.source().pose())
    }

    fn user_pose_mut(&mut self, id: &str) -> Option<&mut Pose> {
        if self.users.contains_key(id) {
            return self.users.get_mut(id).map(AudioSource::pose_mut);
        }
        if self.local_user.as_deref() == Some(id) {
            return Some(&mut self.listener_pose);
        }
        None
    }

    fn clip_pose_mut(&mut self, id: &str) -> Option<&mut Pose> {
        self.clips
            .get_mut(id)
            .map(|clip| clip.source_mut().pose_mut())
    }

    fn transition(&self, duration: Option<f64>) -> (f64, f64) {
        let duration = duration.unwrap_or(self.properties.transition_time as f64);
        (self.clock.current_time(), duration)
    }

    pub fn set_user_pose(
        &mut self,
        id: &str,
        position: Vec3,
        forward: Vec3,
        up: Vec3,
        duration: Option<f64>,
    ) -> bool {
        let (now, duration) = self.transition(duration);
        self.user_pose_mut(id)
            .map(|pose| pose.set_target(position, forward, up, now, duration))
            .is_some()
    }

    pub fn set_user_position(&mut self, id: &str, position: Vec3, duration: Option<f64>) -> bool {
        let (now, duration) = self.transition(duration);
        self.user_pose_mut(id)
            .map(|pose| pose.set_target_position(position, now, duration))
            .is_some()
    }

    pub fn set_user_orientation(
        &mut self,
        id: &str,
        forward: Vec3,
        up: Vec3,
        duration: Option<f64>,
    ) -> bool {
        let (now, duration) = self.transition(duration);
        self.user_pose_mut(id)
            .map(|pose| pose.set_target_orientation(forward, up, now, duration))
            .is_some()
    }

    /// Overrides a user's seat offset until the next offset recomputation.
    pub fn set_user_offset(&mut self, id: &str, offset: Vec3) -> bool {
        self.user_pose_mut(id)
            .map(|pose| pose.set_offset(offset))
            .is_some()
    }

    pub fn set_clip_pose(
        &mut self,
        id: &str,
        position: Vec3,
        forward: Vec3,
        up: Vec3,
        duration: Option<f64>,
    ) -> bool {
        let (now, duration) = self.transition(duration);
        self.clip_pose_mut(id)
            .map(|pose| pose.set_target(position, forward, up, now, duration))
            .is_some()
    }

    pub fn set_clip_position(&mut self, id: &str, position: Vec3, duration: Option<f64>) -> bool {
        let (now, duration) = self.transition(duration);
        self.clip_pose_mut(id)
            .map(|pose| pose.set_target_position(position, now, duration))
            .is_some()
    }

    pub fn set_clip_orientation(
        &mut self,
        id: &str,
        forward: Vec3,
        up: Vec3,
        duration: Option<f64>,
    ) -> bool {
        let (now, duration) = self.transition(duration);
        self.clip_pose_mut(id)
            .map(|pose| pose.set_target_orientation(forward, up, now, duration))
            .is_some()
    }

    // Spatialization

    /// The tier last asked for.
    pub fn tier(&self) -> SpatialTier {
        self.requested_tier
    }

    /// The tier the listener is actually running.
    pub fn achieved_tier(&self) -> SpatialTier {
        self.listener.tier()
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Switches spatialization tier and rebuilds every emitter on the new
    /// listener. Returns the tier actually achieved.
    pub fn set_tier(&mut self, tier: SpatialTier) -> Result<SpatialTier> {
        let ctx = listener_context(&self.desc);
        let backend =
            create_listener_backend(tier, &mut self.capabilities, self.builder.as_ref(), &ctx)?;
        let mut listener = Listener::new(
            backend,
            &ctx,
            self.properties,
            &mut self.ledger,
            self.destination,
        );
        listener.update(*self.listener.pose());

        for source in self.users.values_mut() {
            if source.emitter().is_some() {
                source.attach_emitter(&mut listener, &mut self.ledger);
            }
        }
        for clip in self.clips.values_mut() {
            clip.source_mut().attach_emitter(&mut listener, &mut self.ledger);
        }

        let previous = std::mem::replace(&mut self.listener, listener);
        previous.dispose(&mut self.ledger);

        self.requested_tier = tier;
        self.report_tier();
        log::info!("Switched spatialization to {}", self.listener.tier());
        Ok(self.listener.tier())
    }

    pub fn audio_properties(&self) -> &AudioProperties {
        &self.properties
    }

    /// Applies new distance properties to the listener and to user emitters.
    /// Clips keep the properties they were created with.
    pub fn set_audio_properties(&mut self, properties: AudioProperties) {
        self.properties = properties;
        self.listener.set_audio_properties(properties);
        for emitter in self
            .users
            .values_mut()
            .filter_map(AudioSource::emitter_mut)
            .filter(|emitter| emitter.supports_audio_properties())
        {
            emitter.set_audio_properties(properties);
        }
        log::debug!("Audio properties set to {:?}", properties);
    }

    // Per-frame work

    /// Advances every pose to `t` and runs activity analysis.
    pub fn update(&mut self, t: f64) {
        self.clock.sync_to(t);
        self.poll_clip_loads();

        let now = self.clock.current_time();
        self.listener_pose.update(now);
        self.listener.update(self.listener_pose.rendered());
        let listener_pose = *self.listener.pose();

        for clip in self.clips.values_mut() {
            clip.source_mut().update(now, &listener_pose);
        }
        for source in self.users.values_mut() {
            source.update(now, &listener_pose);
        }

        for source in self.users.values_mut() {
            if let Some(change) = source.update_activity() {
                log::debug!("User {} active: {}", change.id, change.is_active);
                self.events.emit(VoiceFieldEvent::AudioActivity {
                    id: change.id,
                    is_active: change.is_active,
                });
            }
        }
    }

    /// Renders one interleaved block of `block_size` frames.
    pub fn render_block(&mut self) -> &[f32] {
        self.mix.fill(0.0);
        self.listener.begin_block();

        for clip in self.clips.values_mut() {
            clip.render(&mut self.listener, &mut self.mix);
        }
        for source in self.users.values_mut() {
            source.render(&mut self.listener, &mut self.mix);
        }

        if let Err(e) = self.listener.finish_block(&mut self.mix) {
            log::error!("Listener failed to finish block: {}", e);
        }

        self.clock.advance(self.desc.block_size);
        &self.mix
    }
}

fn validate(desc: &VoiceFieldDesc) -> Result<()> {
    if desc.sample_rate == 0 {
        return Err(VoiceFieldError::Configuration(
            "Sample rate must be greater than 0".to_string(),
        ));
    }
    if desc.block_size == 0 {
        return Err(VoiceFieldError::Configuration(
            "Block size must be greater than 0".to_string(),
        ));
    }
    if desc.channels == 0 {
        return Err(VoiceFieldError::Configuration(
            "Channel count must be greater than 0".to_string(),
        ));
    }
    if desc.analyser_buffer_size == 0 {
        return Err(VoiceFieldError::Analysis(
            "Activity analyser buffer size must be greater than 0".to_string(),
        ));
    }
    // the spectrum tap runs an FFT twice the buffer size
    if desc.analyser_buffer_size < 16 || !desc.analyser_buffer_size.is_power_of_two() {
        return Err(VoiceFieldError::Analysis(format!(
            "Activity analyser buffer size must be a power of two >= 16, got {}",
            desc.analyser_buffer_size
        )));
    }
    Ok(())
}

fn listener_context(desc: &VoiceFieldDesc) -> ListenerContext {
    ListenerContext {
        sample_rate: desc.sample_rate,
        block_size: desc.block_size,
        channels: desc.channels as usize,
        hrtf_path: desc.hrtf_path.clone(),
    }
}

/// Runs on a loader thread.
fn load_reader(
    path: &str,
    strategy: ClipStrategy,
    sample_rate: u32,
    on_progress: &dyn Fn(f32),
) -> Result<ClipReader> {
    match strategy {
        ClipStrategy::Streaming => {
            on_progress(0.0);
            let clip = StreamingClip::open(path, sample_rate)?;
            on_progress(1.0);
            Ok(ClipReader::streaming(clip))
        }
        ClipStrategy::Buffered | ClipStrategy::Auto => {
            let options = LoadOptions::new().target_sample_rate(sample_rate);
            load_clip(path, &options, on_progress).map(ClipReader::buffered)
        }
    }
}
